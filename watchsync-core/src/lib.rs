//! WatchSync - Core Library
//!
//! Host-based playback synchronisation for shared viewing sessions. One
//! participant (the host) is the source of truth for play/pause/position;
//! everyone else follows, with drift tolerance adapted to their link quality.

pub mod config;
pub mod external;
pub mod ffi;
pub mod network;
pub mod presence;
pub mod quality;
pub mod session;
pub mod sync;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::{ConfigError, SyncConfig};
pub use presence::{ActivityStatus, Participant, PresenceStore};
pub use quality::NetworkQuality;
pub use session::{Session, SessionHandle, SessionOptions};
pub use sync::{Role, SyncEngine, SyncMessage};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
