//! Sync Engine
//!
//! Handles synchronization of playback state between participants.

mod engine;
mod protocol;
mod timer;

pub use engine::*;
pub use protocol::*;
pub use timer::*;
