//! Collaborator Interfaces
//!
//! The sync core never talks to a concrete player, network or participant
//! roster directly. Platform glue implements these traits and hands them to
//! the [`Session`](crate::session::Session).

use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by a [`Transport`]
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Send failed: {0}")]
    Send(String),
}

/// Errors raised by a [`PlayerControl`]
#[derive(Debug, Clone, Error)]
pub enum PlayerError {
    #[error("Player rejected command: {0}")]
    Rejected(String),

    #[error("Player is not available")]
    Unavailable,
}

/// Fire-and-forget fan-out to every participant of the session.
///
/// Payloads are encoded envelopes (see [`SyncMessage`](crate::sync::SyncMessage)).
/// No ordering or delivery guarantee is assumed.
pub trait Transport: Send + Sync {
    /// Send a payload to all other participants
    fn broadcast(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Receive inbound payloads. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<u8>>;
}

/// Events emitted by the local player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    Playing,
    Pause,
    Seeking,
    Seeked,
    /// Player stalled waiting for data (buffering)
    Waiting,
}

/// Control surface of the local video player
pub trait PlayerControl: Send + Sync {
    /// Current playback position in seconds
    fn position_seconds(&self) -> f64;

    /// Whether the player is currently playing
    fn is_playing(&self) -> bool;

    fn seek(&self, seconds: f64) -> Result<(), PlayerError>;

    fn play(&self) -> Result<(), PlayerError>;

    fn pause(&self) -> Result<(), PlayerError>;

    /// Receive player events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PlayerEvent>;
}

/// Join/leave notification from the platform's participant roster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantEvent {
    Joined { id: String, display_name: String },
    Left { id: String },
}

/// Source of join/leave notifications
pub trait ParticipantSource: Send + Sync {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ParticipantEvent>;
}

/// Wall clock in milliseconds since UNIX epoch.
///
/// Injected so that elapsed-time compensation and staleness are testable.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// [`Clock`] backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// Get current time in milliseconds since UNIX epoch
pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
