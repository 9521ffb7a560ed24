//! FFI types exposed via uniffi

use crate::config::{ConfigError, SyncConfig};
use crate::external::PlayerEvent;
use crate::presence::{ActivityStatus, Participant as InternalParticipant};
use crate::quality::NetworkQuality;
use crate::session::SessionError;
use crate::sync::{Role, SyncError};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Session already started")]
    AlreadyStarted,

    #[error("Session not started")]
    NotStarted,

    #[error("Session stopped")]
    Stopped,

    #[error("Not the host")]
    NotHost,

    #[error("Already the host")]
    AlreadyHost,

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        CoreError::InvalidConfig(e.to_string())
    }
}

impl From<SessionError> for CoreError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Stopped => CoreError::Stopped,
            SessionError::InvalidConfig(e) => e.into(),
            SessionError::Sync(SyncError::NotHost) => CoreError::NotHost,
            SessionError::Sync(SyncError::AlreadyHost) => CoreError::AlreadyHost,
            SessionError::Sync(SyncError::UnknownParticipant(id)) => {
                CoreError::UnknownParticipant(id)
            }
        }
    }
}

/// Local player event pushed in by the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum PlayerEventKind {
    Playing,
    Pause,
    Seeking,
    Seeked,
    Waiting,
}

impl From<PlayerEventKind> for PlayerEvent {
    fn from(kind: PlayerEventKind) -> Self {
        match kind {
            PlayerEventKind::Playing => PlayerEvent::Playing,
            PlayerEventKind::Pause => PlayerEvent::Pause,
            PlayerEventKind::Seeking => PlayerEvent::Seeking,
            PlayerEventKind::Seeked => PlayerEvent::Seeked,
            PlayerEventKind::Waiting => PlayerEvent::Waiting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum RoleKind {
    Host,
    NonHost,
}

impl From<Role> for RoleKind {
    fn from(role: Role) -> Self {
        match role {
            Role::Host => RoleKind::Host,
            Role::NonHost => RoleKind::NonHost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ActivityKind {
    Active,
    Inactive,
    Away,
}

impl From<ActivityStatus> for ActivityKind {
    fn from(status: ActivityStatus) -> Self {
        match status {
            ActivityStatus::Active => ActivityKind::Active,
            ActivityStatus::Inactive => ActivityKind::Inactive,
            ActivityStatus::Away => ActivityKind::Away,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum QualityKind {
    Good,
    Fair,
    Poor,
}

impl From<NetworkQuality> for QualityKind {
    fn from(quality: NetworkQuality) -> Self {
        match quality {
            NetworkQuality::Good => QualityKind::Good,
            NetworkQuality::Fair => QualityKind::Fair,
            NetworkQuality::Poor => QualityKind::Poor,
        }
    }
}

/// Last known playback of a participant
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct PlaybackInfo {
    pub is_playing: bool,
    pub position_seconds: f64,
    pub buffering: bool,
    pub seeking: bool,
}

/// Participant exposed via FFI
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct ParticipantInfo {
    pub id: String,
    pub display_name: String,
    pub is_host: bool,
    pub activity: ActivityKind,
    pub network_quality: QualityKind,
    pub playback: Option<PlaybackInfo>,
    pub last_active_at_ms: u64,
}

impl From<&InternalParticipant> for ParticipantInfo {
    fn from(p: &InternalParticipant) -> Self {
        Self {
            id: p.id.clone(),
            display_name: p.display_name.clone(),
            is_host: p.is_host,
            activity: p.activity_status.into(),
            network_quality: p.network_quality.into(),
            playback: p.playback.map(|s| PlaybackInfo {
                is_playing: s.is_playing,
                position_seconds: s.position_seconds,
                buffering: s.buffering,
                seeking: s.seeking,
            }),
            last_active_at_ms: p.last_active_at_ms,
        }
    }
}

/// Session tunables; unset fields fall back to the environment/defaults
#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct SyncSettings {
    pub heartbeat_interval_ms: Option<u64>,
    pub base_tolerance_secs: Option<f64>,
    pub host_timeout_ms: Option<u64>,
}

impl SyncSettings {
    pub(crate) fn apply(&self, mut config: SyncConfig) -> Result<SyncConfig, ConfigError> {
        if let Some(ms) = self.heartbeat_interval_ms {
            config.heartbeat_interval_ms = ms;
        }
        if let Some(secs) = self.base_tolerance_secs {
            config.base_tolerance_secs = secs;
        }
        if let Some(ms) = self.host_timeout_ms {
            config.host_timeout_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Player glue implemented by the host platform
#[uniffi::export(callback_interface)]
pub trait PlayerBridge: Send + Sync {
    fn position_seconds(&self) -> f64;
    fn is_playing(&self) -> bool;
    /// Returns false if the player refused the seek
    fn seek(&self, seconds: f64) -> bool;
    fn play(&self) -> bool;
    fn pause(&self) -> bool;
}

/// Outbound message glue, for platforms that bring their own channel
#[uniffi::export(callback_interface)]
pub trait MessageBridge: Send + Sync {
    /// Returns false if the payload could not be sent
    fn broadcast(&self, payload: Vec<u8>) -> bool;
}

/// Callback interface for session events
#[uniffi::export(callback_interface)]
pub trait SessionObserver: Send + Sync {
    fn on_participants_changed(&self, participants: Vec<ParticipantInfo>);
    fn on_role_changed(&self, role: RoleKind, host_id: String);
    fn on_stopped(&self);
}
