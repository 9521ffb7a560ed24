//! Sync Protocol Messages
//!
//! Every message travels as a JSON envelope `{"type": "...", "data": {...}}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quality::NetworkQuality;

/// Errors decoding an inbound envelope
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    Invalid(String),
}

/// Host playback state, broadcast on player events, heartbeats and sync requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStateMessage {
    pub is_playing: bool,
    pub position_seconds: f64,
    /// When the host captured this state (ms since UNIX epoch)
    pub emitted_at: u64,
    pub host_id: String,
}

/// Messages exchanged between participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    /// Current host playback state
    PlaybackSync(PlaybackStateMessage),

    /// Ask the host for an immediate state broadcast
    #[serde(rename_all = "camelCase")]
    SyncRequest { requester_id: String },

    /// Host hands its role to another participant
    #[serde(rename_all = "camelCase")]
    HostTransfer {
        previous_host_id: String,
        new_host_id: String,
    },

    /// New host confirms it has taken over
    #[serde(rename_all = "camelCase")]
    HostTransferAccepted {
        previous_host_id: String,
        new_host_id: String,
    },

    /// A participant's link quality to the host changed tier
    #[serde(rename_all = "camelCase")]
    NetworkQualityUpdate {
        participant_id: String,
        quality: NetworkQuality,
    },
}

impl SyncMessage {
    /// Wire discriminator, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::PlaybackSync(_) => "PLAYBACK_SYNC",
            SyncMessage::SyncRequest { .. } => "SYNC_REQUEST",
            SyncMessage::HostTransfer { .. } => "HOST_TRANSFER",
            SyncMessage::HostTransferAccepted { .. } => "HOST_TRANSFER_ACCEPTED",
            SyncMessage::NetworkQualityUpdate { .. } => "NETWORK_QUALITY_UPDATE",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and validate an inbound envelope
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let message: SyncMessage = serde_json::from_slice(bytes)?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let non_empty = |field: &str, value: &str| {
            if value.is_empty() {
                Err(ProtocolError::Invalid(format!("{} must not be empty", field)))
            } else {
                Ok(())
            }
        };

        match self {
            SyncMessage::PlaybackSync(state) => {
                non_empty("hostId", &state.host_id)?;
                if !state.position_seconds.is_finite() || state.position_seconds < 0.0 {
                    return Err(ProtocolError::Invalid(format!(
                        "positionSeconds out of range: {}",
                        state.position_seconds
                    )));
                }
                Ok(())
            }
            SyncMessage::SyncRequest { requester_id } => non_empty("requesterId", requester_id),
            SyncMessage::HostTransfer {
                previous_host_id,
                new_host_id,
            }
            | SyncMessage::HostTransferAccepted {
                previous_host_id,
                new_host_id,
            } => {
                non_empty("previousHostId", previous_host_id)?;
                non_empty("newHostId", new_host_id)
            }
            SyncMessage::NetworkQualityUpdate { participant_id, .. } => {
                non_empty("participantId", participant_id)
            }
        }
    }
}
