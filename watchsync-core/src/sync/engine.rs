//! Sync Engine
//!
//! Host/non-host state machine. The host is the single source of truth for
//! playback: it broadcasts its state on player events, on every heartbeat and
//! on request. Non-hosts apply the recognised host's state to their local
//! player when drift exceeds the current tolerance.
//!
//! All methods are called serially from the session event loop, so the engine
//! holds no locks of its own.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::external::{Clock, PlayerControl, PlayerEvent, Transport};
use crate::presence::{ActivityStatus, PlaybackSnapshot, PresenceUpdate, SharedPresence};
use crate::quality::{NetworkQuality, NetworkQualityEstimator, SyncMetrics};

use super::protocol::{PlaybackStateMessage, SyncMessage};
use super::timer::HeartbeatTimer;

/// Errors returned by engine commands
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Not the host")]
    NotHost,

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("Already the host")]
    AlreadyHost,
}

/// Local role in the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    NonHost,
}

/// Outside world the engine acts on
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub player: Arc<dyn PlayerControl>,
    pub clock: Arc<dyn Clock>,
}

/// Result of processing one accepted playback sync
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOutcome {
    pub adjusted_position_seconds: f64,
    pub delta_seconds: f64,
    pub tolerance_seconds: f64,
    pub seeked: bool,
    pub metrics: SyncMetrics,
}

pub struct SyncEngine {
    local_id: String,
    role: Role,
    /// Participant whose playback we currently follow (ourselves when host)
    host_id: String,
    config: SyncConfig,
    io: Collaborators,
    presence: SharedPresence,
    estimator: NetworkQualityEstimator,
    heartbeat: Box<dyn HeartbeatTimer>,
    /// Whether a sync from the current host has been applied yet
    synchronized: bool,
    /// Last time we heard from, or asked, the current host
    last_host_contact_ms: u64,
    /// Last tier we announced for our link to the host
    reported_quality: Option<NetworkQuality>,
    stopped: bool,
}

impl SyncEngine {
    pub fn new(
        local_id: impl Into<String>,
        initial_host_id: impl Into<String>,
        config: SyncConfig,
        io: Collaborators,
        presence: SharedPresence,
        heartbeat: Box<dyn HeartbeatTimer>,
    ) -> Self {
        let local_id = local_id.into();
        let host_id = initial_host_id.into();
        let role = if local_id == host_id {
            Role::Host
        } else {
            Role::NonHost
        };
        let now = io.clock.now_ms();

        Self {
            estimator: NetworkQualityEstimator::new(Arc::clone(&presence)),
            local_id,
            role,
            host_id,
            config,
            io,
            presence,
            heartbeat,
            synchronized: false,
            last_host_contact_ms: now,
            reported_quality: None,
            stopped: false,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    /// Currently recognised host id
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.is_running()
    }

    /// Metrics for our link to the current host
    pub fn metrics(&self) -> Option<&SyncMetrics> {
        self.estimator.metrics(&self.host_id)
    }

    /// Enter the initial role
    pub fn start(&mut self) {
        self.presence.write().set_host(&self.host_id);

        match self.role {
            Role::Host => {
                info!("Sync engine started as host ({})", self.local_id);
                self.heartbeat.start();
                self.broadcast_state("session start");
            }
            Role::NonHost => {
                info!(
                    "Sync engine started as listener ({}), host is {}",
                    self.local_id, self.host_id
                );
                self.send_sync_request();
            }
        }
    }

    /// Tear down timers. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.heartbeat.cancel();
        if !self.stopped {
            info!("Sync engine stopped ({})", self.local_id);
            self.estimator.clear();
        }
        self.stopped = true;
    }

    /// Decode and process an inbound envelope; malformed input is discarded
    pub fn handle_payload(&mut self, payload: &[u8]) {
        match SyncMessage::decode(payload) {
            Ok(message) => self.handle_message(message),
            Err(e) => warn!("Discarding inbound message: {}", e),
        }
    }

    pub fn handle_message(&mut self, message: SyncMessage) {
        if self.stopped {
            return;
        }

        match message {
            SyncMessage::PlaybackSync(state) => {
                if self.role == Role::Host {
                    warn!(
                        "Ignoring PLAYBACK_SYNC from {} while host (stale or duplicate host)",
                        state.host_id
                    );
                } else if state.host_id != self.host_id {
                    debug!(
                        "Discarding PLAYBACK_SYNC from {} (recognised host is {})",
                        state.host_id, self.host_id
                    );
                } else {
                    self.apply_playback_state(&state);
                }
            }

            SyncMessage::SyncRequest { requester_id } => {
                let now = self.io.clock.now_ms();
                {
                    let mut presence = self.presence.write();
                    if presence.contains(&requester_id) {
                        presence.upsert(&requester_id, PresenceUpdate::active(), now);
                    }
                }

                if self.role == Role::Host {
                    debug!("Sync request from {}", requester_id);
                    self.broadcast_state("sync request");
                } else {
                    debug!("Ignoring sync request from {} (not host)", requester_id);
                }
            }

            SyncMessage::HostTransfer {
                previous_host_id,
                new_host_id,
            } => {
                self.observe_handoff(&previous_host_id, &new_host_id, false);
            }

            SyncMessage::HostTransferAccepted {
                previous_host_id,
                new_host_id,
            } => {
                self.observe_handoff(&previous_host_id, &new_host_id, true);
            }

            SyncMessage::NetworkQualityUpdate {
                participant_id,
                quality,
            } => {
                if participant_id == self.local_id {
                    return;
                }
                let now = self.io.clock.now_ms();
                let mut presence = self.presence.write();
                if presence.contains(&participant_id) {
                    presence.upsert(&participant_id, PresenceUpdate::network_quality(quality), now);
                }
            }
        }
    }

    /// React to a local player event
    pub fn handle_player_event(&mut self, event: PlayerEvent) {
        if self.stopped {
            return;
        }

        let now = self.io.clock.now_ms();
        let snapshot = PlaybackSnapshot {
            is_playing: self.io.player.is_playing(),
            position_seconds: self.io.player.position_seconds(),
            buffering: event == PlayerEvent::Waiting,
            seeking: event == PlayerEvent::Seeking,
        };
        self.presence.write().upsert(
            &self.local_id,
            PresenceUpdate::playback(snapshot).with_activity(ActivityStatus::Active),
            now,
        );

        if self.role == Role::Host {
            match event {
                PlayerEvent::Playing => self.broadcast_state("playing"),
                PlayerEvent::Pause => self.broadcast_state("pause"),
                PlayerEvent::Seeked => self.broadcast_state("seeked"),
                PlayerEvent::Seeking | PlayerEvent::Waiting => {}
            }
        }
    }

    /// Periodic heartbeat
    pub fn heartbeat_tick(&mut self) {
        if self.stopped {
            return;
        }
        if self.role == Role::Host {
            self.broadcast_state("heartbeat");
        } else {
            debug!("Dropping heartbeat tick while not host");
        }
    }

    /// Re-request sync if the host has been silent for too long.
    ///
    /// Returns true if a request was sent.
    pub fn check_host_timeout(&mut self) -> bool {
        if self.stopped || self.role == Role::Host {
            return false;
        }

        let now = self.io.clock.now_ms();
        let silent_ms = now.saturating_sub(self.last_host_contact_ms);
        if silent_ms < self.config.host_timeout_ms {
            return false;
        }

        warn!(
            "No sync from host {} for {}ms, requesting resync",
            self.host_id, silent_ms
        );
        self.send_sync_request();
        true
    }

    /// Hand the host role to `target` (host only).
    ///
    /// Demotes immediately, before the target confirms.
    pub fn initiate_handoff(&mut self, target: &str) -> Result<(), SyncError> {
        if self.role != Role::Host {
            return Err(SyncError::NotHost);
        }
        if target == self.local_id {
            return Err(SyncError::AlreadyHost);
        }
        if !self.presence.read().contains(target) {
            return Err(SyncError::UnknownParticipant(target.to_string()));
        }

        info!("Handing host role from {} to {}", self.local_id, target);

        self.send(&SyncMessage::HostTransfer {
            previous_host_id: self.local_id.clone(),
            new_host_id: target.to_string(),
        });

        self.role = Role::NonHost;
        self.heartbeat.cancel();
        self.recognise_host(target);
        Ok(())
    }

    /// Take over as host after `previous_host_id` left the session
    pub fn assume_host(&mut self, previous_host_id: &str) {
        if self.stopped || self.role == Role::Host {
            return;
        }
        info!(
            "Assuming host role after {} left ({})",
            previous_host_id, self.local_id
        );
        self.become_host(previous_host_id);
    }

    fn observe_handoff(&mut self, previous_host_id: &str, new_host_id: &str, accepted: bool) {
        if new_host_id == self.host_id {
            debug!("Handoff to {} already recognised", new_host_id);
            return;
        }
        if previous_host_id != self.host_id {
            debug!(
                "Discarding stale handoff {} -> {} (recognised host is {})",
                previous_host_id, new_host_id, self.host_id
            );
            return;
        }
        if self.role == Role::Host {
            warn!(
                "Ignoring handoff {} -> {} while host",
                previous_host_id, new_host_id
            );
            return;
        }

        if new_host_id == self.local_id {
            if accepted {
                warn!("Ignoring acceptance on our behalf from {}", previous_host_id);
                return;
            }
            info!("Host transfer from {} accepted", previous_host_id);
            self.become_host(previous_host_id);
        } else {
            self.recognise_host(new_host_id);
        }
    }

    fn become_host(&mut self, previous_host_id: &str) {
        self.role = Role::Host;
        self.host_id = self.local_id.clone();
        self.synchronized = true;
        self.presence.write().set_host(&self.local_id);
        self.heartbeat.start();

        self.send(&SyncMessage::HostTransferAccepted {
            previous_host_id: previous_host_id.to_string(),
            new_host_id: self.local_id.clone(),
        });
        self.broadcast_state("became host");
        self.reset_quality();
    }

    /// A host has no link to measure; drop back to Good
    fn reset_quality(&mut self) {
        let previous = self.reported_quality.take();
        self.presence.write().upsert(
            &self.local_id,
            PresenceUpdate::network_quality(NetworkQuality::Good),
            self.io.clock.now_ms(),
        );
        if previous.is_some_and(|q| q != NetworkQuality::Good) {
            info!("Network quality reset to Good after becoming host");
            self.send(&SyncMessage::NetworkQualityUpdate {
                participant_id: self.local_id.clone(),
                quality: NetworkQuality::Good,
            });
        }
    }

    fn recognise_host(&mut self, new_host_id: &str) {
        info!("Recognised host changed {} -> {}", self.host_id, new_host_id);
        self.host_id = new_host_id.to_string();
        self.synchronized = false;
        self.last_host_contact_ms = self.io.clock.now_ms();
        self.presence.write().set_host(new_host_id);
    }

    /// Apply a state message from the recognised host
    fn apply_playback_state(&mut self, state: &PlaybackStateMessage) -> SyncOutcome {
        let now = self.io.clock.now_ms();
        let player = Arc::clone(&self.io.player);

        // Elapsed time only moves the position while the host is playing
        let elapsed_secs = if state.is_playing {
            now.saturating_sub(state.emitted_at) as f64 / 1000.0
        } else {
            0.0
        };
        let adjusted = state.position_seconds + elapsed_secs;
        let current = player.position_seconds();
        let delta = (current - adjusted).abs();
        let tolerance = self
            .estimator
            .tolerance(&self.host_id, self.config.base_tolerance_secs);

        debug!(
            "Sync: drift {:.3}s (expected {:.3}s, actual {:.3}s, elapsed {:.3}s, tolerance {:.2}s)",
            delta, adjusted, current, elapsed_secs, tolerance
        );

        let within = delta <= tolerance;
        let mut seeked = false;
        if !within {
            match player.seek(adjusted) {
                Ok(()) => {
                    info!(
                        "Drift {:.3}s exceeds {:.2}s, seeking to {:.3}s",
                        delta, tolerance, adjusted
                    );
                    seeked = true;
                }
                Err(e) => warn!("Seek to {:.3}s failed: {}", adjusted, e),
            }
        }

        let metrics = self
            .estimator
            .record_sample(&self.host_id, delta, within, now);

        // Reconcile play/pause
        let locally_playing = player.is_playing();
        if state.is_playing && !locally_playing {
            info!("Host is playing but we're paused, resuming");
            if let Err(e) = player.play() {
                warn!("Play failed: {}", e);
            }
        } else if !state.is_playing && locally_playing {
            info!("Host is paused but we're playing, pausing");
            if let Err(e) = player.pause() {
                warn!("Pause failed: {}", e);
            }
        }

        self.presence.write().upsert(
            &state.host_id,
            PresenceUpdate::playback(PlaybackSnapshot {
                is_playing: state.is_playing,
                position_seconds: adjusted,
                buffering: false,
                seeking: false,
            }),
            now,
        );

        self.synchronized = true;
        self.last_host_contact_ms = now;
        self.report_quality(metrics.network_quality, now);

        SyncOutcome {
            adjusted_position_seconds: adjusted,
            delta_seconds: delta,
            tolerance_seconds: tolerance,
            seeked,
            metrics,
        }
    }

    /// Announce our link quality when its tier changes
    fn report_quality(&mut self, quality: NetworkQuality, now: u64) {
        if self.reported_quality == Some(quality) {
            return;
        }
        let first = self.reported_quality.is_none();
        self.reported_quality = Some(quality);
        // Everyone starts at Good, so a first Good reading is not news
        if first && quality == NetworkQuality::Good {
            return;
        }

        info!("Network quality to host {} is now {:?}", self.host_id, quality);
        self.presence
            .write()
            .upsert(&self.local_id, PresenceUpdate::network_quality(quality), now);
        self.send(&SyncMessage::NetworkQualityUpdate {
            participant_id: self.local_id.clone(),
            quality,
        });
    }

    fn current_state(&self) -> PlaybackStateMessage {
        PlaybackStateMessage {
            is_playing: self.io.player.is_playing(),
            position_seconds: self.io.player.position_seconds(),
            emitted_at: self.io.clock.now_ms(),
            host_id: self.local_id.clone(),
        }
    }

    fn broadcast_state(&self, reason: &str) {
        let state = self.current_state();
        debug!(
            "Broadcasting state ({}): playing={} position={:.3}s",
            reason, state.is_playing, state.position_seconds
        );
        self.send(&SyncMessage::PlaybackSync(state));
    }

    fn send_sync_request(&mut self) {
        self.last_host_contact_ms = self.io.clock.now_ms();
        self.send(&SyncMessage::SyncRequest {
            requester_id: self.local_id.clone(),
        });
    }

    fn send(&self, message: &SyncMessage) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode {}: {}", message.kind(), e);
                return;
            }
        };
        if let Err(e) = self.io.transport.broadcast(payload) {
            warn!("Broadcast of {} failed: {}", message.kind(), e);
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.heartbeat.cancel();
    }
}
