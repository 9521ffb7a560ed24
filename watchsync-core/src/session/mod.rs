//! Session Coordinator
//!
//! Wires the presence store and sync engine to the platform collaborators and
//! runs them on a single event loop: inbound messages, player events, roster
//! changes, heartbeat ticks and the staleness sweep are all processed one at a
//! time, so none of the core components need their own synchronisation.

mod successor;

pub use successor::{LowestId, Manual, SuccessorPolicy};

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, SyncConfig};
use crate::external::{Clock, ParticipantEvent, ParticipantSource, PlayerEvent};
use crate::presence::{
    new_shared_presence, ActivityStatus, Participant, PresenceUpdate, SharedPresence,
};
use crate::sync::{Collaborators, Role, SyncEngine, SyncError, TokioHeartbeat};

/// Errors returned by [`SessionHandle`] commands
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session is stopped")]
    Stopped,

    #[error("Invalid session config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Identity and tunables for one session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Our own participant id
    pub local_id: String,
    pub display_name: String,
    /// Host designated when the session was created
    pub initial_host_id: String,
    pub config: SyncConfig,
}

/// Notifications for the UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    RoleChanged { role: Role, host_id: String },
    PresenceChanged(Vec<Participant>),
    Stopped,
}

/// Commands accepted by the session loop
#[derive(Debug)]
pub enum SessionCommand {
    TransferHost {
        target: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Stop,
}

#[derive(Debug, Clone)]
struct SessionStatus {
    role: Role,
    host_id: String,
    running: bool,
}

/// A configured session, ready to start
pub struct Session {
    options: SessionOptions,
    io: Collaborators,
    participants: Arc<dyn ParticipantSource>,
    successor: Box<dyn SuccessorPolicy>,
}

impl Session {
    pub fn new(
        options: SessionOptions,
        io: Collaborators,
        participants: Arc<dyn ParticipantSource>,
    ) -> Self {
        Self {
            options,
            io,
            participants,
            successor: Box::new(LowestId),
        }
    }

    /// Replace the default [`LowestId`] succession rule
    pub fn with_successor_policy(mut self, policy: impl SuccessorPolicy + 'static) -> Self {
        self.successor = Box::new(policy);
        self
    }

    /// Spawn the session loop on `runtime`.
    ///
    /// Fails without spawning anything if the config is invalid.
    pub fn start(
        self,
        runtime: &Handle,
    ) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SessionUpdate>), SessionError> {
        let Session {
            options,
            io,
            participants,
            successor,
        } = self;
        options.config.validate()?;
        let config = options.config.clone();

        let presence = new_shared_presence(config.inactive_after_secs, config.away_after_secs);
        presence.write().upsert(
            &options.local_id,
            PresenceUpdate::display_name(options.display_name.clone())
                .with_activity(ActivityStatus::Active),
            io.clock.now_ms(),
        );

        // Subscribe before spawning so nothing emitted in between is lost
        let inbound = Inbound {
            messages: io.transport.subscribe(),
            player: io.player.subscribe(),
            participants: participants.subscribe(),
        };

        let (tick_tx, ticks) = mpsc::unbounded_channel();
        let heartbeat = TokioHeartbeat::new(runtime.clone(), config.heartbeat_interval(), tick_tx);

        let clock = Arc::clone(&io.clock);
        let engine = SyncEngine::new(
            options.local_id.clone(),
            options.initial_host_id.clone(),
            config.clone(),
            io,
            Arc::clone(&presence),
            Box::new(heartbeat),
        );

        let status = Arc::new(RwLock::new(SessionStatus {
            role: engine.role(),
            host_id: engine.host_id().to_string(),
            running: true,
        }));

        let (command_tx, commands) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let session_loop = SessionLoop {
            local_id: options.local_id.clone(),
            config,
            engine,
            presence: Arc::clone(&presence),
            successor,
            clock,
            status: Arc::clone(&status),
            updates: updates_tx,
            seen_revision: None,
            seen_role: None,
        };

        runtime.spawn(session_loop.run(inbound, commands, ticks));

        info!(
            "Session started for {} (host {})",
            options.local_id, options.initial_host_id
        );

        let handle = SessionHandle {
            local_id: options.local_id,
            command_tx,
            presence,
            status,
        };
        Ok((handle, updates_rx))
    }
}

struct Inbound {
    messages: mpsc::UnboundedReceiver<Vec<u8>>,
    player: mpsc::UnboundedReceiver<PlayerEvent>,
    participants: mpsc::UnboundedReceiver<ParticipantEvent>,
}

struct SessionLoop {
    local_id: String,
    config: SyncConfig,
    engine: SyncEngine,
    presence: SharedPresence,
    successor: Box<dyn SuccessorPolicy>,
    clock: Arc<dyn Clock>,
    status: Arc<RwLock<SessionStatus>>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    seen_revision: Option<u64>,
    seen_role: Option<(Role, String)>,
}

impl SessionLoop {
    async fn run(
        mut self,
        mut inbound: Inbound,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut ticks: mpsc::UnboundedReceiver<()>,
    ) {
        self.engine.start();
        self.publish();

        let sweep_interval = self.config.sweep_interval();
        let mut sweep =
            tokio::time::interval_at(tokio::time::Instant::now() + sweep_interval, sweep_interval);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::TransferHost { target, reply }) => {
                        let result = self
                            .engine
                            .initiate_handoff(&target)
                            .map_err(SessionError::from);
                        let _ = reply.send(result);
                    }
                    Some(SessionCommand::Stop) | None => break,
                },
                Some(()) = ticks.recv() => self.engine.heartbeat_tick(),
                Some(payload) = inbound.messages.recv() => self.engine.handle_payload(&payload),
                Some(event) = inbound.player.recv() => self.engine.handle_player_event(event),
                Some(event) = inbound.participants.recv() => self.handle_participant_event(event),
                _ = sweep.tick() => self.sweep(),
            }

            self.publish();
        }

        self.engine.stop();
        self.status.write().running = false;
        let _ = self.updates.send(SessionUpdate::Stopped);
        info!("Session stopped for {}", self.local_id);
    }

    fn handle_participant_event(&mut self, event: ParticipantEvent) {
        let now = self.clock.now_ms();

        match event {
            ParticipantEvent::Joined { id, display_name } => {
                info!("Participant joined: {} ({})", display_name, id);
                self.presence.write().upsert(
                    &id,
                    PresenceUpdate::display_name(display_name).with_activity(ActivityStatus::Active),
                    now,
                );
            }

            ParticipantEvent::Left { id } => {
                if id == self.local_id {
                    debug!("Ignoring leave notification for ourselves");
                    return;
                }

                info!("Participant left: {}", id);
                let remaining = {
                    let mut presence = self.presence.write();
                    presence.remove(&id);
                    presence.ids()
                };

                if id == self.engine.host_id() && !self.engine.is_host() {
                    self.handle_host_departure(&id, &remaining);
                }
            }
        }
    }

    fn handle_host_departure(&mut self, departed: &str, remaining: &[String]) {
        match self.successor.choose(departed, remaining) {
            Some(next) if next == self.local_id => {
                info!("Host {} left, we are the successor", departed);
                self.engine.assume_host(departed);
            }
            Some(next) => {
                info!("Host {} left, waiting for {} to take over", departed, next);
            }
            None => {
                warn!("Host {} left and no successor was chosen", departed);
            }
        }
    }

    fn sweep(&mut self) {
        let now = self.clock.now_ms();
        let changed = self.presence.write().stale_sweep(now);
        if !changed.is_empty() {
            debug!("Staleness sweep demoted {} participants", changed.len());
        }
        self.engine.check_host_timeout();
    }

    /// Mirror engine/presence state into the handle and notify listeners
    fn publish(&mut self) {
        let role = (self.engine.role(), self.engine.host_id().to_string());
        if self.seen_role.as_ref() != Some(&role) {
            {
                let mut status = self.status.write();
                status.role = role.0;
                status.host_id = role.1.clone();
            }
            let _ = self.updates.send(SessionUpdate::RoleChanged {
                role: role.0,
                host_id: role.1.clone(),
            });
            self.seen_role = Some(role);
        }

        let (revision, participants) = {
            let presence = self.presence.read();
            (presence.revision(), presence.all())
        };
        if self.seen_revision != Some(revision) {
            self.seen_revision = Some(revision);
            let _ = self.updates.send(SessionUpdate::PresenceChanged(participants));
        }
    }
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    local_id: String,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    presence: SharedPresence,
    status: Arc<RwLock<SessionStatus>>,
}

impl SessionHandle {
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn role(&self) -> Role {
        self.status.read().role
    }

    pub fn is_host(&self) -> bool {
        self.role() == Role::Host
    }

    /// Currently recognised host id
    pub fn host_id(&self) -> String {
        self.status.read().host_id.clone()
    }

    pub fn is_running(&self) -> bool {
        self.status.read().running
    }

    /// Participants sorted host first, then by display name
    pub fn participants(&self) -> Vec<Participant> {
        self.presence.read().all()
    }

    /// Hand the host role to `target` (host only)
    pub async fn transfer_host(&self, target: &str) -> Result<(), SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(SessionCommand::TransferHost {
                target: target.to_string(),
                reply,
            })
            .map_err(|_| SessionError::Stopped)?;
        reply_rx.await.map_err(|_| SessionError::Stopped)?
    }

    /// Stop the session. Safe to call repeatedly, including from callbacks.
    pub fn stop(&self) {
        if self.command_tx.send(SessionCommand::Stop).is_err() {
            debug!("Session already stopped");
        }
    }
}
