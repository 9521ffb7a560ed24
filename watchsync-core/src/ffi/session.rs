//! Session implementation for FFI

use std::sync::{Arc, Once};

use parking_lot::RwLock;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::SyncConfig;
use crate::external::{SystemClock, Transport};
use crate::network::{GossipTransport, NetworkManager};
use crate::session::{Session, SessionHandle, SessionOptions, SessionUpdate};
use crate::sync::{Collaborators, Role};

use super::bridge::{BridgedPlayer, BridgedRoster, BridgedTransport};
use super::types::*;

static TRACING_INIT: Once = Once::new();

const LOG_DIRECTIVES: &[&str] = &[
    "watchsync_core=debug",
    "libp2p_mdns=info",
    "libp2p_gossipsub=info",
];

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let mut filter = EnvFilter::from_default_env();
        for directive in LOG_DIRECTIVES {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }

        // Another subscriber may already be installed by the embedding app
        let _ = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

type SharedObserver = Arc<RwLock<Option<Arc<dyn SessionObserver>>>>;

/// Main session interface.
///
/// The platform supplies player and message glue at construction, then pushes
/// inbound messages, player events and roster changes in. A session runs once:
/// after `stop` a new object is needed.
#[derive(uniffi::Object)]
pub struct WatchSession {
    runtime: Runtime,
    options: SessionOptions,
    messages: Arc<BridgedTransport>,
    player: Arc<BridgedPlayer>,
    roster: Arc<BridgedRoster>,
    observer: SharedObserver,
    handle: RwLock<Option<SessionHandle>>,
    network: RwLock<Option<Arc<GossipTransport>>>,
}

#[uniffi::export]
impl WatchSession {
    /// Create a new session
    #[uniffi::constructor]
    pub fn new(
        local_id: String,
        display_name: String,
        host_id: String,
        settings: Option<SyncSettings>,
        player: Box<dyn PlayerBridge>,
        messages: Box<dyn MessageBridge>,
    ) -> Result<Self, CoreError> {
        init_tracing();

        info!("Initializing watchsync session for {}", local_id);

        let runtime = Runtime::new().map_err(|e| CoreError::Runtime(e.to_string()))?;
        let config = settings
            .unwrap_or_default()
            .apply(SyncConfig::from_env())?;

        Ok(Self {
            runtime,
            options: SessionOptions {
                local_id,
                display_name,
                initial_host_id: host_id,
                config,
            },
            messages: Arc::new(BridgedTransport::new(messages)),
            player: Arc::new(BridgedPlayer::new(player)),
            roster: Arc::new(BridgedRoster::new()),
            observer: Arc::new(RwLock::new(None)),
            handle: RwLock::new(None),
            network: RwLock::new(None),
        })
    }

    /// Set the event observer
    pub fn set_observer(&self, observer: Box<dyn SessionObserver>) {
        *self.observer.write() = Some(Arc::from(observer));
    }

    /// Start using the platform's [`MessageBridge`] as transport
    pub fn start(&self) -> Result<(), CoreError> {
        let transport: Arc<dyn Transport> = self.messages.clone();
        self.launch(transport)
    }

    /// Start over libp2p gossipsub instead of the message bridge.
    ///
    /// Returns our local peer id.
    pub fn start_networked(&self, session_id: String) -> Result<String, CoreError> {
        if self.handle.read().is_some() {
            return Err(CoreError::AlreadyStarted);
        }

        let transport = self
            .runtime
            .block_on(async { GossipTransport::connect(NetworkManager::new(), &session_id) })
            .map_err(|e| CoreError::NetworkError(e.to_string()))?;
        let transport = Arc::new(transport);
        let peer_id = transport.local_peer_id().to_string();

        self.launch(transport.clone())?;
        *self.network.write() = Some(transport);

        info!("Session {} running over libp2p as {}", session_id, peer_id);
        Ok(peer_id)
    }

    /// Dial a peer by multiaddr (networked sessions only)
    pub fn dial_peer(&self, multiaddr: String) -> Result<(), CoreError> {
        let network = self.network.read();
        let transport = network.as_ref().ok_or(CoreError::NotStarted)?;
        transport
            .dial(&multiaddr)
            .map_err(|e| CoreError::NetworkError(e.to_string()))
    }

    /// Hand an inbound envelope received by the platform to the session
    pub fn deliver_message(&self, payload: Vec<u8>) {
        self.messages.deliver(payload);
    }

    pub fn player_event(&self, kind: PlayerEventKind) {
        self.player.emit(kind.into());
    }

    pub fn participant_joined(&self, id: String, display_name: String) {
        self.roster.joined(id, display_name);
    }

    pub fn participant_left(&self, id: String) {
        self.roster.left(id);
    }

    /// Hand the host role to another participant (host only)
    pub fn transfer_host(&self, target: String) -> Result<(), CoreError> {
        let handle = self.session_handle()?;
        self.runtime
            .block_on(handle.transfer_host(&target))
            .map_err(CoreError::from)
    }

    /// Stop the session. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.read().as_ref() {
            handle.stop();
        }
        if let Some(network) = self.network.read().as_ref() {
            network.shutdown();
        }
    }

    /// Participants sorted host first, then by display name
    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.handle
            .read()
            .as_ref()
            .map(|h| h.participants().iter().map(ParticipantInfo::from).collect())
            .unwrap_or_default()
    }

    pub fn is_host(&self) -> bool {
        self.handle
            .read()
            .as_ref()
            .is_some_and(|h| h.role() == Role::Host)
    }

    /// Currently recognised host id, once started
    pub fn host_id(&self) -> Option<String> {
        self.handle.read().as_ref().map(|h| h.host_id())
    }

    pub fn is_running(&self) -> bool {
        self.handle.read().as_ref().is_some_and(|h| h.is_running())
    }
}

impl WatchSession {
    fn session_handle(&self) -> Result<SessionHandle, CoreError> {
        self.handle.read().clone().ok_or(CoreError::NotStarted)
    }

    fn launch(&self, transport: Arc<dyn Transport>) -> Result<(), CoreError> {
        let mut slot = self.handle.write();
        if slot.is_some() {
            return Err(CoreError::AlreadyStarted);
        }

        let session = Session::new(
            self.options.clone(),
            Collaborators {
                transport,
                player: self.player.clone(),
                clock: Arc::new(SystemClock),
            },
            self.roster.clone(),
        );
        let (handle, mut updates) = session.start(self.runtime.handle())?;

        let observer = Arc::clone(&self.observer);
        self.runtime.spawn(async move {
            while let Some(update) = updates.recv().await {
                let Some(observer) = observer.read().clone() else {
                    debug!("No observer set, dropping {:?}", update);
                    continue;
                };

                match update {
                    SessionUpdate::RoleChanged { role, host_id } => {
                        observer.on_role_changed(role.into(), host_id);
                    }
                    SessionUpdate::PresenceChanged(participants) => {
                        observer.on_participants_changed(
                            participants.iter().map(ParticipantInfo::from).collect(),
                        );
                    }
                    SessionUpdate::Stopped => {
                        observer.on_stopped();
                    }
                }
            }
        });

        *slot = Some(handle);
        Ok(())
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("WatchSession dropped while running, stopping");
        }
        self.stop();
    }
}
