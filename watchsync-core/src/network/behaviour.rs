//! libp2p Network Behaviour
//!
//! Implements the peer-to-peer session transport using libp2p with:
//! - mDNS for local network discovery
//! - TCP + QUIC transports for connectivity
//! - Gossipsub for fan-out of session envelopes

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, identity, mdns, noise, ping,
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Gossipsub topic prefix; the session id is appended
pub const TOPIC_PREFIX: &str = "watchsync/";

const PROTOCOL_VERSION: &str = "/watchsync/1.0.0";

/// Gossipsub topic carrying one session's envelopes
pub fn session_topic(session_id: &str) -> gossipsub::IdentTopic {
    gossipsub::IdentTopic::new(format!("{}{}", TOPIC_PREFIX, session_id))
}

/// Network configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Whether to enable mDNS for local network discovery
    pub enable_mdns: bool,
    /// Addresses to listen on
    pub listen_addresses: Vec<String>,
    /// Peers dialed on startup (full multiaddrs)
    pub bootstrap_peers: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enable_mdns: true,
            listen_addresses: vec![
                "/ip4/0.0.0.0/tcp/0".to_string(),
                "/ip4/0.0.0.0/udp/0/quic-v1".to_string(),
            ],
            bootstrap_peers: Vec::new(),
        }
    }
}

/// Network-related errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to create transport: {0}")]
    Transport(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Already in a session")]
    AlreadyInSession,

    #[error("Not in a session")]
    NotInSession,

    #[error("libp2p error: {0}")]
    Libp2p(String),

    #[error("Network task closed")]
    Closed,
}

/// Combined network behaviour
#[derive(NetworkBehaviour)]
pub struct WatchBehaviour {
    /// Ping for connection keep-alive
    ping: ping::Behaviour,
    /// mDNS for local network discovery
    mdns: Toggle<mdns::tokio::Behaviour>,
    /// Peer identification
    identify: identify::Behaviour,
    /// Pub/sub for session messages
    gossipsub: gossipsub::Behaviour,
}

/// Events emitted by the network manager
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// Network is ready (listening)
    Ready { peer_id: String },
    /// Raw envelope received on the session topic
    Payload { from: String, data: Vec<u8> },
    /// A peer subscribed to our session topic
    PeerSubscribed { peer_id: String },
    /// A peer unsubscribed from our session topic
    PeerUnsubscribed { peer_id: String },
    /// Error occurred
    Error(String),
}

/// Commands sent to the network manager
#[derive(Debug)]
pub enum NetworkCommand {
    /// Subscribe to a session's topic
    JoinSession { session_id: String },
    /// Unsubscribe from the current session
    LeaveSession,
    /// Publish an envelope on the session topic
    Broadcast { payload: Vec<u8> },
    /// Dial a peer directly by multiaddr (for manual connection)
    DialPeer { multiaddr: String },
    /// Shutdown the network
    Shutdown,
}

/// Handle to communicate with the running network
#[derive(Clone)]
pub struct NetworkHandle {
    command_tx: mpsc::UnboundedSender<NetworkCommand>,
    pub local_peer_id: String,
}

impl NetworkHandle {
    #[cfg(test)]
    pub(crate) fn detached(
        local_peer_id: &str,
    ) -> (Self, mpsc::UnboundedReceiver<NetworkCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = Self {
            command_tx,
            local_peer_id: local_peer_id.to_string(),
        };
        (handle, command_rx)
    }

    fn send(&self, command: NetworkCommand) -> Result<(), NetworkError> {
        self.command_tx
            .send(command)
            .map_err(|_| NetworkError::Closed)
    }

    pub fn join_session(&self, session_id: &str) -> Result<(), NetworkError> {
        self.send(NetworkCommand::JoinSession {
            session_id: session_id.to_string(),
        })
    }

    pub fn leave_session(&self) -> Result<(), NetworkError> {
        self.send(NetworkCommand::LeaveSession)
    }

    pub fn broadcast(&self, payload: Vec<u8>) -> Result<(), NetworkError> {
        self.send(NetworkCommand::Broadcast { payload })
    }

    pub fn dial_peer(&self, multiaddr: &str) -> Result<(), NetworkError> {
        multiaddr
            .parse::<Multiaddr>()
            .map_err(|e| NetworkError::InvalidAddress(format!("{}: {}", multiaddr, e)))?;
        self.send(NetworkCommand::DialPeer {
            multiaddr: multiaddr.to_string(),
        })
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(NetworkCommand::Shutdown);
    }
}

/// Manages P2P networking - runs in a background task
pub struct NetworkManager {
    /// Our local peer ID
    local_peer_id: PeerId,
    /// Our keypair
    keypair: identity::Keypair,
    /// Network configuration
    config: NetworkConfig,
    /// Peers discovered via mDNS
    discovered_peers: HashSet<PeerId>,
    /// Current session topic (if joined)
    session_topic: Option<gossipsub::IdentTopic>,
    /// Peers subscribed to our session topic
    session_peers: HashSet<PeerId>,
}

impl NetworkManager {
    /// Create a new network manager with default config
    pub fn new() -> Self {
        Self::with_config(NetworkConfig::default())
    }

    /// Create a new network manager with custom config
    pub fn with_config(config: NetworkConfig) -> Self {
        let keypair = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(keypair.public());

        info!("Local peer ID: {}", local_peer_id);

        Self {
            local_peer_id,
            keypair,
            config,
            discovered_peers: HashSet::new(),
            session_topic: None,
            session_peers: HashSet::new(),
        }
    }

    /// Get our local peer ID as string
    pub fn local_peer_id_string(&self) -> String {
        self.local_peer_id.to_string()
    }

    /// Start the network on the current tokio runtime and return a handle
    pub fn start(
        self,
    ) -> Result<(NetworkHandle, mpsc::UnboundedReceiver<NetworkEvent>), NetworkError> {
        let runtime = Handle::try_current().map_err(|e| NetworkError::Transport(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = NetworkHandle {
            command_tx,
            local_peer_id: self.local_peer_id.to_string(),
        };

        runtime.spawn(async move {
            if let Err(e) = self.run(event_tx.clone(), command_rx).await {
                warn!("Network task error: {}", e);
                let _ = event_tx.send(NetworkEvent::Error(e.to_string()));
            }
        });

        Ok((handle, event_rx))
    }

    /// Create the libp2p swarm
    fn create_swarm(&self) -> Result<Swarm<WatchBehaviour>, NetworkError> {
        let enable_mdns = self.config.enable_mdns;

        let swarm = libp2p::SwarmBuilder::with_existing_identity(self.keypair.clone())
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_quic()
            .with_dns()
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_behaviour(|keypair| {
                let ping = ping::Behaviour::new(
                    ping::Config::new()
                        .with_interval(Duration::from_secs(15))
                        .with_timeout(Duration::from_secs(20)),
                );

                let mdns = if enable_mdns {
                    Some(mdns::tokio::Behaviour::new(
                        mdns::Config::default(),
                        keypair.public().to_peer_id(),
                    )?)
                } else {
                    None
                };

                // Small sessions: mesh_outbound_min <= mesh_n_low <= mesh_n <= mesh_n_high
                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .mesh_outbound_min(0)
                    .mesh_n_low(1)
                    .mesh_n(3)
                    .mesh_n_high(6)
                    .gossip_lazy(3)
                    .build()
                    .map_err(|e| e.to_string())?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(keypair.clone()),
                    gossipsub_config,
                )?;

                let identify = identify::Behaviour::new(identify::Config::new(
                    PROTOCOL_VERSION.into(),
                    keypair.public(),
                ));

                Ok(WatchBehaviour {
                    ping,
                    mdns: Toggle::from(mdns),
                    identify,
                    gossipsub,
                })
            })
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(300)))
            .build();

        Ok(swarm)
    }

    /// Run the network event loop
    async fn run(
        mut self,
        event_tx: mpsc::UnboundedSender<NetworkEvent>,
        mut command_rx: mpsc::UnboundedReceiver<NetworkCommand>,
    ) -> Result<(), NetworkError> {
        let mut swarm = self.create_swarm()?;

        for addr in &self.config.listen_addresses {
            match addr.parse::<Multiaddr>() {
                Ok(addr) => match swarm.listen_on(addr.clone()) {
                    Ok(id) => info!("Listener {:?} started on {}", id, addr),
                    Err(e) => warn!("Failed to listen on {}: {:?}", addr, e),
                },
                Err(e) => warn!("Invalid listen address {}: {}", addr, e),
            }
        }

        for addr in &self.config.bootstrap_peers {
            dial(&mut swarm, addr);
        }

        let _ = event_tx.send(NetworkEvent::Ready {
            peer_id: self.local_peer_id.to_string(),
        });

        loop {
            tokio::select! {
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(&mut swarm, event, &event_tx);
                }

                cmd = command_rx.recv() => {
                    match cmd {
                        Some(NetworkCommand::JoinSession { session_id }) => {
                            if let Err(e) = self.join_session(&mut swarm, &session_id) {
                                let _ = event_tx.send(NetworkEvent::Error(e.to_string()));
                            }
                        }
                        Some(NetworkCommand::LeaveSession) => {
                            self.leave_session(&mut swarm);
                        }
                        Some(NetworkCommand::Broadcast { payload }) => {
                            if let Err(e) = self.broadcast(&mut swarm, payload) {
                                debug!("Broadcast error (may be no peers yet): {}", e);
                            }
                        }
                        Some(NetworkCommand::DialPeer { multiaddr }) => {
                            dial(&mut swarm, &multiaddr);
                        }
                        Some(NetworkCommand::Shutdown) | None => {
                            info!("Network shutting down");
                            self.leave_session(&mut swarm);
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_swarm_event(
        &mut self,
        swarm: &mut Swarm<WatchBehaviour>,
        event: SwarmEvent<WatchBehaviourEvent>,
        event_tx: &mpsc::UnboundedSender<NetworkEvent>,
    ) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}/p2p/{}", address, self.local_peer_id);
            }

            SwarmEvent::Behaviour(WatchBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                for (peer_id, addr) in peers {
                    if peer_id == self.local_peer_id {
                        continue;
                    }
                    if self.discovered_peers.insert(peer_id) {
                        info!("mDNS discovered peer: {} at {}", peer_id, addr);
                    }
                    swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                    if swarm.dial(addr).is_ok() {
                        debug!("Dialing discovered peer {}", peer_id);
                    }
                }
            }

            SwarmEvent::Behaviour(WatchBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                for (peer_id, _) in peers {
                    debug!("mDNS peer expired: {}", peer_id);
                    self.discovered_peers.remove(&peer_id);
                }
            }

            SwarmEvent::Behaviour(WatchBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                let on_topic = self
                    .session_topic
                    .as_ref()
                    .is_some_and(|topic| topic.hash() == message.topic);
                if on_topic {
                    let from = message
                        .source
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| propagation_source.to_string());
                    debug!("Received {} bytes from {}", message.data.len(), from);
                    let _ = event_tx.send(NetworkEvent::Payload {
                        from,
                        data: message.data,
                    });
                }
            }

            SwarmEvent::Behaviour(WatchBehaviourEvent::Gossipsub(
                gossipsub::Event::Subscribed { peer_id, topic },
            )) => {
                if let Some(our_topic) = &self.session_topic {
                    if topic == our_topic.hash() {
                        info!("Peer {} subscribed to session", peer_id);
                        self.session_peers.insert(peer_id);
                        let _ = event_tx.send(NetworkEvent::PeerSubscribed {
                            peer_id: peer_id.to_string(),
                        });
                    }
                }
            }

            SwarmEvent::Behaviour(WatchBehaviourEvent::Gossipsub(
                gossipsub::Event::Unsubscribed { peer_id, topic },
            )) => {
                if let Some(our_topic) = &self.session_topic {
                    if topic == our_topic.hash() && self.session_peers.remove(&peer_id) {
                        info!("Peer {} unsubscribed from session", peer_id);
                        let _ = event_tx.send(NetworkEvent::PeerUnsubscribed {
                            peer_id: peer_id.to_string(),
                        });
                    }
                }
            }

            SwarmEvent::Behaviour(WatchBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!(
                    "Identified peer {} running {} with {} protocols",
                    peer_id,
                    info.protocol_version,
                    info.protocols.len()
                );
            }

            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                info!("Connection established with {} via {:?}", peer_id, endpoint);
                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                debug!("Connection closed with {}", peer_id);
                if num_established == 0 && self.session_peers.remove(&peer_id) {
                    let _ = event_tx.send(NetworkEvent::PeerUnsubscribed {
                        peer_id: peer_id.to_string(),
                    });
                }
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                if let Some(peer) = peer_id {
                    warn!("Failed to connect to {}: {}", peer, error);
                } else {
                    warn!("Outgoing connection error: {}", error);
                }
            }

            SwarmEvent::ListenerError { listener_id, error } => {
                warn!("Listener {} error: {}", listener_id, error);
            }

            _ => {}
        }
    }

    /// Subscribe to a session's topic
    fn join_session(
        &mut self,
        swarm: &mut Swarm<WatchBehaviour>,
        session_id: &str,
    ) -> Result<(), NetworkError> {
        if self.session_topic.is_some() {
            return Err(NetworkError::AlreadyInSession);
        }

        let topic = session_topic(session_id);
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;

        info!("Joined session topic {}", topic);
        self.session_topic = Some(topic);
        self.session_peers.clear();
        Ok(())
    }

    /// Leave the current session
    fn leave_session(&mut self, swarm: &mut Swarm<WatchBehaviour>) {
        if let Some(topic) = self.session_topic.take() {
            let _ = swarm.behaviour_mut().gossipsub.unsubscribe(&topic);
            info!("Left session topic {}", topic);
        }
        self.session_peers.clear();
    }

    /// Publish an envelope to the session
    fn broadcast(
        &self,
        swarm: &mut Swarm<WatchBehaviour>,
        payload: Vec<u8>,
    ) -> Result<(), NetworkError> {
        let topic = self
            .session_topic
            .as_ref()
            .ok_or(NetworkError::NotInSession)?;
        swarm
            .behaviour_mut()
            .gossipsub
            .publish(topic.clone(), payload)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;
        Ok(())
    }
}

impl Default for NetworkManager {
    fn default() -> Self {
        Self::new()
    }
}

fn dial(swarm: &mut Swarm<WatchBehaviour>, multiaddr: &str) {
    match multiaddr.parse::<Multiaddr>() {
        Ok(addr) => {
            info!("Dialing peer at {}", addr);
            if let Err(e) = swarm.dial(addr) {
                warn!("Failed to dial peer: {}", e);
            }
        }
        Err(e) => warn!("Invalid multiaddr {}: {}", multiaddr, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_topic_naming() {
        assert_eq!(session_topic("movie-night").to_string(), "watchsync/movie-night");
        assert_ne!(session_topic("a").hash(), session_topic("b").hash());
    }

    #[test]
    fn test_default_config_listens_on_tcp_and_quic() {
        let config = NetworkConfig::default();
        assert!(config.enable_mdns);
        assert!(config
            .listen_addresses
            .iter()
            .all(|a| a.parse::<Multiaddr>().is_ok()));
        assert!(config.listen_addresses.iter().any(|a| a.contains("quic-v1")));
    }

    #[test]
    fn test_handle_reports_closed_network() {
        let (handle, command_rx) = NetworkHandle::detached("peer");
        handle.broadcast(b"x".to_vec()).unwrap();
        drop(command_rx);

        assert!(matches!(
            handle.broadcast(b"y".to_vec()),
            Err(NetworkError::Closed)
        ));
        assert!(matches!(handle.join_session("s"), Err(NetworkError::Closed)));
        assert!(matches!(
            handle.dial_peer("not an address"),
            Err(NetworkError::InvalidAddress(_))
        ));
        handle.shutdown();
    }

    #[test]
    fn test_manager_peer_id_is_stable() {
        let manager = NetworkManager::new();
        assert_eq!(manager.local_peer_id_string(), manager.local_peer_id.to_string());
    }

    #[test]
    fn test_start_requires_runtime() {
        assert!(matches!(
            NetworkManager::new().start(),
            Err(NetworkError::Transport(_))
        ));
    }
}
