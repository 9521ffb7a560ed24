//! Gossipsub-backed [`Transport`]

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::external::{Transport, TransportError};

use super::behaviour::{NetworkError, NetworkEvent, NetworkHandle, NetworkManager};

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>>;

/// Publishes session envelopes on `watchsync/<session-id>` and fans inbound
/// payloads out to every subscriber
pub struct GossipTransport {
    handle: NetworkHandle,
    subscribers: Subscribers,
}

impl GossipTransport {
    /// Start `manager` on the current runtime and join `session_id`
    pub fn connect(manager: NetworkManager, session_id: &str) -> Result<Self, NetworkError> {
        let (handle, events) = manager.start()?;
        handle.join_session(session_id)?;
        Ok(Self::attach(handle, events))
    }

    /// Wrap an already running network. Must be called within a tokio runtime.
    pub fn attach(handle: NetworkHandle, mut events: mpsc::UnboundedReceiver<NetworkEvent>) -> Self {
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let pump_subscribers = Arc::clone(&subscribers);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    NetworkEvent::Ready { peer_id } => info!("Network ready as {}", peer_id),
                    NetworkEvent::Payload { from, data } => {
                        debug!("Inbound envelope from {}", from);
                        dispatch(&pump_subscribers, data);
                    }
                    NetworkEvent::PeerSubscribed { peer_id } => {
                        debug!("Peer {} joined the session topic", peer_id)
                    }
                    NetworkEvent::PeerUnsubscribed { peer_id } => {
                        debug!("Peer {} left the session topic", peer_id)
                    }
                    NetworkEvent::Error(e) => warn!("Network error: {}", e),
                }
            }
            debug!("Network event stream ended");
            pump_subscribers.lock().clear();
        });

        Self {
            handle,
            subscribers,
        }
    }

    pub fn local_peer_id(&self) -> &str {
        &self.handle.local_peer_id
    }

    /// Dial a peer by multiaddr, for sessions outside mDNS range
    pub fn dial(&self, multiaddr: &str) -> Result<(), NetworkError> {
        self.handle.dial_peer(multiaddr)
    }

    pub fn shutdown(&self) {
        self.handle.shutdown();
    }
}

impl Transport for GossipTransport {
    fn broadcast(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.handle.broadcast(payload).map_err(|e| match e {
            NetworkError::Closed => TransportError::Closed,
            other => TransportError::Send(other.to_string()),
        })
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}

impl Drop for GossipTransport {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

/// Deliver to live subscribers, pruning dropped ones
fn dispatch(subscribers: &Subscribers, data: Vec<u8>) {
    subscribers.lock().retain(|tx| tx.send(data.clone()).is_ok());
}
