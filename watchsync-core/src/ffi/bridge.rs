//! Adapters from uniffi callback interfaces to the core collaborator traits

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::external::{
    ParticipantEvent, ParticipantSource, PlayerControl, PlayerError, PlayerEvent, Transport,
    TransportError,
};

use super::types::{MessageBridge, PlayerBridge};

/// Subscriber list shared by the push-style adapters below
pub(crate) struct Fanout<T> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> Fanout<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver to live subscribers, pruning dropped ones
    pub(crate) fn send(&self, item: T) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(item.clone()).is_ok());
    }
}

/// [`Transport`] that sends through a [`MessageBridge`] and receives whatever
/// the platform pushes into [`BridgedTransport::deliver`]
pub(crate) struct BridgedTransport {
    bridge: Box<dyn MessageBridge>,
    inbound: Fanout<Vec<u8>>,
}

impl BridgedTransport {
    pub(crate) fn new(bridge: Box<dyn MessageBridge>) -> Self {
        Self {
            bridge,
            inbound: Fanout::new(),
        }
    }

    pub(crate) fn deliver(&self, payload: Vec<u8>) {
        self.inbound.send(payload);
    }
}

impl Transport for BridgedTransport {
    fn broadcast(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.bridge.broadcast(payload) {
            Ok(())
        } else {
            Err(TransportError::Send("rejected by platform".to_string()))
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        self.inbound.subscribe()
    }
}

/// [`PlayerControl`] backed by a [`PlayerBridge`]
pub(crate) struct BridgedPlayer {
    bridge: Box<dyn PlayerBridge>,
    events: Fanout<PlayerEvent>,
}

impl BridgedPlayer {
    pub(crate) fn new(bridge: Box<dyn PlayerBridge>) -> Self {
        Self {
            bridge,
            events: Fanout::new(),
        }
    }

    pub(crate) fn emit(&self, event: PlayerEvent) {
        debug!("Player event from platform: {:?}", event);
        self.events.send(event);
    }
}

impl PlayerControl for BridgedPlayer {
    fn position_seconds(&self) -> f64 {
        self.bridge.position_seconds()
    }

    fn is_playing(&self) -> bool {
        self.bridge.is_playing()
    }

    fn seek(&self, seconds: f64) -> Result<(), PlayerError> {
        if self.bridge.seek(seconds) {
            Ok(())
        } else {
            Err(PlayerError::Rejected(format!("seek to {:.3}s", seconds)))
        }
    }

    fn play(&self) -> Result<(), PlayerError> {
        if self.bridge.play() {
            Ok(())
        } else {
            Err(PlayerError::Rejected("play".to_string()))
        }
    }

    fn pause(&self) -> Result<(), PlayerError> {
        if self.bridge.pause() {
            Ok(())
        } else {
            Err(PlayerError::Rejected("pause".to_string()))
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<PlayerEvent> {
        self.events.subscribe()
    }
}

/// Roster fed by platform join/leave calls
pub(crate) struct BridgedRoster {
    events: Fanout<ParticipantEvent>,
}

impl BridgedRoster {
    pub(crate) fn new() -> Self {
        Self {
            events: Fanout::new(),
        }
    }

    pub(crate) fn joined(&self, id: String, display_name: String) {
        self.events.send(ParticipantEvent::Joined { id, display_name });
    }

    pub(crate) fn left(&self, id: String) {
        self.events.send(ParticipantEvent::Left { id });
    }
}

impl ParticipantSource for BridgedRoster {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ParticipantEvent> {
        self.events.subscribe()
    }
}
