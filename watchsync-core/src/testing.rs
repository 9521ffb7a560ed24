//! In-memory collaborators for unit tests

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::external::{
    Clock, ParticipantEvent, ParticipantSource, PlayerControl, PlayerError, PlayerEvent, Transport,
    TransportError,
};
use crate::sync::{HeartbeatTimer, SyncMessage};

/// Clock that only moves when told to
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Transport that records outbound payloads and lets tests inject inbound ones
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoded outbound messages, oldest first
    pub fn sent(&self) -> Vec<SyncMessage> {
        self.sent
            .lock()
            .iter()
            .filter_map(|bytes| SyncMessage::decode(bytes).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Deliver a message to every subscriber
    pub fn deliver(&self, message: &SyncMessage) {
        if let Ok(bytes) = message.encode() {
            self.deliver_raw(bytes);
        }
    }

    pub fn deliver_raw(&self, bytes: Vec<u8>) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(bytes.clone()).is_ok());
    }
}

impl Transport for RecordingTransport {
    fn broadcast(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Send("simulated failure".to_string()));
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}

#[derive(Default)]
struct PlayerState {
    position: f64,
    playing: bool,
    seeks: Vec<f64>,
    play_calls: usize,
    pause_calls: usize,
    reject_seeks: bool,
}

/// Player whose seek/play/pause mutate in-memory state
#[derive(Default)]
pub struct FakePlayer {
    state: Mutex<PlayerState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PlayerEvent>>>,
}

impl FakePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position(&self, seconds: f64) {
        self.state.lock().position = seconds;
    }

    pub fn set_playing(&self, playing: bool) {
        self.state.lock().playing = playing;
    }

    pub fn reject_seeks(&self, reject: bool) {
        self.state.lock().reject_seeks = reject;
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.state.lock().seeks.clone()
    }

    pub fn play_calls(&self) -> usize {
        self.state.lock().play_calls
    }

    pub fn pause_calls(&self) -> usize {
        self.state.lock().pause_calls
    }

    pub fn emit(&self, event: PlayerEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event).is_ok());
    }
}

impl PlayerControl for FakePlayer {
    fn position_seconds(&self) -> f64 {
        self.state.lock().position
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn seek(&self, seconds: f64) -> Result<(), PlayerError> {
        let mut state = self.state.lock();
        if state.reject_seeks {
            return Err(PlayerError::Rejected("seek disabled".to_string()));
        }
        state.position = seconds;
        state.seeks.push(seconds);
        Ok(())
    }

    fn play(&self) -> Result<(), PlayerError> {
        let mut state = self.state.lock();
        state.playing = true;
        state.play_calls += 1;
        Ok(())
    }

    fn pause(&self) -> Result<(), PlayerError> {
        let mut state = self.state.lock();
        state.playing = false;
        state.pause_calls += 1;
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<PlayerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}

/// Participant roster driven by the test
#[derive(Default)]
pub struct FakeRoster {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ParticipantEvent>>>,
}

impl FakeRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, id: &str, display_name: &str) {
        self.emit(ParticipantEvent::Joined {
            id: id.to_string(),
            display_name: display_name.to_string(),
        });
    }

    pub fn leave(&self, id: &str) {
        self.emit(ParticipantEvent::Left { id: id.to_string() });
    }

    fn emit(&self, event: ParticipantEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl ParticipantSource for FakeRoster {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ParticipantEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}

/// Timer that only records whether it is running
#[derive(Clone, Default)]
pub struct ManualTimer {
    running: Arc<AtomicBool>,
    starts: Arc<AtomicUsize>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl HeartbeatTimer for ManualTimer {
    fn start(&mut self) {
        self.running.store(true, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
