//! Heartbeat timer
//!
//! The host re-broadcasts its state on a fixed interval. The timer only emits
//! ticks; the engine decides what a tick means for its current role.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Periodic heartbeat source owned by the [`SyncEngine`](super::SyncEngine)
pub trait HeartbeatTimer: Send {
    /// Start ticking. Restarts if already running.
    fn start(&mut self);

    /// Stop ticking. No-op when not running.
    fn cancel(&mut self);

    fn is_running(&self) -> bool;
}

/// Tokio task that sends a unit tick into a channel on every interval
pub struct TokioHeartbeat {
    runtime: Handle,
    interval: Duration,
    tick_tx: mpsc::UnboundedSender<()>,
    /// Handle for cancelling the running tick loop
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl TokioHeartbeat {
    pub fn new(runtime: Handle, interval: Duration, tick_tx: mpsc::UnboundedSender<()>) -> Self {
        Self {
            runtime,
            interval,
            tick_tx,
            cancel_tx: None,
        }
    }
}

impl HeartbeatTimer for TokioHeartbeat {
    fn start(&mut self) {
        // Stop any existing loop first
        self.cancel();

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.cancel_tx = Some(cancel_tx);

        let tick_tx = self.tick_tx.clone();
        let interval = self.interval;

        self.runtime.spawn(async move {
            debug!("Heartbeat loop started ({:?})", interval);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = ticker.tick() => {
                        if tick_tx.send(()).is_err() {
                            break;
                        }
                    }
                }
            }

            debug!("Heartbeat loop ended");
        });
    }

    fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }

    fn is_running(&self) -> bool {
        self.cancel_tx
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

impl Drop for TokioHeartbeat {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_cancelled() {
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel();
        let mut timer = TokioHeartbeat::new(Handle::current(), Duration::from_millis(5000), tick_tx);

        timer.start();
        assert!(timer.is_running());

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert!(tick_rx.try_recv().is_ok());
        assert!(tick_rx.try_recv().is_ok());
        assert!(tick_rx.try_recv().is_err());

        timer.cancel();
        assert!(!timer.is_running());
        tokio::time::sleep(Duration::from_millis(20_000)).await;
        assert!(tick_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let (tick_tx, _tick_rx) = mpsc::unbounded_channel();
        let mut timer = TokioHeartbeat::new(Handle::current(), Duration::from_millis(100), tick_tx);

        timer.cancel();
        timer.start();
        timer.cancel();
        timer.cancel();
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_loop() {
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel();
        let mut timer = TokioHeartbeat::new(Handle::current(), Duration::from_millis(1000), tick_tx);

        timer.start();
        timer.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // Only one loop is alive after a restart
        assert!(tick_rx.try_recv().is_ok());
        assert!(tick_rx.try_recv().is_err());
    }
}
