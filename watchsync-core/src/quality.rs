//! Network quality estimation from observed sync error
//!
//! Every accepted playback sync yields one sample: the absolute difference
//! between where the local player was and where the host says it should be.
//! Samples feed an exponentially weighted average which maps onto a coarse
//! quality tier, and the tier picks the drift tolerance.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::presence::{PresenceUpdate, SharedPresence};

/// Weight given to each new sample in the moving average
const EMA_ALPHA: f64 = 0.3;

/// Average error below which the link is Good (seconds)
const FAIR_THRESHOLD_SECS: f64 = 0.5;

/// Average error at or above which the link is Poor (seconds)
const POOR_THRESHOLD_SECS: f64 = 2.0;

/// Coarse link quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    #[default]
    Good,
    Fair,
    Poor,
}

impl NetworkQuality {
    /// Tier for an average sync error: `[0, 0.5)` Good, `[0.5, 2.0)` Fair, else Poor
    pub fn from_average_delta(average_delta_seconds: f64) -> Self {
        if average_delta_seconds < FAIR_THRESHOLD_SECS {
            NetworkQuality::Good
        } else if average_delta_seconds < POOR_THRESHOLD_SECS {
            NetworkQuality::Fair
        } else {
            NetworkQuality::Poor
        }
    }
}

/// Maximum drift (seconds) tolerated before a non-host seeks
pub fn tolerance_for(quality: NetworkQuality) -> f64 {
    match quality {
        NetworkQuality::Good => 0.5,
        NetworkQuality::Fair => 1.5,
        NetworkQuality::Poor => 3.0,
    }
}

/// Sync accounting for one (local client, host) pair
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SyncMetrics {
    pub attempts: u64,
    pub successes: u64,
    /// EMA of absolute sync error in seconds
    pub average_delta_seconds: f64,
    /// Time of the last recorded sample (ms since UNIX epoch)
    pub last_sync_at_ms: u64,
    pub network_quality: NetworkQuality,
}

impl SyncMetrics {
    fn record(&mut self, abs_delta_seconds: f64, was_within_tolerance: bool, now_ms: u64) {
        self.attempts = self.attempts.saturating_add(1);
        if was_within_tolerance {
            self.successes = self.successes.saturating_add(1);
        }
        self.average_delta_seconds =
            (1.0 - EMA_ALPHA) * self.average_delta_seconds + EMA_ALPHA * abs_delta_seconds.abs();
        self.last_sync_at_ms = now_ms;
        self.network_quality = NetworkQuality::from_average_delta(self.average_delta_seconds);
    }

    /// Fraction of attempts that landed within tolerance
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 1.0;
        }
        self.successes as f64 / self.attempts as f64
    }
}

/// Derives quality tiers and tolerances from sync samples
pub struct NetworkQualityEstimator {
    metrics: HashMap<String, SyncMetrics>,
    presence: SharedPresence,
}

impl NetworkQualityEstimator {
    pub fn new(presence: SharedPresence) -> Self {
        Self {
            metrics: HashMap::new(),
            presence,
        }
    }

    /// Record one sync sample and push the resulting tier into presence
    pub fn record_sample(
        &mut self,
        participant_id: &str,
        abs_delta_seconds: f64,
        was_within_tolerance: bool,
        now_ms: u64,
    ) -> SyncMetrics {
        let metrics = self.metrics.entry(participant_id.to_string()).or_default();
        metrics.record(abs_delta_seconds, was_within_tolerance, now_ms);
        let snapshot = *metrics;

        debug!(
            "Quality: {} sample={:.3}s within={} avg={:.3}s tier={:?} ({}/{})",
            participant_id,
            abs_delta_seconds,
            was_within_tolerance,
            snapshot.average_delta_seconds,
            snapshot.network_quality,
            snapshot.successes,
            snapshot.attempts
        );

        self.presence.write().upsert(
            participant_id,
            PresenceUpdate::network_quality(snapshot.network_quality),
            now_ms,
        );

        snapshot
    }

    pub fn metrics(&self, participant_id: &str) -> Option<&SyncMetrics> {
        self.metrics.get(participant_id)
    }

    /// Tolerance for syncing against `participant_id`.
    ///
    /// Falls back to `base_tolerance_secs` until a first sample exists.
    pub fn tolerance(&self, participant_id: &str, base_tolerance_secs: f64) -> f64 {
        self.metrics
            .get(participant_id)
            .map(|m| tolerance_for(m.network_quality))
            .unwrap_or(base_tolerance_secs)
    }

    /// Drop all metrics (session teardown)
    pub fn clear(&mut self) {
        self.metrics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::new_shared_presence;

    fn estimator() -> (NetworkQualityEstimator, SharedPresence) {
        let presence = new_shared_presence(120, 300);
        (NetworkQualityEstimator::new(presence.clone()), presence)
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(NetworkQuality::from_average_delta(0.0), NetworkQuality::Good);
        assert_eq!(NetworkQuality::from_average_delta(0.4999), NetworkQuality::Good);
        assert_eq!(NetworkQuality::from_average_delta(0.5), NetworkQuality::Fair);
        assert_eq!(NetworkQuality::from_average_delta(1.9999), NetworkQuality::Fair);
        assert_eq!(NetworkQuality::from_average_delta(2.0), NetworkQuality::Poor);
    }

    #[test]
    fn test_tolerance_lookup() {
        assert_eq!(tolerance_for(NetworkQuality::Good), 0.5);
        assert_eq!(tolerance_for(NetworkQuality::Fair), 1.5);
        assert_eq!(tolerance_for(NetworkQuality::Poor), 3.0);
    }

    #[test]
    fn test_ema_update_rule() {
        let (mut estimator, _) = estimator();
        let samples = [2.2, 0.1, 4.0, 0.0, 1.3, 0.7];
        let mut expected = 0.0;

        for (i, delta) in samples.iter().enumerate() {
            let metrics = estimator.record_sample("host", *delta, *delta <= 1.0, 1000 + i as u64);
            expected = 0.7 * expected + 0.3 * delta;
            assert!((metrics.average_delta_seconds - expected).abs() < 1e-12);
            assert_eq!(metrics.network_quality, NetworkQuality::from_average_delta(expected));
        }

        let metrics = estimator.metrics("host").unwrap();
        assert_eq!(metrics.attempts, 6);
        assert_eq!(metrics.successes, 4);
        assert_eq!(metrics.last_sync_at_ms, 1005);
    }

    #[test]
    fn test_negative_delta_uses_magnitude() {
        let (mut estimator, _) = estimator();
        let metrics = estimator.record_sample("host", -1.0, false, 0);
        assert!((metrics.average_delta_seconds - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_quality_pushed_into_presence() {
        let (mut estimator, presence) = estimator();
        // 0.3 * 7.0 = 2.1 -> Poor
        estimator.record_sample("host", 7.0, false, 0);
        assert_eq!(
            presence.read().get("host").map(|p| p.network_quality),
            Some(NetworkQuality::Poor)
        );
    }

    #[test]
    fn test_tolerance_falls_back_to_base() {
        let (mut estimator, _) = estimator();
        assert_eq!(estimator.tolerance("host", 2.0), 2.0);

        // 0.3 * 3.0 = 0.9 -> Fair
        estimator.record_sample("host", 3.0, false, 0);
        assert_eq!(estimator.tolerance("host", 2.0), 1.5);
    }

    #[test]
    fn test_success_rate() {
        let mut metrics = SyncMetrics::default();
        assert_eq!(metrics.success_rate(), 1.0);
        metrics.record(0.1, true, 0);
        metrics.record(5.0, false, 0);
        assert_eq!(metrics.success_rate(), 0.5);
    }
}
