//! Sync Configuration
//!
//! Only the heartbeat interval and the base tolerance are read from the
//! environment; everything else is a fixed default that callers may override
//! in code.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Env var overriding [`SyncConfig::heartbeat_interval_ms`]
pub const HEARTBEAT_ENV: &str = "WATCHSYNC_HEARTBEAT_MS";

/// Env var overriding [`SyncConfig::base_tolerance_secs`]
pub const TOLERANCE_ENV: &str = "WATCHSYNC_SYNC_TOLERANCE_SECS";

/// Rejected configuration values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("base_tolerance_secs must be a positive number, got {0}")]
    InvalidTolerance(String),
}

/// Tunables for a sync session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between host heartbeats
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Tolerance used before any sync samples exist for the current host
    #[serde(default = "default_base_tolerance_secs")]
    pub base_tolerance_secs: f64,

    /// Seconds without activity before a participant is Inactive
    #[serde(default = "default_inactive_after_secs")]
    pub inactive_after_secs: u64,

    /// Seconds without activity before a participant is Away
    #[serde(default = "default_away_after_secs")]
    pub away_after_secs: u64,

    /// Silence from the host after which a non-host asks for a resync
    #[serde(default = "default_host_timeout_ms")]
    pub host_timeout_ms: u64,

    /// Cadence of the staleness sweep and host-timeout check
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

fn default_base_tolerance_secs() -> f64 {
    2.0
}

fn default_inactive_after_secs() -> u64 {
    120
}

fn default_away_after_secs() -> u64 {
    300
}

fn default_host_timeout_ms() -> u64 {
    15_000
}

fn default_sweep_interval_ms() -> u64 {
    10_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            base_tolerance_secs: default_base_tolerance_secs(),
            inactive_after_secs: default_inactive_after_secs(),
            away_after_secs: default_away_after_secs(),
            host_timeout_ms: default_host_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(HEARTBEAT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.heartbeat_interval_ms = ms,
                _ => warn!("Ignoring invalid {}={:?}", HEARTBEAT_ENV, raw),
            }
        }

        if let Some(raw) = lookup(TOLERANCE_ENV) {
            match raw.trim().parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs > 0.0 => config.base_tolerance_secs = secs,
                _ => warn!("Ignoring invalid {}={:?}", TOLERANCE_ENV, raw),
            }
        }

        config
    }

    /// Check values that `from_lookup` cannot vouch for: configs built in
    /// code, deserialized, or overridden from the FFI layer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("host_timeout_ms", self.host_timeout_ms),
        ];
        for (name, ms) in intervals {
            if ms == 0 {
                return Err(ConfigError::ZeroInterval(name));
            }
        }

        if !self.base_tolerance_secs.is_finite() || self.base_tolerance_secs <= 0.0 {
            return Err(ConfigError::InvalidTolerance(
                self.base_tolerance_secs.to_string(),
            ));
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
