//! Presence Store
//!
//! In-memory record of every participant in the session: identity, activity,
//! last known playback snapshot and network quality. Other components only
//! ever mutate it through [`PresenceStore::upsert`], [`PresenceStore::remove`],
//! [`PresenceStore::set_host`] and [`PresenceStore::stale_sweep`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::quality::NetworkQuality;

/// How recently a participant interacted with the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActivityStatus {
    // Declared most-active first so that `Ord` ranks demotions upward
    Active,
    Inactive,
    Away,
}

/// Last known playback state of a participant
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub position_seconds: f64,
    pub buffering: bool,
    pub seeking: bool,
}

/// One connected user
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    /// Stable platform user id
    pub id: String,
    /// Display name (UI only)
    pub display_name: String,
    /// Whether this participant is the recognised host
    pub is_host: bool,
    pub activity_status: ActivityStatus,
    pub playback: Option<PlaybackSnapshot>,
    pub network_quality: NetworkQuality,
    /// Last observed interaction (ms since UNIX epoch)
    pub last_active_at_ms: u64,
}

/// Partial update merged into a [`Participant`] by [`PresenceStore::upsert`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceUpdate {
    pub display_name: Option<String>,
    pub activity_status: Option<ActivityStatus>,
    pub playback: Option<PlaybackSnapshot>,
    pub network_quality: Option<NetworkQuality>,
}

impl PresenceUpdate {
    pub fn display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn active() -> Self {
        Self {
            activity_status: Some(ActivityStatus::Active),
            ..Self::default()
        }
    }

    pub fn playback(snapshot: PlaybackSnapshot) -> Self {
        Self {
            playback: Some(snapshot),
            ..Self::default()
        }
    }

    pub fn network_quality(quality: NetworkQuality) -> Self {
        Self {
            network_quality: Some(quality),
            ..Self::default()
        }
    }

    pub fn with_activity(mut self, status: ActivityStatus) -> Self {
        self.activity_status = Some(status);
        self
    }
}

/// Participant records keyed by id
#[derive(Debug)]
pub struct PresenceStore {
    participants: HashMap<String, Participant>,
    host_id: Option<String>,
    inactive_after_ms: u64,
    away_after_ms: u64,
    /// Bumped on every mutation
    revision: u64,
}

impl PresenceStore {
    pub fn new(inactive_after_secs: u64, away_after_secs: u64) -> Self {
        Self {
            participants: HashMap::new(),
            host_id: None,
            inactive_after_ms: inactive_after_secs * 1000,
            away_after_ms: away_after_secs * 1000,
            revision: 0,
        }
    }

    /// Merge `update` into the record for `id`, creating it if needed.
    ///
    /// New records start Active, with `is_host` derived from the current host
    /// id and `last_active_at_ms = now_ms`. On existing records the activity
    /// timestamp only moves when the caller supplies an activity status.
    pub fn upsert(&mut self, id: &str, update: PresenceUpdate, now_ms: u64) -> &Participant {
        let is_host = self.host_id.as_deref() == Some(id);
        self.revision += 1;
        let participant = self
            .participants
            .entry(id.to_string())
            .or_insert_with(|| Participant {
                id: id.to_string(),
                display_name: id.to_string(),
                is_host,
                activity_status: ActivityStatus::Active,
                playback: None,
                network_quality: NetworkQuality::Good,
                last_active_at_ms: now_ms,
            });

        if let Some(name) = update.display_name {
            participant.display_name = name;
        }
        if let Some(status) = update.activity_status {
            participant.activity_status = status;
            participant.last_active_at_ms = now_ms;
        }
        if let Some(playback) = update.playback {
            participant.playback = Some(playback);
        }
        if let Some(quality) = update.network_quality {
            participant.network_quality = quality;
        }

        participant
    }

    /// Remove a participant
    pub fn remove(&mut self, id: &str) -> Option<Participant> {
        let removed = self.participants.remove(id);
        if removed.is_some() {
            self.revision += 1;
        }
        removed
    }

    /// Record which participant is host and flip `is_host` flags to match
    pub fn set_host(&mut self, host_id: &str) {
        self.host_id = Some(host_id.to_string());
        self.revision += 1;
        for participant in self.participants.values_mut() {
            participant.is_host = participant.id == host_id;
        }
    }

    /// Mutation counter, for cheap change detection
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn host_id(&self) -> Option<&str> {
        self.host_id.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.participants.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.participants.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Snapshot of all participants (host first, then by display name)
    pub fn all(&self) -> Vec<Participant> {
        let mut list: Vec<Participant> = self.participants.values().cloned().collect();
        list.sort_by(|a, b| match (a.is_host, b.is_host) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a
                .display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id)),
        });
        list
    }

    /// Demote activity status of idle participants.
    ///
    /// Never promotes. Returns the participants whose status changed.
    pub fn stale_sweep(&mut self, now_ms: u64) -> Vec<(String, ActivityStatus)> {
        let mut changed = Vec::new();

        for participant in self.participants.values_mut() {
            let idle_ms = now_ms.saturating_sub(participant.last_active_at_ms);
            let target = if idle_ms >= self.away_after_ms {
                ActivityStatus::Away
            } else if idle_ms >= self.inactive_after_ms {
                ActivityStatus::Inactive
            } else {
                ActivityStatus::Active
            };

            if target > participant.activity_status {
                debug!(
                    "Presence: {} {:?} -> {:?} (idle {}s)",
                    participant.id,
                    participant.activity_status,
                    target,
                    idle_ms / 1000
                );
                participant.activity_status = target;
                changed.push((participant.id.clone(), target));
            }
        }

        if !changed.is_empty() {
            self.revision += 1;
        }
        changed
    }
}

/// Presence store shared between the engine, estimator and coordinator
pub type SharedPresence = Arc<RwLock<PresenceStore>>;

/// Create a new shared presence store
pub fn new_shared_presence(inactive_after_secs: u64, away_after_secs: u64) -> SharedPresence {
    Arc::new(RwLock::new(PresenceStore::new(inactive_after_secs, away_after_secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_000_000;

    fn store() -> PresenceStore {
        PresenceStore::new(120, 300)
    }

    #[test]
    fn test_upsert_creates_with_defaults() {
        let mut store = store();
        store.set_host("host");

        let host = store.upsert("host", PresenceUpdate::default(), T0).clone();
        assert!(host.is_host);
        assert_eq!(host.activity_status, ActivityStatus::Active);
        assert_eq!(host.network_quality, NetworkQuality::Good);
        assert_eq!(host.last_active_at_ms, T0);
        assert_eq!(host.playback, None);

        let guest = store.upsert("guest", PresenceUpdate::display_name("Guest"), T0);
        assert!(!guest.is_host);
        assert_eq!(guest.display_name, "Guest");
    }

    #[test]
    fn test_last_active_only_moves_with_explicit_status() {
        let mut store = store();
        store.upsert("a", PresenceUpdate::default(), T0);

        store.upsert("a", PresenceUpdate::network_quality(NetworkQuality::Fair), T0 + 50_000);
        assert_eq!(store.get("a").unwrap().last_active_at_ms, T0);
        assert_eq!(store.get("a").unwrap().network_quality, NetworkQuality::Fair);

        store.upsert("a", PresenceUpdate::active(), T0 + 60_000);
        assert_eq!(store.get("a").unwrap().last_active_at_ms, T0 + 60_000);
    }

    #[test]
    fn test_revision_tracks_mutations() {
        let mut store = store();
        let start = store.revision();
        store.upsert("a", PresenceUpdate::default(), T0);
        assert!(store.revision() > start);

        let before = store.revision();
        store.remove("missing");
        store.stale_sweep(T0);
        assert_eq!(store.revision(), before);
    }

    #[test]
    fn test_remove() {
        let mut store = store();
        store.upsert("a", PresenceUpdate::default(), T0);
        assert!(store.remove("a").is_some());
        assert!(store.remove("a").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_host_flips_flags() {
        let mut store = store();
        store.set_host("a");
        store.upsert("a", PresenceUpdate::default(), T0);
        store.upsert("b", PresenceUpdate::default(), T0);

        store.set_host("b");
        assert!(!store.get("a").unwrap().is_host);
        assert!(store.get("b").unwrap().is_host);
        assert_eq!(store.all().iter().filter(|p| p.is_host).count(), 1);
        assert_eq!(store.all()[0].id, "b");
    }

    #[test]
    fn test_stale_sweep_boundaries() {
        let mut store = store();
        store.upsert("a", PresenceUpdate::default(), T0);

        assert!(store.stale_sweep(T0 + 119_000).is_empty());
        assert_eq!(store.get("a").unwrap().activity_status, ActivityStatus::Active);

        let changed = store.stale_sweep(T0 + 120_000);
        assert_eq!(changed, vec![("a".to_string(), ActivityStatus::Inactive)]);

        store.stale_sweep(T0 + 299_999);
        assert_eq!(store.get("a").unwrap().activity_status, ActivityStatus::Inactive);

        store.stale_sweep(T0 + 300_000);
        assert_eq!(store.get("a").unwrap().activity_status, ActivityStatus::Away);
    }

    #[test]
    fn test_stale_sweep_never_promotes() {
        let mut store = store();
        store.upsert("a", PresenceUpdate::default().with_activity(ActivityStatus::Away), T0);

        // Freshly marked Away with a recent timestamp stays Away
        assert!(store.stale_sweep(T0 + 1_000).is_empty());
        assert_eq!(store.get("a").unwrap().activity_status, ActivityStatus::Away);
    }

    #[test]
    fn test_long_idle_goes_straight_to_away() {
        let mut store = store();
        store.upsert("a", PresenceUpdate::default(), T0);
        let changed = store.stale_sweep(T0 + 400_000);
        assert_eq!(changed, vec![("a".to_string(), ActivityStatus::Away)]);
    }
}
