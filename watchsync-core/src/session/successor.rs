//! Successor selection when the host leaves
//!
//! Every client evaluates the same policy over the same roster, so the choice
//! is deterministic without any extra coordination messages.

/// Chooses who takes over after the host departs
pub trait SuccessorPolicy: Send + Sync {
    /// Pick the next host from `remaining` (which excludes `departed`).
    /// Returning `None` leaves the session without a host until someone
    /// transfers the role explicitly.
    fn choose(&self, departed: &str, remaining: &[String]) -> Option<String>;
}

/// Lexicographically smallest remaining participant id
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestId;

impl SuccessorPolicy for LowestId {
    fn choose(&self, departed: &str, remaining: &[String]) -> Option<String> {
        remaining
            .iter()
            .filter(|id| id.as_str() != departed)
            .min()
            .cloned()
    }
}

/// No automatic succession
#[derive(Debug, Clone, Copy, Default)]
pub struct Manual;

impl SuccessorPolicy for Manual {
    fn choose(&self, _departed: &str, _remaining: &[String]) -> Option<String> {
        None
    }
}
