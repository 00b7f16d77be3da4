//! The issue-tracker ("beads") collaborator interface.
//!
//! The core treats the issue tracker as an opaque typed store of issues
//! with open/closed state; rendering, parent/child links and the rest of
//! the beads library live outside this crate's scope. Recovery (C8) is the
//! only component that calls through this trait.

use std::collections::HashMap;

use async_trait::async_trait;

/// Authoritative upstream state of a bead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeadState {
    Open,
    Closed,
}

/// Collaborator interface for the issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Look up the authoritative state of a set of beads. Beads unknown to
    /// the tracker are simply absent from the returned map; callers should
    /// not assume every requested id comes back.
    async fn get_beads_with_deps(
        &self,
        ids: &[String],
    ) -> anyhow::Result<HashMap<String, BeadState>>;
}

/// An in-memory issue tracker double for tests: state is whatever was
/// seeded, `get_beads_with_deps` never fails unless `fail_next` is set.
#[derive(Debug, Default)]
pub struct InMemoryIssueTracker {
    states: std::sync::Mutex<HashMap<String, BeadState>>,
    fail_next: std::sync::atomic::AtomicBool,
}

impl InMemoryIssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, bead_id: impl Into<String>, state: BeadState) {
        self.states.lock().unwrap().insert(bead_id.into(), state);
    }

    /// Make the next `get_beads_with_deps` call return an error, simulating
    /// an upstream outage.
    pub fn fail_next_query(&self) {
        self.fail_next.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl IssueTracker for InMemoryIssueTracker {
    async fn get_beads_with_deps(
        &self,
        ids: &[String],
    ) -> anyhow::Result<HashMap<String, BeadState>> {
        if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("issue tracker query failed (simulated)");
        }
        let states = self.states.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| states.get(id).map(|s| (id.clone(), *s)))
            .collect())
    }
}
