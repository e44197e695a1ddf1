//! Pod coordination.
//!
//! Containers sharing a `pod-id` label are provisioned as a single
//! multi-container execution. Each member's `start` is recorded here; all
//! but the last defer, and the last one triggers exactly one dispatch with
//! the lexicographically-first member as main (the agent host).

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// Label key identifying pod membership.
pub const POD_LABEL: &str = "pod-id";

/// What the orchestrator should do after recording a member's start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDisposition {
    /// Not a pod member; provision this container alone.
    Single,
    /// Siblings are still queued; complete the start without provisioning.
    Defer,
    /// All members started; provision once with these members, sorted by
    /// ID. The first entry is the main container.
    Dispatch { members: Vec<String> },
}

#[derive(Debug, Default)]
struct PodState {
    started: BTreeSet<String>,
    dispatched: bool,
}

/// Tracks which pod members have called start.
#[derive(Debug, Default)]
pub struct PodCoordinator {
    pods: Mutex<HashMap<String, PodState>>,
}

impl PodCoordinator {
    pub fn new() -> Self {
        PodCoordinator::default()
    }

    /// Records a member's start.
    ///
    /// `members` is the full sibling set (container IDs, any order) as
    /// currently known to the store. Recording is idempotent: a repeated
    /// start of the same member neither double-counts nor re-dispatches.
    pub fn mark_started(
        &self,
        pod_id: &str,
        container_id: &str,
        members: &[String],
    ) -> StartDisposition {
        if members.len() <= 1 {
            return StartDisposition::Single;
        }

        let mut pods = self.pods.lock().unwrap_or_else(|e| e.into_inner());
        let state = pods.entry(pod_id.to_string()).or_default();
        state.started.insert(container_id.to_string());

        if state.dispatched {
            return StartDisposition::Defer;
        }
        if members.iter().all(|m| state.started.contains(m)) {
            state.dispatched = true;
            let mut sorted: Vec<String> = members.to_vec();
            sorted.sort();
            StartDisposition::Dispatch { members: sorted }
        } else {
            StartDisposition::Defer
        }
    }

    /// Drops bookkeeping for a pod once its containers are removed.
    pub fn forget(&self, pod_id: &str) {
        self.pods
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(pod_id);
    }

    /// Removes one member, e.g. when a queued container is deleted before
    /// its siblings start.
    pub fn forget_member(&self, pod_id: &str, container_id: &str) {
        let mut pods = self.pods.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = pods.get_mut(pod_id) {
            state.started.remove(container_id);
            if state.started.is_empty() && !state.dispatched {
                pods.remove(pod_id);
            }
        }
    }
}
