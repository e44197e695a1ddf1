//! Agent session registry.
//!
//! Tracks one agent session per container through
//! `prepared → connected → disconnected`. Both transitions are exposed as
//! level-triggered events so a waiter that arrives after the transition
//! still observes it — the race this design removes is a `wait_connected`
//! call landing just after the agent dialed in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ids::token_eq;
use crate::store::Latch;

use super::link::AgentLink;

/// Observable phase of an agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    /// Dispatch happened; the agent has not attached yet.
    Prepared,
    /// A live link is parked for the container.
    Connected,
    /// The link was lost or explicitly removed.
    Disconnected,
}

struct AgentEntry {
    phase: AgentPhase,
    link: Option<Arc<AgentLink>>,
    token: String,
    connected: Arc<Latch>,
    disconnected: Arc<Latch>,
}

/// Registry of agent sessions keyed by container ID.
#[derive(Default)]
pub struct AgentRegistry {
    entries: Mutex<HashMap<String, AgentEntry>>,
}

impl AgentRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(AgentRegistry::default())
    }

    /// Creates the session record before dispatch so a fast-connecting
    /// agent finds somewhere to register.
    pub fn prepare(&self, container_id: &str, token: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            container_id.to_string(),
            AgentEntry {
                phase: AgentPhase::Prepared,
                link: None,
                token: token.to_string(),
                connected: Latch::new(),
                disconnected: Latch::new(),
            },
        );
        debug!(container_id, "agent session prepared");
    }

    /// Parks a connected link, validating the bearer token first.
    pub fn register(&self, container_id: &str, token: &str, link: Arc<AgentLink>) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .get_mut(container_id)
            .ok_or_else(|| Error::no_such_container(container_id))?;
        if !token_eq(&entry.token, token) {
            return Err(Error::AgentUnauthorized);
        }
        entry.link = Some(link);
        entry.phase = AgentPhase::Connected;
        entry.connected.set();
        info!(container_id, "agent connected");
        Ok(())
    }

    /// Marks the session disconnected and drops the link.
    ///
    /// Idempotent; also the path taken when a container is killed or
    /// removed while an agent is attached.
    pub fn remove(&self, container_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(container_id) {
            entry.link = None;
            entry.phase = AgentPhase::Disconnected;
            entry.disconnected.set();
            debug!(container_id, "agent session removed");
        }
    }

    /// Forgets the session entirely (container removal).
    pub fn forget(&self, container_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.remove(container_id) {
            entry.disconnected.set();
        }
    }

    pub fn phase(&self, container_id: &str) -> Option<AgentPhase> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(container_id).map(|e| e.phase)
    }

    /// The parked link, if the agent is currently connected.
    pub fn link(&self, container_id: &str) -> Option<Arc<AgentLink>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(container_id).and_then(|e| e.link.clone())
    }

    /// Waits until the agent for a container has connected.
    ///
    /// Completes immediately for late observers; errors with `Timeout`
    /// after `timeout`.
    pub async fn wait_connected(&self, container_id: &str, timeout: Duration) -> Result<()> {
        let latch = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries
                .get(container_id)
                .map(|e| e.connected.clone())
                .ok_or_else(|| Error::no_such_container(container_id))?
        };
        tokio::time::timeout(timeout, latch.wait())
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("agent connect for {container_id}"),
                duration: timeout,
            })
    }

    /// Waits until the agent session has disconnected.
    pub async fn wait_disconnected(&self, container_id: &str, timeout: Duration) -> Result<()> {
        let latch = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries
                .get(container_id)
                .map(|e| e.disconnected.clone())
                .ok_or_else(|| Error::no_such_container(container_id))?
        };
        tokio::time::timeout(timeout, latch.wait())
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("agent disconnect for {container_id}"),
                duration: timeout,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_link() -> Arc<AgentLink> {
        let (ours, theirs) = tokio::io::duplex(1024);
        // Keep the far end alive so the link stays open for the test.
        Box::leak(Box::new(theirs));
        AgentLink::spawn(ours)
    }

    #[tokio::test]
    async fn register_requires_prepare_and_token() {
        let registry = AgentRegistry::new();
        let link = test_link();

        let err = registry.register("c1", "tok", link.clone()).unwrap_err();
        assert_eq!(err.status_code(), 404, "unprepared container rejected");

        registry.prepare("c1", "tok");
        let err = registry.register("c1", "wrong", link.clone()).unwrap_err();
        assert!(matches!(err, Error::AgentUnauthorized));

        registry.register("c1", "tok", link).unwrap();
        assert_eq!(registry.phase("c1"), Some(AgentPhase::Connected));
        assert!(registry.link("c1").is_some());
    }

    #[tokio::test]
    async fn late_observer_sees_connected() {
        let registry = AgentRegistry::new();
        registry.prepare("c1", "tok");
        registry.register("c1", "tok", test_link()).unwrap();

        // Observer arrives after the transition.
        registry
            .wait_connected("c1", Duration::from_millis(100))
            .await
            .expect("level-triggered event must complete for late observers");
    }

    #[tokio::test]
    async fn wait_connected_times_out() {
        let registry = AgentRegistry::new();
        registry.prepare("c1", "tok");
        let err = registry
            .wait_connected("c1", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn remove_fires_disconnect_and_drops_link() {
        let registry = AgentRegistry::new();
        registry.prepare("c1", "tok");
        registry.register("c1", "tok", test_link()).unwrap();

        registry.remove("c1");
        assert_eq!(registry.phase("c1"), Some(AgentPhase::Disconnected));
        assert!(registry.link("c1").is_none());
        registry
            .wait_disconnected("c1", Duration::from_millis(100))
            .await
            .expect("disconnect event fires on remove");

        // Idempotent.
        registry.remove("c1");
    }
}
