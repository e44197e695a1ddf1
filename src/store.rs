//! Process-wide engine state.
//!
//! One [`EngineState`] is created at startup and handed to every
//! component; no free function reads implicit globals. Container entities
//! own their identity; backend records, wait latches, and log buffers
//! live in side maps keyed by container ID so there are no cyclic
//! references between co-owned structures.
//!
//! Locking: every map is guarded independently and writers hold the lock
//! only for the mutation. The single cross-map critical section is
//! [`EngineState::insert_container`], which must check the name index and
//! insert the container and backend record atomically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::sync::Notify;

use crate::constants::MAX_CONTAINERS;
use crate::error::{Error, Result};
use crate::ipam::IpAllocator;
use crate::logsfmt::LogChunk;
use crate::types::{
    BackendState, Container, ContainerStatus, ExecSession, ImageRecord, Network, Volume,
};

// =============================================================================
// Latch
// =============================================================================

/// A level-triggered one-shot event.
///
/// Unlike a bare `Notify`, observers that arrive after [`Latch::set`] still
/// complete immediately, which is what wait-channels and agent-session
/// events require.
#[derive(Debug, Default)]
pub struct Latch {
    set: Mutex<bool>,
    notify: Notify,
}

impl Latch {
    pub fn new() -> Arc<Self> {
        Arc::new(Latch::default())
    }

    /// Fires the event. Idempotent.
    pub fn set(&self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        *set = true;
        drop(set);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Completes once the event has fired, however long ago.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Engine State
// =============================================================================

/// Shared mutable state for one engine instance.
#[derive(Default)]
pub struct EngineState {
    containers: RwLock<HashMap<String, Container>>,
    /// `/<name>` -> container ID
    names: RwLock<HashMap<String, String>>,
    backends: RwLock<HashMap<String, BackendState>>,
    wait_latches: RwLock<HashMap<String, Arc<Latch>>>,
    execs: RwLock<HashMap<String, ExecSession>>,
    log_buffers: RwLock<HashMap<String, Vec<LogChunk>>>,
    networks: RwLock<HashMap<String, Network>>,
    volumes: RwLock<HashMap<String, Volume>>,
    images: RwLock<HashMap<String, ImageRecord>>,
    pub ipam: Mutex<IpAllocator>,
}

impl EngineState {
    pub fn new() -> Arc<Self> {
        Arc::new(EngineState {
            ipam: Mutex::new(IpAllocator::new()),
            ..Default::default()
        })
    }

    // -------------------------------------------------------------------------
    // Containers and names
    // -------------------------------------------------------------------------

    /// Resolves a client reference (full ID, unique prefix, or name with or
    /// without the leading slash) to a container ID.
    pub fn resolve(&self, reference: &str) -> Result<String> {
        let names = self.lock_read(&self.names)?;
        let slashed = format!("/{}", reference.trim_start_matches('/'));
        if let Some(id) = names.get(&slashed) {
            return Ok(id.clone());
        }
        drop(names);

        let containers = self.lock_read(&self.containers)?;
        if containers.contains_key(reference) {
            return Ok(reference.to_string());
        }
        let mut matches = containers.keys().filter(|id| id.starts_with(reference));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id.clone()),
            _ => Err(Error::no_such_container(reference)),
        }
    }

    /// Inserts a container and its backend record, reserving the name.
    ///
    /// The name-index check and all insertions happen under the name lock
    /// so concurrent creates cannot both claim one name.
    pub fn insert_container(&self, container: Container, backend: BackendState) -> Result<()> {
        let mut names = self.lock_write(&self.names)?;
        if names.contains_key(&container.name) {
            return Err(Error::name_in_use(container.name.trim_start_matches('/')));
        }
        let mut containers = self.lock_write(&self.containers)?;
        if containers.len() >= MAX_CONTAINERS {
            return Err(Error::Conflict(format!(
                "container limit reached ({MAX_CONTAINERS})"
            )));
        }
        names.insert(container.name.clone(), container.id.clone());
        self.lock_write(&self.backends)?
            .insert(container.id.clone(), backend);
        containers.insert(container.id.clone(), container);
        Ok(())
    }

    pub fn get_container(&self, id: &str) -> Result<Container> {
        self.lock_read(&self.containers)?
            .get(id)
            .cloned()
            .ok_or_else(|| Error::no_such_container(id))
    }

    pub fn list_containers(&self) -> Result<Vec<Container>> {
        let mut list: Vec<Container> = self.lock_read(&self.containers)?.values().cloned().collect();
        list.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(list)
    }

    /// Applies a mutation to one container under the write lock.
    pub fn update_container<F>(&self, id: &str, f: F) -> Result<Container>
    where
        F: FnOnce(&mut Container),
    {
        let mut containers = self.lock_write(&self.containers)?;
        let container = containers
            .get_mut(id)
            .ok_or_else(|| Error::no_such_container(id))?;
        f(container);
        Ok(container.clone())
    }

    /// Removes a container and every side-map record, freeing its name.
    pub fn remove_container(&self, id: &str) -> Result<Container> {
        let mut names = self.lock_write(&self.names)?;
        let mut containers = self.lock_write(&self.containers)?;
        let container = containers
            .remove(id)
            .ok_or_else(|| Error::no_such_container(id))?;
        names.remove(&container.name);
        drop(containers);
        drop(names);

        self.lock_write(&self.backends)?.remove(id);
        self.lock_write(&self.log_buffers)?.remove(id);
        self.lock_write(&self.execs)?
            .retain(|_, e| e.container_id != id);
        // A dangling waiter must not hang: fire before discarding.
        if let Some(latch) = self.lock_write(&self.wait_latches)?.remove(id) {
            latch.set();
        }
        Ok(container)
    }

    /// Finds all containers carrying `label=value`.
    pub fn containers_with_label(&self, label: &str, value: &str) -> Result<Vec<Container>> {
        let containers = self.lock_read(&self.containers)?;
        let mut found: Vec<Container> = containers
            .values()
            .filter(|c| c.config.labels.get(label).map(String::as_str) == Some(value))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    // -------------------------------------------------------------------------
    // Backend records
    // -------------------------------------------------------------------------

    pub fn get_backend(&self, id: &str) -> Result<BackendState> {
        self.lock_read(&self.backends)?
            .get(id)
            .cloned()
            .ok_or_else(|| Error::no_such_container(id))
    }

    pub fn update_backend<F>(&self, id: &str, f: F) -> Result<BackendState>
    where
        F: FnOnce(&mut BackendState),
    {
        let mut backends = self.lock_write(&self.backends)?;
        let backend = backends
            .get_mut(id)
            .ok_or_else(|| Error::no_such_container(id))?;
        f(backend);
        Ok(backend.clone())
    }

    // -------------------------------------------------------------------------
    // Wait latches
    // -------------------------------------------------------------------------

    /// Allocates the wait latch for a starting container.
    pub fn create_wait(&self, id: &str) -> Result<Arc<Latch>> {
        let latch = Latch::new();
        self.lock_write(&self.wait_latches)?
            .insert(id.to_string(), latch.clone());
        Ok(latch)
    }

    pub fn wait_latch(&self, id: &str) -> Result<Option<Arc<Latch>>> {
        Ok(self.lock_read(&self.wait_latches)?.get(id).cloned())
    }

    /// Transitions a container out of `running` and fires its wait latch.
    ///
    /// The single exit path for stop, kill, provider-side termination, and
    /// forced removal, so the latch fires at most once per start.
    pub fn stop_container(&self, id: &str, exit_code: i64) -> Result<()> {
        self.update_container(id, |c| {
            if c.state.running {
                c.state.status = ContainerStatus::Exited;
                c.state.running = false;
                c.state.pid = 0;
                c.state.exit_code = exit_code;
                c.state.finished_at = Some(Utc::now());
            }
        })?;
        if let Some(latch) = self.lock_write(&self.wait_latches)?.remove(id) {
            latch.set();
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Exec sessions
    // -------------------------------------------------------------------------

    pub fn insert_exec(&self, exec: ExecSession) -> Result<()> {
        self.lock_write(&self.execs)?.insert(exec.id.clone(), exec);
        Ok(())
    }

    pub fn get_exec(&self, id: &str) -> Result<ExecSession> {
        self.lock_read(&self.execs)?
            .get(id)
            .cloned()
            .ok_or(Error::NotFound {
                kind: "exec instance",
                id: id.to_string(),
            })
    }

    pub fn update_exec<F>(&self, id: &str, f: F) -> Result<ExecSession>
    where
        F: FnOnce(&mut ExecSession),
    {
        let mut execs = self.lock_write(&self.execs)?;
        let exec = execs.get_mut(id).ok_or(Error::NotFound {
            kind: "exec instance",
            id: id.to_string(),
        })?;
        f(exec);
        Ok(exec.clone())
    }

    /// Exec sessions registered against one container, sorted by PID.
    pub fn execs_for_container(&self, container_id: &str) -> Result<Vec<ExecSession>> {
        let execs = self.lock_read(&self.execs)?;
        let mut found: Vec<ExecSession> = execs
            .values()
            .filter(|e| e.container_id == container_id)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.pid);
        Ok(found)
    }

    // -------------------------------------------------------------------------
    // Log buffers (remote containers; sandbox processes keep their own)
    // -------------------------------------------------------------------------

    pub fn append_log(&self, id: &str, chunk: LogChunk) -> Result<()> {
        self.lock_write(&self.log_buffers)?
            .entry(id.to_string())
            .or_default()
            .push(chunk);
        Ok(())
    }

    pub fn log_chunks(&self, id: &str) -> Result<Vec<LogChunk>> {
        Ok(self
            .lock_read(&self.log_buffers)?
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    // -------------------------------------------------------------------------
    // Networks, volumes, images
    // -------------------------------------------------------------------------

    pub fn insert_network(&self, network: Network) -> Result<()> {
        self.lock_write(&self.networks)?
            .insert(network.id.clone(), network);
        Ok(())
    }

    pub fn get_network(&self, reference: &str) -> Result<Network> {
        let networks = self.lock_read(&self.networks)?;
        if let Some(n) = networks.get(reference) {
            return Ok(n.clone());
        }
        networks
            .values()
            .find(|n| n.name == reference || n.id.starts_with(reference))
            .cloned()
            .ok_or(Error::NotFound {
                kind: "network",
                id: reference.to_string(),
            })
    }

    pub fn list_networks(&self) -> Result<Vec<Network>> {
        let mut list: Vec<Network> = self.lock_read(&self.networks)?.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    pub fn update_network<F>(&self, id: &str, f: F) -> Result<Network>
    where
        F: FnOnce(&mut Network),
    {
        let mut networks = self.lock_write(&self.networks)?;
        let network = networks.get_mut(id).ok_or(Error::NotFound {
            kind: "network",
            id: id.to_string(),
        })?;
        f(network);
        Ok(network.clone())
    }

    pub fn remove_network(&self, id: &str) -> Result<Network> {
        self.lock_write(&self.networks)?
            .remove(id)
            .ok_or(Error::NotFound {
                kind: "network",
                id: id.to_string(),
            })
    }

    pub fn insert_volume(&self, volume: Volume) -> Result<()> {
        self.lock_write(&self.volumes)?
            .insert(volume.name.clone(), volume);
        Ok(())
    }

    pub fn get_volume(&self, name: &str) -> Result<Volume> {
        self.lock_read(&self.volumes)?
            .get(name)
            .cloned()
            .ok_or(Error::NotFound {
                kind: "volume",
                id: name.to_string(),
            })
    }

    pub fn list_volumes(&self) -> Result<Vec<Volume>> {
        let mut list: Vec<Volume> = self.lock_read(&self.volumes)?.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    pub fn remove_volume(&self, name: &str) -> Result<Volume> {
        self.lock_write(&self.volumes)?
            .remove(name)
            .ok_or(Error::NotFound {
                kind: "volume",
                id: name.to_string(),
            })
    }

    pub fn insert_image(&self, image: ImageRecord) -> Result<()> {
        self.lock_write(&self.images)?.insert(image.id.clone(), image);
        Ok(())
    }

    pub fn get_image(&self, reference: &str) -> Result<ImageRecord> {
        let images = self.lock_read(&self.images)?;
        if let Some(img) = images.get(reference) {
            return Ok(img.clone());
        }
        images
            .values()
            .find(|i| i.repo_tags.iter().any(|t| t == reference))
            .cloned()
            .ok_or(Error::NotFound {
                kind: "image",
                id: reference.to_string(),
            })
    }

    pub fn list_images(&self) -> Result<Vec<ImageRecord>> {
        Ok(self.lock_read(&self.images)?.values().cloned().collect())
    }

    // -------------------------------------------------------------------------
    // Lock helpers
    // -------------------------------------------------------------------------

    fn lock_read<'a, T>(&self, lock: &'a RwLock<T>) -> Result<std::sync::RwLockReadGuard<'a, T>> {
        lock.read()
            .map_err(|_| Error::Internal("state lock poisoned".into()))
    }

    fn lock_write<'a, T>(&self, lock: &'a RwLock<T>) -> Result<std::sync::RwLockWriteGuard<'a, T>> {
        lock.write()
            .map_err(|_| Error::Internal("state lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContainerConfig, ContainerState, HostConfig, NetworkSettings};

    fn test_container(id: &str, name: &str) -> Container {
        Container {
            id: id.to_string(),
            name: format!("/{name}"),
            created: Utc::now(),
            state: ContainerState::default(),
            config: ContainerConfig::default(),
            host_config: HostConfig::default(),
            network_settings: NetworkSettings::default(),
            mounts: Vec::new(),
        }
    }

    #[test]
    fn name_conflict_rejected() {
        let state = EngineState::new();
        state
            .insert_container(test_container("aaa", "web"), BackendState::default())
            .unwrap();
        let err = state
            .insert_container(test_container("bbb", "web"), BackendState::default())
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn resolve_by_name_prefix_and_id() {
        let state = EngineState::new();
        let id = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        state
            .insert_container(test_container(id, "web"), BackendState::default())
            .unwrap();

        assert_eq!(state.resolve("web").unwrap(), id);
        assert_eq!(state.resolve("/web").unwrap(), id);
        assert_eq!(state.resolve(id).unwrap(), id);
        assert_eq!(state.resolve("0123456789ab").unwrap(), id);
        assert!(state.resolve("missing").is_err());
    }

    #[test]
    fn removed_name_is_reusable() {
        let state = EngineState::new();
        state
            .insert_container(test_container("aaa", "web"), BackendState::default())
            .unwrap();
        state.remove_container("aaa").unwrap();
        state
            .insert_container(test_container("bbb", "web"), BackendState::default())
            .expect("name freed by remove should be reusable");
    }

    #[tokio::test]
    async fn latch_is_level_triggered() {
        let latch = Latch::new();
        latch.set();
        // A late observer must not hang.
        tokio::time::timeout(std::time::Duration::from_secs(1), latch.wait())
            .await
            .expect("wait after set should complete immediately");
    }

    #[tokio::test]
    async fn stop_container_fires_wait_latch() {
        let state = EngineState::new();
        let mut c = test_container("aaa", "web");
        c.state.status = ContainerStatus::Running;
        c.state.running = true;
        state.insert_container(c, BackendState::default()).unwrap();
        let latch = state.create_wait("aaa").unwrap();

        state.stop_container("aaa", 137).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), latch.wait())
            .await
            .expect("latch should fire on stop");
        let c = state.get_container("aaa").unwrap();
        assert_eq!(c.state.exit_code, 137);
        assert!(!c.state.running);
        assert_eq!(c.state.status, ContainerStatus::Exited);
    }

    #[tokio::test]
    async fn remove_fires_dangling_wait() {
        let state = EngineState::new();
        state
            .insert_container(test_container("aaa", "web"), BackendState::default())
            .unwrap();
        let latch = state.create_wait("aaa").unwrap();
        state.remove_container("aaa").unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), latch.wait())
            .await
            .expect("wait on removed container must return promptly");
    }

    #[test]
    fn label_lookup_sorted_by_id() {
        let state = EngineState::new();
        for (id, name) in [("bbb", "two"), ("aaa", "one"), ("ccc", "three")] {
            let mut c = test_container(id, name);
            c.config.labels.insert("pod-id".into(), "p1".into());
            state.insert_container(c, BackendState::default()).unwrap();
        }
        let found = state.containers_with_label("pod-id", "p1").unwrap();
        let ids: Vec<&str> = found.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["aaa", "bbb", "ccc"], "lexicographic order");
    }
}
