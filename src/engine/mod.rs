//! Lifecycle orchestrator.
//!
//! The [`Engine`] owns every client-visible operation: container
//! lifecycle, exec sessions, log and attach streams, networks, volumes,
//! and image metadata. It maps containers onto ephemeral executions
//! through the configured [`JobProvider`] and keeps the durable orphan
//! registry in step with every provisioned remote resource.
//!
//! Split by concern:
//! - [`containers`]: create / start / stop / kill / restart / remove / wait
//! - [`exec`]: exec sessions over the agent channel or the sandbox
//! - [`logs`]: log encoding, tailing, attach streams
//! - [`metrics`]: stats and top
//! - [`query`]: inspect, list, ping/version/info surfaces
//! - [`networks`], [`volumes`], [`images`]: auxiliary entities

mod containers;
mod exec;
mod images;
mod logs;
mod metrics;
mod networks;
mod query;
mod volumes;

pub use exec::ExecConfig;
pub use logs::LogOptions;
pub use query::{InfoReport, VersionInfo};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::ids;
use crate::image::ImageConfigResolver;
use crate::ipam::{DEFAULT_GATEWAY, DEFAULT_SUBNET};
use crate::orphan::{self, RecoveryReport, ResourceRegistry};
use crate::pod::PodCoordinator;
use crate::provider::{ExecutionHandle, JobHandle, JobProvider, ProviderKind, WasiProvider};
use crate::sandbox::AppletRunner;
use crate::store::EngineState;
use crate::types::{ContainerStatus, Network};

use crate::agent::AgentRegistry;

/// Name of the always-present default network.
pub const DEFAULT_NETWORK: &str = "bridge";

/// The orchestrator. One per process; cheap to share behind an `Arc`.
pub struct Engine {
    config: EngineConfig,
    backend: ProviderKind,
    state: Arc<EngineState>,
    pods: PodCoordinator,
    agents: Arc<AgentRegistry>,
    providers: HashMap<ProviderKind, Arc<dyn JobProvider>>,
    wasi: Arc<WasiProvider>,
    registry: Arc<ResourceRegistry>,
    resolver: Arc<dyn ImageConfigResolver>,
    http: reqwest::Client,
}

impl Engine {
    /// Wires an engine over the given backend.
    ///
    /// `providers` carries the cloud backends; the in-process WASI
    /// provider is always built over `runner` and registered alongside
    /// them, so `backend` may name either kind.
    pub fn new(
        config: EngineConfig,
        backend: ProviderKind,
        mut providers: HashMap<ProviderKind, Arc<dyn JobProvider>>,
        runner: Arc<dyn AppletRunner>,
        registry: Arc<ResourceRegistry>,
        resolver: Arc<dyn ImageConfigResolver>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let wasi = Arc::new(WasiProvider::new(runner));
        providers.insert(
            ProviderKind::InProcessWasi,
            wasi.clone() as Arc<dyn JobProvider>,
        );
        if !providers.contains_key(&backend) {
            return Err(Error::InvalidConfig(format!(
                "no provider registered for backend {backend}"
            )));
        }

        let state = EngineState::new();
        state.insert_network(Network {
            id: ids::generate_id(),
            name: DEFAULT_NETWORK.to_string(),
            driver: "bridge".to_string(),
            subnet: DEFAULT_SUBNET.to_string(),
            gateway: DEFAULT_GATEWAY.to_string(),
            created: Utc::now(),
            containers: Vec::new(),
        })?;

        info!(backend = %backend, instance = %config.instance_id, "engine initialized");
        Ok(Arc::new(Engine {
            config,
            backend,
            state,
            pods: PodCoordinator::new(),
            agents: AgentRegistry::new(),
            providers,
            wasi,
            registry,
            resolver,
            http: reqwest::Client::new(),
        }))
    }

    /// The active execution backend.
    pub fn backend(&self) -> ProviderKind {
        self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Agent registry, exposed so the transport can register dial-back
    /// connections in reverse mode.
    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    /// Sweeps leftover resources from previous runs of this instance.
    ///
    /// Entries that survive every delete attempt are surfaced as `dead`
    /// container records so a client can retry removal through the API.
    pub async fn recover(&self) -> RecoveryReport {
        let report = orphan::recover(&self.registry, &self.providers, &self.config.instance_id).await;
        for resource_id in &report.failed {
            let Some(entry) = self.registry.entry(resource_id) else {
                continue;
            };
            if self.state.get_container(&entry.container_id).is_ok() {
                continue;
            }
            warn!(
                container_id = %entry.container_id,
                resource = %resource_id,
                "registering dead container for unrecovered resource"
            );
            let mut container = containers::shell_container(
                &entry.container_id,
                &format!("recovered-{}", ids::short_id(&entry.container_id)),
            );
            container.state.status = ContainerStatus::Dead;
            let backend = crate::types::BackendState {
                job_name: entry.resource_id.clone(),
                ..Default::default()
            };
            if let Err(e) = self.state.insert_container(container, backend) {
                warn!(error = %e, "could not register recovered container");
            }
        }
        report
    }

    /// Provider for the active backend.
    fn provider(&self) -> Arc<dyn JobProvider> {
        // Presence is checked at construction.
        self.providers
            .get(&self.backend)
            .cloned()
            .expect("backend provider registered at construction")
    }

    fn is_local(&self) -> bool {
        self.backend.is_local()
    }

    fn job_handle(&self, container_id: &str, job_name: &str) -> JobHandle {
        JobHandle {
            container_id: container_id.to_string(),
            job_name: job_name.to_string(),
        }
    }

    fn execution_handle(
        &self,
        container_id: &str,
        job_name: &str,
        execution_name: &str,
    ) -> ExecutionHandle {
        ExecutionHandle {
            container_id: container_id.to_string(),
            job_name: job_name.to_string(),
            execution_name: execution_name.to_string(),
        }
    }
}
