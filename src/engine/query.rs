//! Read-only data surfaces: inspect, list, ping/version/info.

use serde::Serialize;

use crate::constants::{API_MIN_VERSION, API_VERSION};
use crate::error::Result;
use crate::types::{BackendState, Container};

use super::Engine;

/// Body of the `/version` surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionInfo {
    pub version: String,
    pub api_version: String,
    pub min_api_version: String,
    pub os: String,
    pub arch: String,
}

/// Body of the `/info` surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InfoReport {
    #[serde(rename = "ID")]
    pub id: String,
    pub containers: usize,
    pub containers_running: usize,
    pub containers_stopped: usize,
    pub images: usize,
    pub server_version: String,
    pub operating_system: String,
    /// Active execution backend, e.g. `cloud-run` or `in-process-wasi`.
    pub backend: String,
}

impl Engine {
    pub fn inspect_container(&self, reference: &str) -> Result<Container> {
        let id = self.state.resolve(reference)?;
        self.state.get_container(&id)
    }

    /// Provider-side handles for a container.
    pub fn inspect_backend(&self, reference: &str) -> Result<BackendState> {
        let id = self.state.resolve(reference)?;
        self.state.get_backend(&id)
    }

    /// Containers, newest first. `all` includes non-running ones.
    pub fn list_containers(&self, all: bool) -> Result<Vec<Container>> {
        let mut list = self.state.list_containers()?;
        if !all {
            list.retain(|c| c.state.running);
        }
        Ok(list)
    }

    /// The `/_ping` body.
    pub fn ping(&self) -> &'static str {
        "OK"
    }

    pub fn version(&self) -> VersionInfo {
        VersionInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            api_version: API_VERSION.to_string(),
            min_api_version: API_MIN_VERSION.to_string(),
            os: "linux".to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    pub fn info(&self) -> Result<InfoReport> {
        let containers = self.state.list_containers()?;
        let running = containers.iter().filter(|c| c.state.running).count();
        Ok(InfoReport {
            id: self.config.instance_id.clone(),
            containers: containers.len(),
            containers_running: running,
            containers_stopped: containers.len() - running,
            images: self.state.list_images()?.len(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            operating_system: "linux".to_string(),
            backend: self.backend.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::sandbox_engine;
    use crate::types::{ContainerConfig, HostConfig};

    fn config() -> ContainerConfig {
        ContainerConfig {
            image: "alpine".to_string(),
            cmd: ["tail", "-f", "/dev/null"].map(String::from).to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn list_filters_on_running_unless_all() {
        let (engine, _dir) = sandbox_engine();
        let stopped = engine
            .create_container(config(), HostConfig::default(), Some("idle"))
            .await
            .unwrap();
        let started = engine
            .create_container(config(), HostConfig::default(), Some("busy"))
            .await
            .unwrap();
        engine.start_container(&started).await.unwrap();

        let running = engine.list_containers(false).unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, started);

        let all = engine.list_containers(true).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|c| c.id == stopped));
    }

    #[tokio::test]
    async fn version_and_info_surfaces() {
        let (engine, _dir) = sandbox_engine();
        assert_eq!(engine.ping(), "OK");

        let version = engine.version();
        assert_eq!(version.api_version, "1.44");
        assert_eq!(version.min_api_version, "1.24");

        engine
            .create_container(config(), HostConfig::default(), None)
            .await
            .unwrap();
        let info = engine.info().unwrap();
        assert_eq!(info.containers, 1);
        assert_eq!(info.containers_running, 0);
        assert_eq!(info.backend, "in-process-wasi");
        assert_eq!(info.images, 1, "creating a container records its image");
    }

    #[tokio::test]
    async fn resolve_accepts_prefix_and_name() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(config(), HostConfig::default(), Some("target"))
            .await
            .unwrap();
        assert_eq!(engine.inspect_container(&id[..12]).unwrap().id, id);
        assert_eq!(engine.inspect_container("target").unwrap().id, id);
        assert_eq!(engine.inspect_container("/target").unwrap().id, id);
        assert_eq!(
            engine.inspect_container("missing").unwrap_err().status_code(),
            404
        );
    }
}
