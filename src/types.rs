//! Client-visible data model.
//!
//! Field names follow the engine wire protocol (version 1.44) so the
//! transport can serialize inspect/list responses directly. Entities are
//! owned by the orchestrator; everything here is plain data.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Container Status
// =============================================================================

/// Lifecycle phase of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Exited,
    Dead,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Mutable runtime state of a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    pub status: ContainerStatus,
    pub running: bool,
    pub pid: i64,
    pub exit_code: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for ContainerState {
    fn default() -> Self {
        ContainerState {
            status: ContainerStatus::Created,
            running: false,
            pid: 0,
            exit_code: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

// =============================================================================
// Container Configuration
// =============================================================================

/// Immutable configuration supplied at create time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerConfig {
    pub image: String,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    pub working_dir: String,
    pub user: String,
    pub labels: HashMap<String, String>,
    pub tty: bool,
    pub open_stdin: bool,
}

/// Host-level configuration supplied at create time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HostConfig {
    /// Bind mounts, `host_path:container_path[:ro]`.
    pub binds: Vec<String>,
    pub network_mode: String,
    pub auto_remove: bool,
}

/// A resolved mount on a container, reported by inspect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountPoint {
    #[serde(rename = "Type")]
    pub mount_type: String,
    pub source: String,
    pub destination: String,
    #[serde(rename = "RW")]
    pub rw: bool,
}

// =============================================================================
// Network Settings
// =============================================================================

/// Per-network endpoint attached to a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EndpointSettings {
    pub network_id: String,
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    pub gateway: String,
    pub mac_address: String,
    pub ip_prefix_len: u8,
}

/// Network state reported by container inspect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NetworkSettings {
    pub networks: HashMap<String, EndpointSettings>,
}

// =============================================================================
// Container Entity
// =============================================================================

/// A client-visible container, independent of any cloud resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Container {
    pub id: String,
    /// Name with leading slash, e.g. `/web-1`.
    pub name: String,
    pub created: DateTime<Utc>,
    pub state: ContainerState,
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    pub network_settings: NetworkSettings,
    pub mounts: Vec<MountPoint>,
}

/// Provider-specific handles, one record per container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendState {
    pub job_name: String,
    pub execution_name: String,
    pub agent_address: String,
    pub agent_token: String,
    pub resource_group_or_cluster: String,
}

// =============================================================================
// Exec Sessions
// =============================================================================

/// A registered exec session.
#[derive(Debug, Clone)]
pub struct ExecSession {
    pub id: String,
    pub container_id: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub tty: bool,
    pub attach_stdin: bool,
    pub running: bool,
    pub exit_code: Option<i64>,
    pub pid: i64,
}

// =============================================================================
// Networks and Volumes
// =============================================================================

/// A user-visible network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Network {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub subnet: String,
    pub gateway: String,
    pub created: DateTime<Utc>,
    /// Container IDs currently attached.
    pub containers: Vec<String>,
}

/// A named volume. Purely bookkeeping; data lives in sandbox binds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub created_at: DateTime<Utc>,
    pub labels: HashMap<String, String>,
}

/// Recorded image metadata (the engine never stores layers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageRecord {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub created: DateTime<Utc>,
    pub size: i64,
}

// =============================================================================
// Metrics
// =============================================================================

/// One-shot resource usage snapshot for `stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct StatsSnapshot {
    pub cpu_nanos: u64,
    pub memory_bytes: u64,
    pub pids: u64,
    pub read: Option<DateTime<Utc>>,
}

/// Process table for `top`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ProcessList {
    pub titles: Vec<String>,
    pub processes: Vec<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_is_lowercase() {
        assert_eq!(ContainerStatus::Created.to_string(), "created");
        assert_eq!(ContainerStatus::Running.to_string(), "running");
        assert_eq!(ContainerStatus::Exited.to_string(), "exited");
        assert_eq!(ContainerStatus::Dead.to_string(), "dead");
    }

    #[test]
    fn container_state_serializes_wire_fields() {
        let state = ContainerState::default();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["Status"], "created");
        assert_eq!(json["Running"], false);
        assert_eq!(json["ExitCode"], 0);
    }

    #[test]
    fn config_accepts_partial_json() {
        let cfg: ContainerConfig =
            serde_json::from_str(r#"{"Image":"alpine","Cmd":["echo","hi"]}"#).unwrap();
        assert_eq!(cfg.image, "alpine");
        assert_eq!(cfg.cmd, vec!["echo", "hi"]);
        assert!(cfg.entrypoint.is_empty(), "unset fields default");
    }

    #[test]
    fn endpoint_ip_field_name() {
        let ep = EndpointSettings {
            ip_address: "172.17.0.2".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&ep).unwrap();
        assert_eq!(json["IPAddress"], "172.17.0.2");
    }
}
