//! Job-provider capability.
//!
//! A `JobProvider` maps one container onto an ephemeral remote execution:
//! register a workload, start it, wait for it to become reachable, watch
//! for its exit, and tear it down. Cloud backends implement the narrower
//! `CloudApi` and share the generic polling adapter; the in-process WASI
//! backend implements `JobProvider` directly over the sandbox.

pub mod cloud;
pub mod jobspec;
pub mod sim;
pub mod wasi;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logsfmt::LogChunk;

pub use cloud::{CloudApi, CloudJobProvider, ExecutionState};
pub use jobspec::{JobSpec, MemberSpec};
pub use wasi::WasiProvider;

/// Supported execution backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Ecs,
    Lambda,
    CloudRun,
    GcpFunctions,
    ContainerApps,
    AzureFunctions,
    InProcessWasi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ecs => "ecs",
            ProviderKind::Lambda => "lambda",
            ProviderKind::CloudRun => "cloud-run",
            ProviderKind::GcpFunctions => "gcp-functions",
            ProviderKind::ContainerApps => "container-apps",
            ProviderKind::AzureFunctions => "azure-functions",
            ProviderKind::InProcessWasi => "in-process-wasi",
        }
    }

    /// Backends that never host an agent channel.
    pub fn is_local(&self) -> bool {
        matches!(self, ProviderKind::InProcessWasi)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ecs" => Ok(ProviderKind::Ecs),
            "lambda" => Ok(ProviderKind::Lambda),
            "cloud-run" => Ok(ProviderKind::CloudRun),
            "gcp-functions" => Ok(ProviderKind::GcpFunctions),
            "container-apps" => Ok(ProviderKind::ContainerApps),
            "azure-functions" => Ok(ProviderKind::AzureFunctions),
            "in-process-wasi" | "wasi" => Ok(ProviderKind::InProcessWasi),
            other => Err(Error::InvalidConfig(format!("unknown backend: {other}"))),
        }
    }
}

/// A registered (not yet started) workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub container_id: String,
    pub job_name: String,
}

/// A started execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionHandle {
    pub container_id: String,
    pub job_name: String,
    pub execution_name: String,
}

/// Outcome of waiting for an execution to become reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunningStatus {
    /// The execution is up; `addr` is `ip:port` of the in-container agent.
    Running(RunningInfo),
    /// The execution already finished before becoming reachable.
    FastExit(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningInfo {
    pub addr: String,
}

/// A remote resource carrying this engine's tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedResource {
    pub resource_id: String,
    pub resource_type: String,
    pub tags: HashMap<String, String>,
}

/// Execution backend for container workloads.
#[async_trait]
pub trait JobProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Creates the provider-side job definition for a workload.
    async fn register_workload(&self, spec: &JobSpec) -> Result<JobHandle>;

    /// Starts one execution of a registered job.
    async fn start_execution(&self, handle: &JobHandle) -> Result<ExecutionHandle>;

    /// Polls until the execution is reachable or already finished.
    async fn wait_running(
        &self,
        handle: &ExecutionHandle,
        timeout: Duration,
    ) -> Result<RunningStatus>;

    /// Blocks until the execution reaches a terminal state; returns its
    /// exit code (SUCCEEDED→0, FAILED/DEGRADED→1, STOPPED→137).
    async fn wait_finished(&self, handle: &ExecutionHandle) -> Result<i64>;

    /// Best-effort stop of a running execution.
    async fn stop(&self, handle: &ExecutionHandle) -> Result<()>;

    /// Best-effort, idempotent deletion of the job definition.
    async fn delete(&self, handle: &JobHandle) -> Result<()>;

    /// Reads log records from `cursor` on; returns the next cursor.
    async fn fetch_logs(
        &self,
        handle: &ExecutionHandle,
        cursor: u64,
    ) -> Result<(Vec<LogChunk>, u64)>;

    /// Lists provider resources tagged as managed by `instance_id`.
    async fn list_managed(&self, instance_id: &str) -> Result<Vec<ManagedResource>>;
}
