//! In-process WASI backend.
//!
//! Executions are sandbox processes in this address space. There is no
//! job definition, no agent channel, and no remote polling; the engine
//! short-circuits exec/attach/logs straight to the sandbox it looks up
//! through [`WasiProvider::process`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::constants::{AGENT_PORT, MANAGED_BY_VALUE, TAG_INSTANCE, TAG_MANAGED_BY};
use crate::error::{Error, Result};
use crate::ids::short_id;
use crate::logsfmt::LogChunk;
use crate::sandbox::{AppletRunner, SandboxProcess};

use super::jobspec::JobSpec;
use super::{
    ExecutionHandle, JobHandle, JobProvider, ManagedResource, ProviderKind, RunningInfo,
    RunningStatus,
};

/// Window in which a command that finishes immediately is reported as a
/// fast exit instead of a running execution.
const FAST_EXIT_WINDOW: Duration = Duration::from_millis(100);

pub struct WasiProvider {
    runner: Arc<dyn AppletRunner>,
    specs: Mutex<HashMap<String, JobSpec>>,
    processes: Mutex<HashMap<String, Arc<SandboxProcess>>>,
}

impl WasiProvider {
    pub fn new(runner: Arc<dyn AppletRunner>) -> Self {
        WasiProvider {
            runner,
            specs: Mutex::new(HashMap::new()),
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// The live sandbox for a container, when one exists.
    pub fn process(&self, container_id: &str) -> Option<Arc<SandboxProcess>> {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(container_id)
            .cloned()
    }
}

#[async_trait]
impl JobProvider for WasiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::InProcessWasi
    }

    async fn register_workload(&self, spec: &JobSpec) -> Result<JobHandle> {
        // Nothing to provision; the spec is kept for start time.
        let job_name = format!("wasi-{}", short_id(&spec.container_id));
        self.specs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(spec.container_id.clone(), spec.clone());
        Ok(JobHandle {
            container_id: spec.container_id.clone(),
            job_name,
        })
    }

    async fn start_execution(&self, handle: &JobHandle) -> Result<ExecutionHandle> {
        let spec = self
            .specs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle.container_id)
            .cloned()
            .ok_or_else(|| Error::no_such_container(&handle.container_id))?;

        let member = spec.main();
        let process = SandboxProcess::spawn(
            &member.container_id,
            member.command.clone(),
            member.env.clone(),
            &member.binds,
            member.working_dir.as_deref(),
            self.runner.clone(),
        )?;
        debug!(container_id = %handle.container_id, "sandbox execution started");
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.container_id.clone(), process);
        Ok(ExecutionHandle {
            container_id: handle.container_id.clone(),
            job_name: handle.job_name.clone(),
            execution_name: format!("{}-exec", handle.job_name),
        })
    }

    async fn wait_running(
        &self,
        handle: &ExecutionHandle,
        _timeout: Duration,
    ) -> Result<RunningStatus> {
        let process = self
            .process(&handle.container_id)
            .ok_or_else(|| Error::no_such_container(&handle.container_id))?;
        // Commands like `echo` finish inside the window and surface their
        // exit code directly; anything still up counts as running.
        tokio::select! {
            code = process.wait() => Ok(RunningStatus::FastExit(code)),
            _ = tokio::time::sleep(FAST_EXIT_WINDOW) => Ok(RunningStatus::Running(RunningInfo {
                addr: format!("127.0.0.1:{AGENT_PORT}"),
            })),
        }
    }

    async fn wait_finished(&self, handle: &ExecutionHandle) -> Result<i64> {
        let process = self
            .process(&handle.container_id)
            .ok_or_else(|| Error::no_such_container(&handle.container_id))?;
        Ok(process.wait().await)
    }

    async fn stop(&self, handle: &ExecutionHandle) -> Result<()> {
        if let Some(process) = self.process(&handle.container_id) {
            let _ = process.signal("KILL");
        }
        Ok(())
    }

    async fn delete(&self, handle: &JobHandle) -> Result<()> {
        self.specs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.container_id);
        // Dropping the process releases its temp root.
        if let Some(process) = self
            .processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.container_id)
        {
            let _ = process.signal("KILL");
        }
        Ok(())
    }

    async fn fetch_logs(
        &self,
        handle: &ExecutionHandle,
        cursor: u64,
    ) -> Result<(Vec<LogChunk>, u64)> {
        let process = self
            .process(&handle.container_id)
            .ok_or_else(|| Error::no_such_container(&handle.container_id))?;
        let chunks = process.log_chunks();
        let start = (cursor as usize).min(chunks.len());
        Ok((chunks[start..].to_vec(), chunks.len() as u64))
    }

    async fn list_managed(&self, instance_id: &str) -> Result<Vec<ManagedResource>> {
        let mut tags = HashMap::new();
        tags.insert(TAG_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
        tags.insert(TAG_INSTANCE.to_string(), instance_id.to_string());
        Ok(self
            .processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .map(|id| ManagedResource {
                resource_id: format!("wasi-{}", short_id(id)),
                resource_type: "sandbox".to_string(),
                tags: tags.clone(),
            })
            .collect())
    }
}
