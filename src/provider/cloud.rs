//! Generic cloud adapter.
//!
//! Vendor SDKs sit behind the narrow `CloudApi` capability; everything a
//! backend shares — state polling, reachability mapping, exit-code
//! translation, best-effort teardown — lives once in `CloudJobProvider`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::constants::{
    AGENT_PORT, EXIT_CODE_SIGKILL, WAIT_FINISHED_POLL, WAIT_FINISHED_POLL_FAST,
    WAIT_RUNNING_POLL, WAIT_RUNNING_POLL_FAST,
};
use crate::error::{Error, Result};
use crate::logsfmt::LogChunk;

use super::jobspec::JobSpec;
use super::{
    ExecutionHandle, JobHandle, JobProvider, ManagedResource, ProviderKind, RunningInfo,
    RunningStatus,
};

/// Coarse execution state every backend can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Degraded,
    Stopped,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded
                | ExecutionState::Failed
                | ExecutionState::Degraded
                | ExecutionState::Stopped
        )
    }

    /// Exit code the engine records for a terminal state.
    pub fn exit_code(&self) -> i64 {
        match self {
            ExecutionState::Succeeded => 0,
            ExecutionState::Failed | ExecutionState::Degraded => 1,
            ExecutionState::Stopped => EXIT_CODE_SIGKILL,
            ExecutionState::Pending | ExecutionState::Running => 0,
        }
    }
}

/// The vendor-SDK surface a backend must cover.
#[async_trait]
pub trait CloudApi: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Creates the job definition; returns its provider-side name.
    async fn create_job(&self, spec: &JobSpec) -> Result<String>;

    /// Starts one execution of the job; returns the execution name.
    async fn run_job(&self, job_name: &str) -> Result<String>;

    async fn execution_state(
        &self,
        job_name: &str,
        execution_name: &str,
    ) -> Result<ExecutionState>;

    /// IP of a RUNNING execution, when the backend has assigned one.
    async fn execution_address(
        &self,
        job_name: &str,
        execution_name: &str,
    ) -> Result<Option<String>>;

    async fn stop_execution(&self, job_name: &str, execution_name: &str) -> Result<()>;

    async fn delete_job(&self, job_name: &str) -> Result<()>;

    async fn read_logs(
        &self,
        job_name: &str,
        execution_name: &str,
        cursor: u64,
    ) -> Result<(Vec<LogChunk>, u64)>;

    async fn list_jobs(&self, instance_id: &str) -> Result<Vec<ManagedResource>>;
}

/// `JobProvider` over any `CloudApi`.
pub struct CloudJobProvider<A> {
    api: A,
    fast_poll: bool,
}

impl<A: CloudApi> CloudJobProvider<A> {
    pub fn new(api: A, fast_poll: bool) -> Self {
        CloudJobProvider { api, fast_poll }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn running_poll(&self) -> Duration {
        if self.fast_poll {
            WAIT_RUNNING_POLL_FAST
        } else {
            WAIT_RUNNING_POLL
        }
    }

    fn finished_poll(&self) -> Duration {
        if self.fast_poll {
            WAIT_FINISHED_POLL_FAST
        } else {
            WAIT_FINISHED_POLL
        }
    }
}

#[async_trait]
impl<A: CloudApi> JobProvider for CloudJobProvider<A> {
    fn kind(&self) -> ProviderKind {
        self.api.kind()
    }

    async fn register_workload(&self, spec: &JobSpec) -> Result<JobHandle> {
        let job_name = self.api.create_job(spec).await.map_err(|e| {
            Error::ProvisionFailed {
                id: spec.container_id.clone(),
                reason: e.to_string(),
            }
        })?;
        debug!(container_id = %spec.container_id, job = %job_name, "job registered");
        Ok(JobHandle {
            container_id: spec.container_id.clone(),
            job_name,
        })
    }

    async fn start_execution(&self, handle: &JobHandle) -> Result<ExecutionHandle> {
        let execution_name = self.api.run_job(&handle.job_name).await.map_err(|e| {
            Error::ProvisionFailed {
                id: handle.container_id.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(ExecutionHandle {
            container_id: handle.container_id.clone(),
            job_name: handle.job_name.clone(),
            execution_name,
        })
    }

    async fn wait_running(
        &self,
        handle: &ExecutionHandle,
        timeout: Duration,
    ) -> Result<RunningStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .api
                .execution_state(&handle.job_name, &handle.execution_name)
                .await
            {
                Ok(ExecutionState::Running) => {
                    let ip = self
                        .api
                        .execution_address(&handle.job_name, &handle.execution_name)
                        .await?;
                    if let Some(ip) = ip {
                        return Ok(RunningStatus::Running(RunningInfo {
                            addr: format!("{ip}:{AGENT_PORT}"),
                        }));
                    }
                    // RUNNING but no address yet; keep polling.
                }
                Ok(ExecutionState::Succeeded) => return Ok(RunningStatus::FastExit(0)),
                Ok(ExecutionState::Failed) | Ok(ExecutionState::Degraded) => {
                    return Ok(RunningStatus::FastExit(1))
                }
                Ok(ExecutionState::Stopped) => {
                    return Err(Error::ExecutionStopped(handle.execution_name.clone()))
                }
                Ok(ExecutionState::Pending) => {}
                // Transient poll failures retry until the deadline.
                Err(e) => debug!(execution = %handle.execution_name, error = %e, "state poll failed"),
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    operation: format!("wait_running({})", handle.execution_name),
                    duration: timeout,
                });
            }
            tokio::time::sleep(self.running_poll()).await;
        }
    }

    async fn wait_finished(&self, handle: &ExecutionHandle) -> Result<i64> {
        loop {
            match self
                .api
                .execution_state(&handle.job_name, &handle.execution_name)
                .await
            {
                Ok(state) if state.is_terminal() => return Ok(state.exit_code()),
                Ok(_) => {}
                Err(e) => debug!(execution = %handle.execution_name, error = %e, "state poll failed"),
            }
            tokio::time::sleep(self.finished_poll()).await;
        }
    }

    async fn stop(&self, handle: &ExecutionHandle) -> Result<()> {
        if let Err(e) = self
            .api
            .stop_execution(&handle.job_name, &handle.execution_name)
            .await
        {
            warn!(execution = %handle.execution_name, error = %e, "stop was best-effort");
        }
        Ok(())
    }

    async fn delete(&self, handle: &JobHandle) -> Result<()> {
        if let Err(e) = self.api.delete_job(&handle.job_name).await {
            warn!(job = %handle.job_name, error = %e, "delete was best-effort");
        }
        Ok(())
    }

    async fn fetch_logs(
        &self,
        handle: &ExecutionHandle,
        cursor: u64,
    ) -> Result<(Vec<LogChunk>, u64)> {
        self.api
            .read_logs(&handle.job_name, &handle.execution_name, cursor)
            .await
    }

    async fn list_managed(&self, instance_id: &str) -> Result<Vec<ManagedResource>> {
        self.api.list_jobs(instance_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::sim::SimulatedCloudApi;
    use super::*;
    use crate::provider::jobspec::MemberSpec;

    fn spec(id: &str) -> JobSpec {
        JobSpec {
            container_id: id.to_string(),
            entrypoint: vec!["agent".to_string()],
            cpu_millis: 256,
            memory_mb: 512,
            tags: Default::default(),
            members: vec![MemberSpec {
                container_id: id.to_string(),
                image: "alpine".to_string(),
                command: vec!["tail".into(), "-f".into(), "/dev/null".into()],
                env: vec![],
                binds: vec![],
                working_dir: None,
            }],
        }
    }

    fn provider(api: SimulatedCloudApi) -> CloudJobProvider<SimulatedCloudApi> {
        CloudJobProvider::new(api, true)
    }

    #[tokio::test]
    async fn running_execution_reports_agent_address() {
        let api = SimulatedCloudApi::new(ProviderKind::CloudRun);
        api.script_states(&[ExecutionState::Pending, ExecutionState::Running]);
        api.set_address("10.0.0.7");
        let provider = provider(api);

        let job = provider.register_workload(&spec("c1")).await.unwrap();
        let exec = provider.start_execution(&job).await.unwrap();
        let status = provider
            .wait_running(&exec, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            status,
            RunningStatus::Running(RunningInfo {
                addr: "10.0.0.7:9111".to_string()
            })
        );
    }

    #[tokio::test]
    async fn fast_exit_mappings() {
        let api = SimulatedCloudApi::new(ProviderKind::Ecs);
        api.script_states(&[ExecutionState::Succeeded]);
        let provider = provider(api);
        let job = provider.register_workload(&spec("c2")).await.unwrap();
        let exec = provider.start_execution(&job).await.unwrap();
        let status = provider
            .wait_running(&exec, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status, RunningStatus::FastExit(0));

        let api = SimulatedCloudApi::new(ProviderKind::Ecs);
        api.script_states(&[ExecutionState::Failed]);
        let provider = self::provider(api);
        let job = provider.register_workload(&spec("c3")).await.unwrap();
        let exec = provider.start_execution(&job).await.unwrap();
        let status = provider
            .wait_running(&exec, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status, RunningStatus::FastExit(1));
    }

    #[tokio::test]
    async fn stopped_before_running_is_an_error() {
        let api = SimulatedCloudApi::new(ProviderKind::ContainerApps);
        api.script_states(&[ExecutionState::Stopped]);
        let provider = provider(api);
        let job = provider.register_workload(&spec("c4")).await.unwrap();
        let exec = provider.start_execution(&job).await.unwrap();
        let err = provider
            .wait_running(&exec, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionStopped(_)));
    }

    #[tokio::test]
    async fn wait_running_times_out_on_endless_pending() {
        let api = SimulatedCloudApi::new(ProviderKind::Lambda);
        api.script_states(&[ExecutionState::Pending]);
        let provider = provider(api);
        let job = provider.register_workload(&spec("c5")).await.unwrap();
        let exec = provider.start_execution(&job).await.unwrap();
        let err = provider
            .wait_running(&exec, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn wait_finished_translates_exit_codes() {
        let api = SimulatedCloudApi::new(ProviderKind::GcpFunctions);
        api.script_states(&[
            ExecutionState::Running,
            ExecutionState::Running,
            ExecutionState::Stopped,
        ]);
        let provider = provider(api);
        let job = provider.register_workload(&spec("c6")).await.unwrap();
        let exec = provider.start_execution(&job).await.unwrap();
        assert_eq!(provider.wait_finished(&exec).await.unwrap(), 137);
    }

    #[tokio::test]
    async fn teardown_is_best_effort() {
        let api = SimulatedCloudApi::new(ProviderKind::AzureFunctions);
        api.fail_teardown();
        let provider = provider(api);
        let job = provider.register_workload(&spec("c7")).await.unwrap();
        let exec = provider.start_execution(&job).await.unwrap();
        assert!(provider.stop(&exec).await.is_ok());
        assert!(provider.delete(&job).await.is_ok());
    }

    #[tokio::test]
    async fn register_failure_maps_to_provision_error() {
        let api = SimulatedCloudApi::new(ProviderKind::Ecs);
        api.fail_create();
        let provider = provider(api);
        let err = provider.register_workload(&spec("c8")).await.unwrap_err();
        assert!(matches!(err, Error::ProvisionFailed { .. }));
        assert_eq!(err.status_code(), 500);
    }
}
