//! Container lifecycle operations.
//!
//! `start` is the long pole: it marks the container running, runs pod
//! coordination, provisions the workload through the provider, and leaves
//! a background poller watching for the execution's exit. Every other
//! transition funnels through [`EngineState::stop_container`] so the wait
//! channel fires exactly once per start.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::agent::wait_agent_healthy;
use crate::constants::{
    is_idle_sentinel, validate_container_name, AGENT_CONNECT_TIMEOUT, EXIT_CODE_SIGKILL, MAIN_PID,
    REVERSE_HELPER_GRACE, WAIT_RUNNING_TIMEOUT,
};
use crate::error::{Error, Result};
use crate::ids;
use crate::image::merge_image_config;
use crate::ipam::{mac_from_ip, DEFAULT_GATEWAY, DEFAULT_SUBNET};
use crate::orphan::OrphanEntry;
use crate::pod::{StartDisposition, POD_LABEL};
use crate::provider::{ExecutionHandle, JobSpec, RunningStatus};
use crate::types::{
    BackendState, Container, ContainerConfig, ContainerState, ContainerStatus, EndpointSettings,
    HostConfig, MountPoint, NetworkSettings,
};

use super::{Engine, DEFAULT_NETWORK};

impl Engine {
    /// Creates a container in the `created` state and returns its ID.
    pub async fn create_container(
        &self,
        mut config: ContainerConfig,
        host_config: HostConfig,
        name: Option<&str>,
    ) -> Result<String> {
        if config.image.is_empty() {
            return Err(Error::InvalidParameter("image is required".into()));
        }
        let name = match name {
            Some(n) => {
                validate_container_name(n)
                    .map_err(|reason| Error::InvalidParameter(reason.to_string()))?;
                n.to_string()
            }
            None => ids::generate_name(),
        };

        if let Some(image) = self.resolver.resolve(&config.image).await? {
            merge_image_config(&mut config, &image);
        }
        self.ensure_image(&config.image)?;

        let id = ids::generate_id();
        let token = self
            .config
            .agent_token
            .clone()
            .unwrap_or_else(ids::generate_token);

        let bridge = self.state.get_network(DEFAULT_NETWORK)?;
        let ip = self
            .state
            .ipam
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .allocate_ip(DEFAULT_SUBNET)?;
        let mut networks = HashMap::new();
        networks.insert(
            DEFAULT_NETWORK.to_string(),
            EndpointSettings {
                network_id: bridge.id.clone(),
                ip_address: ip.clone(),
                gateway: DEFAULT_GATEWAY.to_string(),
                mac_address: mac_from_ip(&ip),
                ip_prefix_len: 16,
            },
        );

        let mounts = host_config.binds.iter().map(|b| parse_bind(b)).collect();
        let container = Container {
            id: id.clone(),
            name: format!("/{name}"),
            created: Utc::now(),
            state: ContainerState::default(),
            config,
            host_config,
            network_settings: NetworkSettings { networks },
            mounts,
        };
        let backend = BackendState {
            agent_token: token,
            ..Default::default()
        };

        if let Err(e) = self.state.insert_container(container, backend) {
            self.state
                .ipam
                .lock()
                .unwrap_or_else(|poison| poison.into_inner())
                .release_ip(DEFAULT_SUBNET, &ip);
            return Err(e);
        }
        self.state
            .update_network(&bridge.id, |n| n.containers.push(id.clone()))?;
        info!(container_id = %ids::short_id(&id), name = %name, "container created");
        Ok(id)
    }

    /// Starts a container, provisioning its workload unless pod
    /// coordination defers to a later sibling.
    pub async fn start_container(self: &Arc<Self>, reference: &str) -> Result<()> {
        let id = self.state.resolve(reference)?;
        let container = self.state.get_container(&id)?;
        if container.state.running {
            return Err(Error::NotModified);
        }

        // Visible as running before provisioning; failures roll back.
        self.state.update_container(&id, |c| {
            c.state.status = ContainerStatus::Running;
            c.state.running = true;
            c.state.pid = MAIN_PID;
            c.state.exit_code = 0;
            c.state.started_at = Some(Utc::now());
            c.state.finished_at = None;
        })?;
        self.state.create_wait(&id)?;

        let member_ids = match container.config.labels.get(POD_LABEL) {
            Some(pod_id) => {
                let siblings = self.state.containers_with_label(POD_LABEL, pod_id)?;
                let sibling_ids: Vec<String> = siblings.iter().map(|c| c.id.clone()).collect();
                match self.pods.mark_started(pod_id, &id, &sibling_ids) {
                    StartDisposition::Single => vec![id.clone()],
                    StartDisposition::Defer => {
                        debug!(
                            container_id = %ids::short_id(&id),
                            pod = %pod_id,
                            "start deferred until the pod is complete"
                        );
                        return Ok(());
                    }
                    StartDisposition::Dispatch { members } => members,
                }
            }
            None => vec![id.clone()],
        };

        if let Err(e) = self.provision(&member_ids).await {
            self.rollback_start(&member_ids);
            return Err(e);
        }
        Ok(())
    }

    /// Stops a running container. The provider stop is best-effort; the
    /// recorded exit code is 0.
    pub async fn stop_container(&self, reference: &str, _timeout: Option<u64>) -> Result<()> {
        let id = self.state.resolve(reference)?;
        let container = self.state.get_container(&id)?;
        if !container.state.running {
            return Err(Error::NotModified);
        }

        let backend = self.state.get_backend(&id)?;
        if !backend.execution_name.is_empty() {
            let handle = self.execution_handle(&id, &backend.job_name, &backend.execution_name);
            let _ = self.provider().stop(&handle).await;
        }
        self.agents.remove(&id);
        self.state.stop_container(&id, 0)?;
        info!(container_id = %ids::short_id(&id), "container stopped");
        Ok(())
    }

    /// Delivers a signal. Every accepted signal terminates the execution;
    /// SIGKILL records exit code 137, everything else 0.
    pub async fn kill_container(&self, reference: &str, signal: &str) -> Result<()> {
        let id = self.state.resolve(reference)?;
        let container = self.state.get_container(&id)?;
        if !container.state.running {
            return Err(Error::not_running(&id));
        }

        if let Some(process) = self.wasi.process(&id) {
            process.signal(signal)?;
        } else {
            validate_signal(signal)?;
        }
        let code = if is_kill_signal(signal) {
            EXIT_CODE_SIGKILL
        } else {
            0
        };

        let backend = self.state.get_backend(&id)?;
        if !backend.execution_name.is_empty() {
            let handle = self.execution_handle(&id, &backend.job_name, &backend.execution_name);
            let _ = self.provider().stop(&handle).await;
        }
        self.agents.remove(&id);
        self.state.stop_container(&id, code)?;
        info!(container_id = %ids::short_id(&id), signal, code, "container killed");
        Ok(())
    }

    /// Stops the container if running, then starts it again.
    pub async fn restart_container(self: &Arc<Self>, reference: &str) -> Result<()> {
        let id = self.state.resolve(reference)?;
        if self.state.get_container(&id)?.state.running {
            self.stop_container(&id, None).await?;
        }
        self.start_container(&id).await
    }

    /// Removes a container, tearing down its provider job and freeing its
    /// name and addresses. `force` stops a running container first.
    pub async fn remove_container(&self, reference: &str, force: bool) -> Result<()> {
        let id = self.state.resolve(reference)?;
        let container = self.state.get_container(&id)?;

        if container.state.running {
            if !force {
                return Err(Error::remove_running(ids::short_id(&id)));
            }
            let backend = self.state.get_backend(&id)?;
            if !backend.execution_name.is_empty() {
                let handle =
                    self.execution_handle(&id, &backend.job_name, &backend.execution_name);
                let _ = self.provider().stop(&handle).await;
            }
            self.agents.remove(&id);
            self.state.stop_container(&id, EXIT_CODE_SIGKILL)?;
        }

        let backend = self.state.get_backend(&id)?;
        if !backend.job_name.is_empty() {
            let handle = self.job_handle(&id, &backend.job_name);
            if let Err(e) = self.provider().delete(&handle).await {
                warn!(container_id = %ids::short_id(&id), error = %e, "job deletion failed");
            }
            if !self.is_local() {
                let _ = self.registry.mark_cleaning(&backend.job_name);
                let _ = self.registry.mark_cleaned(&backend.job_name);
            }
        }

        for endpoint in container.network_settings.networks.values() {
            if let Ok(network) = self.state.get_network(&endpoint.network_id) {
                self.state
                    .ipam
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .release_ip(&network.subnet, &endpoint.ip_address);
                let _ = self
                    .state
                    .update_network(&network.id, |n| n.containers.retain(|c| c != &id));
            }
        }
        if let Some(pod_id) = container.config.labels.get(POD_LABEL) {
            self.pods.forget_member(pod_id, &id);
        }
        self.agents.forget(&id);
        self.state.remove_container(&id)?;
        info!(container_id = %ids::short_id(&id), "container removed");
        Ok(())
    }

    /// Blocks until the container leaves `running` and returns its exit
    /// code. Immediate when already exited; resolves promptly on remove.
    pub async fn wait_container(&self, reference: &str) -> Result<i64> {
        let id = self.state.resolve(reference)?;
        let container = self.state.get_container(&id)?;
        if !container.state.running {
            return Ok(container.state.exit_code);
        }
        if let Some(latch) = self.state.wait_latch(&id)? {
            latch.wait().await;
        }
        Ok(self
            .state
            .get_container(&id)
            .map(|c| c.state.exit_code)
            .unwrap_or(0))
    }

    // -------------------------------------------------------------------------
    // Provisioning
    // -------------------------------------------------------------------------

    /// Provisions one workload for `member_ids` (sorted, main first).
    async fn provision(self: &Arc<Self>, member_ids: &[String]) -> Result<()> {
        let mut members = Vec::with_capacity(member_ids.len());
        for id in member_ids {
            members.push(self.state.get_container(id)?);
        }
        let main_id = members[0].id.clone();
        let token = self.state.get_backend(&main_id)?.agent_token;
        let refs: Vec<&Container> = members.iter().collect();
        let spec = JobSpec::build(&refs, &token, &self.config);
        let provider = self.provider();

        let job = provider.register_workload(&spec).await?;
        if !self.is_local() {
            self.registry.register(OrphanEntry::job(
                &main_id,
                provider.kind(),
                &job.job_name,
                &self.config.instance_id,
            ))?;
        }
        if self.config.reverse_mode() && !self.is_local() {
            self.agents.prepare(&main_id, &token);
        }

        let execution = match provider.start_execution(&job).await {
            Ok(execution) => execution,
            Err(e) => {
                let _ = provider.delete(&job).await;
                self.discard_orphan(&job.job_name);
                return Err(e);
            }
        };
        if !self.is_local() {
            self.registry.activate(&job.job_name)?;
        }
        for member in &members {
            self.state.update_backend(&member.id, |b| {
                b.job_name = job.job_name.clone();
                b.execution_name = execution.execution_name.clone();
            })?;
        }

        let status = match provider.wait_running(&execution, WAIT_RUNNING_TIMEOUT).await {
            Ok(status) => status,
            Err(e) => {
                let _ = provider.stop(&execution).await;
                let _ = provider.delete(&job).await;
                self.discard_orphan(&job.job_name);
                return Err(e);
            }
        };

        match status {
            RunningStatus::FastExit(code) => {
                self.capture_remote_logs(&execution).await;
                for member in &members {
                    self.state.stop_container(&member.id, code)?;
                }
                info!(
                    container_id = %ids::short_id(&main_id),
                    code,
                    "execution finished before reaching running"
                );
            }
            RunningStatus::Running(info) => {
                for member in &members {
                    self.state
                        .update_backend(&member.id, |b| b.agent_address = info.addr.clone())?;
                }
                if !self.is_local() {
                    if self.config.reverse_mode() {
                        if let Err(e) = self
                            .agents
                            .wait_connected(&main_id, AGENT_CONNECT_TIMEOUT)
                            .await
                        {
                            warn!(
                                container_id = %ids::short_id(&main_id),
                                error = %e,
                                "reverse agent never dialed back"
                            );
                        }
                    } else if let Err(e) = wait_agent_healthy(
                        &self.http,
                        &info.addr,
                        self.config.agent_health_timeout(),
                    )
                    .await
                    {
                        // Health is advisory: the execution is RUNNING, so
                        // the container stays up and exec falls back to
                        // synthetic replay.
                        warn!(
                            container_id = %ids::short_id(&main_id),
                            error = %e,
                            "agent health probe failed"
                        );
                    }
                }
                self.spawn_exit_poller(member_ids.to_vec(), execution.clone());
                if self.config.reverse_mode() && !is_idle_sentinel(&spec.members[0].command) {
                    self.spawn_helper_grace(main_id.clone(), execution);
                }
                info!(container_id = %ids::short_id(&main_id), "container running");
            }
        }
        Ok(())
    }

    /// Reverts members to `created` after a failed provisioning, firing
    /// any wait latch so waiters never hang on a start that went nowhere.
    fn rollback_start(&self, member_ids: &[String]) {
        for id in member_ids {
            let _ = self
                .state
                .update_container(id, |c| c.state = ContainerState::default());
            if let Ok(Some(latch)) = self.state.wait_latch(id) {
                latch.set();
            }
        }
    }

    fn discard_orphan(&self, job_name: &str) {
        if self.is_local() {
            return;
        }
        let _ = self.registry.mark_cleaning(job_name);
        let _ = self.registry.mark_cleaned(job_name);
    }

    /// Copies the execution's log records into the engine-side buffer so
    /// they outlive the provider resource.
    async fn capture_remote_logs(&self, execution: &ExecutionHandle) {
        if self.is_local() {
            return;
        }
        match self.provider().fetch_logs(execution, 0).await {
            Ok((chunks, _)) => {
                for chunk in chunks {
                    let _ = self.state.append_log(&execution.container_id, chunk);
                }
            }
            Err(e) => debug!(error = %e, "could not capture execution logs"),
        }
    }

    /// Watches for the execution's terminal state and resolves the wait
    /// channel. Races against the container's own latch so a local stop or
    /// kill ends the poll early.
    fn spawn_exit_poller(self: &Arc<Self>, member_ids: Vec<String>, execution: ExecutionHandle) {
        let engine = self.clone();
        tokio::spawn(async move {
            let latch = engine
                .state
                .wait_latch(&execution.container_id)
                .ok()
                .flatten();
            let provider = engine.provider();
            let code = tokio::select! {
                result = provider.wait_finished(&execution) => match result {
                    Ok(code) => code,
                    Err(e) => {
                        debug!(error = %e, "exit poller stopped");
                        return;
                    }
                },
                _ = async {
                    match &latch {
                        Some(latch) => latch.wait().await,
                        None => std::future::pending().await,
                    }
                } => return,
            };

            engine.capture_remote_logs(&execution).await;
            for id in &member_ids {
                // A restart may have re-provisioned under a new execution.
                let current = engine
                    .state
                    .get_backend(id)
                    .map(|b| b.execution_name)
                    .unwrap_or_default();
                if current == execution.execution_name {
                    let _ = engine.state.stop_container(id, code);
                }
            }
            engine.agents.remove(&execution.container_id);
            debug!(
                container_id = %ids::short_id(&execution.container_id),
                code,
                "execution finished"
            );

            for id in &member_ids {
                let auto_remove = engine
                    .state
                    .get_container(id)
                    .map(|c| c.host_config.auto_remove)
                    .unwrap_or(false);
                if auto_remove {
                    let _ = engine.remove_container(id, true).await;
                }
            }
        });
    }

    /// Reverse-mode helpers that are not the idle sentinel are stopped
    /// after a short grace period; the exit poller wins if the provider
    /// reports completion first.
    fn spawn_helper_grace(self: &Arc<Self>, container_id: String, execution: ExecutionHandle) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REVERSE_HELPER_GRACE).await;
            let running = engine
                .state
                .get_container(&container_id)
                .map(|c| c.state.running)
                .unwrap_or(false);
            if !running {
                return;
            }
            debug!(
                container_id = %ids::short_id(&container_id),
                "auto-stopping reverse-mode helper"
            );
            let _ = engine.provider().stop(&execution).await;
            engine.agents.remove(&container_id);
            let _ = engine.state.stop_container(&container_id, 0);
        });
    }
}

/// Parses a `host:container[:ro]` bind into a mount point.
fn parse_bind(bind: &str) -> MountPoint {
    let parts: Vec<&str> = bind.split(':').collect();
    if parts.len() >= 2 {
        MountPoint {
            mount_type: "bind".to_string(),
            source: parts[0].to_string(),
            destination: parts[1].to_string(),
            rw: parts.get(2).copied() != Some("ro"),
        }
    } else {
        MountPoint {
            mount_type: "bind".to_string(),
            source: String::new(),
            destination: bind.to_string(),
            rw: true,
        }
    }
}

fn is_kill_signal(signal: &str) -> bool {
    matches!(signal.trim_start_matches("SIG"), "KILL" | "9")
}

/// Accepts POSIX signal names (with or without the SIG prefix) and
/// numbers; anything else is a 400.
fn validate_signal(signal: &str) -> Result<()> {
    let name = signal.trim_start_matches("SIG");
    let known = matches!(
        name,
        "HUP" | "INT" | "QUIT" | "KILL" | "USR1" | "USR2" | "PIPE" | "ALRM" | "TERM" | "STOP"
            | "CONT" | "WINCH"
    );
    if known || name.parse::<u8>().is_ok() {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!("Invalid signal: {signal}")))
    }
}

/// Minimal container record for resources recovered from the registry.
pub(crate) fn shell_container(id: &str, name: &str) -> Container {
    Container {
        id: id.to_string(),
        name: format!("/{name}"),
        created: Utc::now(),
        state: ContainerState {
            status: ContainerStatus::Exited,
            ..Default::default()
        },
        config: ContainerConfig::default(),
        host_config: HostConfig::default(),
        network_settings: NetworkSettings::default(),
        mounts: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{cloud_engine, sandbox_engine};
    use super::*;
    use crate::provider::{ExecutionState, ProviderKind};

    fn config(image: &str, cmd: &[&str]) -> ContainerConfig {
        ContainerConfig {
            image: image.to_string(),
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    // -------------------------------------------------------------------------
    // Create
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn create_assigns_network_endpoint_and_name() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(config("alpine", &["echo", "hi"]), HostConfig::default(), Some("web"))
            .await
            .unwrap();

        let c = engine.inspect_container("web").unwrap();
        assert_eq!(c.id, id);
        assert_eq!(c.name, "/web");
        assert_eq!(c.state.status, ContainerStatus::Created);
        let endpoint = &c.network_settings.networks[DEFAULT_NETWORK];
        assert_eq!(endpoint.ip_address, "172.17.0.2");
        assert_eq!(endpoint.gateway, "172.17.0.1");
        assert_eq!(endpoint.mac_address, "02:42:ac:11:00:02");
    }

    #[tokio::test]
    async fn create_rejects_duplicate_names_with_conflict() {
        let (engine, _dir) = sandbox_engine();
        engine
            .create_container(config("alpine", &["true"]), HostConfig::default(), Some("web"))
            .await
            .unwrap();
        let err = engine
            .create_container(config("alpine", &["true"]), HostConfig::default(), Some("web"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert_eq!(
            err.to_string(),
            "Conflict. The container name \"web\" is already in use"
        );
    }

    #[tokio::test]
    async fn create_merges_image_defaults() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(
                ContainerConfig {
                    image: "alpine:3.19".to_string(),
                    ..Default::default()
                },
                HostConfig::default(),
                None,
            )
            .await
            .unwrap();
        let c = engine.inspect_container(&id).unwrap();
        assert_eq!(c.config.cmd, vec!["/bin/sh"], "image default cmd fills in");
        assert!(c.config.env.iter().any(|e| e.starts_with("PATH=")));
    }

    #[tokio::test]
    async fn invalid_names_are_bad_requests() {
        let (engine, _dir) = sandbox_engine();
        let err = engine
            .create_container(config("alpine", &["true"]), HostConfig::default(), Some("a/b"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    // -------------------------------------------------------------------------
    // Sandbox lifecycle
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn fast_command_runs_to_completion() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(config("alpine", &["echo", "hello"]), HostConfig::default(), None)
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let c = engine.inspect_container(&id).unwrap();
        assert_eq!(c.state.status, ContainerStatus::Exited);
        assert_eq!(c.state.exit_code, 0);
        assert!(c.state.finished_at.is_some());
        assert_eq!(engine.wait_container(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sentinel_runs_until_killed_with_137() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(
                config("alpine", &["tail", "-f", "/dev/null"]),
                HostConfig::default(),
                None,
            )
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();
        assert!(engine.inspect_container(&id).unwrap().state.running);

        let waiter = {
            let engine = engine.clone();
            let id = id.clone();
            tokio::spawn(async move { engine.wait_container(&id).await })
        };
        engine.kill_container(&id, "SIGKILL").await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), 137);
        let c = engine.inspect_container(&id).unwrap();
        assert_eq!(c.state.exit_code, 137);
        assert_eq!(c.state.status, ContainerStatus::Exited);
    }

    #[tokio::test]
    async fn start_twice_is_not_modified() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(
                config("alpine", &["tail", "-f", "/dev/null"]),
                HostConfig::default(),
                None,
            )
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();
        let err = engine.start_container(&id).await.unwrap_err();
        assert_eq!(err.status_code(), 304);
    }

    #[tokio::test]
    async fn stop_when_not_running_is_not_modified() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(config("alpine", &["true"]), HostConfig::default(), None)
            .await
            .unwrap();
        let err = engine.stop_container(&id, None).await.unwrap_err();
        assert_eq!(err.status_code(), 304);
    }

    #[tokio::test]
    async fn kill_when_not_running_is_conflict() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(config("alpine", &["true"]), HostConfig::default(), None)
            .await
            .unwrap();
        let err = engine.kill_container(&id, "SIGKILL").await.unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.to_string(), format!("Container {id} is not running"));
    }

    #[tokio::test]
    async fn remove_running_requires_force() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(
                config("alpine", &["tail", "-f", "/dev/null"]),
                HostConfig::default(),
                Some("keeper"),
            )
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let err = engine.remove_container(&id, false).await.unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert!(err
            .to_string()
            .starts_with(&format!("You cannot remove a running container {}", ids::short_id(&id))));

        engine.remove_container(&id, true).await.unwrap();
        assert!(engine.inspect_container(&id).is_err());
        // The name is free again.
        engine
            .create_container(config("alpine", &["true"]), HostConfig::default(), Some("keeper"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn restart_runs_the_command_again() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(
                config("alpine", &["tail", "-f", "/dev/null"]),
                HostConfig::default(),
                None,
            )
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();
        engine.restart_container(&id).await.unwrap();
        let c = engine.inspect_container(&id).unwrap();
        assert!(c.state.running, "restart leaves the container running");
        engine.kill_container(&id, "KILL").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_signal_is_invalid_parameter() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(
                config("alpine", &["tail", "-f", "/dev/null"]),
                HostConfig::default(),
                None,
            )
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();
        let err = engine.kill_container(&id, "SIGBOGUS").await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        engine.kill_container(&id, "KILL").await.unwrap();
    }

    // -------------------------------------------------------------------------
    // Cloud lifecycle
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn cloud_start_records_backend_handles() {
        let (engine, provider, _dir) = cloud_engine(ProviderKind::CloudRun);
        provider
            .api()
            .script_states(&[ExecutionState::Pending, ExecutionState::Running]);
        provider.api().set_address("10.1.2.3");

        let id = engine
            .create_container(
                config("alpine", &["tail", "-f", "/dev/null"]),
                HostConfig::default(),
                None,
            )
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let backend = engine.inspect_backend(&id).unwrap();
        assert!(backend.job_name.starts_with("sim-job-"));
        assert!(!backend.execution_name.is_empty());
        assert_eq!(backend.agent_address, "10.1.2.3:9111");
        assert!(engine.inspect_container(&id).unwrap().state.running);

        engine.stop_container(&id, None).await.unwrap();
        assert!(!provider.api().stopped_executions().is_empty());
        engine.remove_container(&id, false).await.unwrap();
        assert_eq!(provider.api().deleted_jobs().len(), 1);
    }

    #[tokio::test]
    async fn cloud_fast_exit_marks_exited_and_captures_logs() {
        let (engine, provider, _dir) = cloud_engine(ProviderKind::Ecs);
        provider.api().script_states(&[ExecutionState::Succeeded]);
        provider
            .api()
            .push_log(crate::logsfmt::LogChunk::stdout("done\n"));

        let id = engine
            .create_container(config("alpine", &["echo", "done"]), HostConfig::default(), None)
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let c = engine.inspect_container(&id).unwrap();
        assert_eq!(c.state.status, ContainerStatus::Exited);
        assert_eq!(c.state.exit_code, 0);
        let chunks = engine.state.log_chunks(&id).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, b"done\n");
    }

    #[tokio::test]
    async fn failed_provisioning_rolls_back_to_created() {
        let (engine, provider, _dir) = cloud_engine(ProviderKind::Ecs);
        provider.api().fail_create();

        let id = engine
            .create_container(config("alpine", &["true"]), HostConfig::default(), None)
            .await
            .unwrap();
        let err = engine.start_container(&id).await.unwrap_err();
        assert!(matches!(err, Error::ProvisionFailed { .. }));

        let c = engine.inspect_container(&id).unwrap();
        assert_eq!(c.state.status, ContainerStatus::Created);
        assert!(!c.state.running);
        assert_eq!(c.state.pid, 0);
    }

    #[tokio::test]
    async fn pod_members_dispatch_once_and_share_handles() {
        let (engine, provider, _dir) = cloud_engine(ProviderKind::ContainerApps);
        provider
            .api()
            .script_states(&[ExecutionState::Running]);

        let mut cfg_a = config("alpine", &["tail", "-f", "/dev/null"]);
        cfg_a.labels.insert(POD_LABEL.to_string(), "p1".to_string());
        let mut cfg_b = config("busybox", &["echo", "helper"]);
        cfg_b.labels.insert(POD_LABEL.to_string(), "p1".to_string());

        let a = engine
            .create_container(cfg_a, HostConfig::default(), Some("pod-main"))
            .await
            .unwrap();
        let b = engine
            .create_container(cfg_b, HostConfig::default(), Some("pod-helper"))
            .await
            .unwrap();

        engine.start_container(&a).await.unwrap();
        assert!(
            engine.inspect_backend(&a).unwrap().job_name.is_empty(),
            "first member defers provisioning"
        );
        assert!(engine.inspect_container(&a).unwrap().state.running);

        engine.start_container(&b).await.unwrap();
        let backend_a = engine.inspect_backend(&a).unwrap();
        let backend_b = engine.inspect_backend(&b).unwrap();
        assert!(!backend_a.job_name.is_empty());
        assert_eq!(backend_a.job_name, backend_b.job_name, "pod shares one job");
        assert_eq!(backend_a.execution_name, backend_b.execution_name);
        assert_eq!(provider.api().created_jobs().len(), 1, "single dispatch");
    }

    #[tokio::test]
    async fn bind_parsing_handles_ro_suffix() {
        let mount = parse_bind("/host/data:/data:ro");
        assert_eq!(mount.source, "/host/data");
        assert_eq!(mount.destination, "/data");
        assert!(!mount.rw);
        assert!(parse_bind("/a:/b").rw);
    }
}
