//! Stats and top.
//!
//! The sandbox keeps real accounting (CPU nanoseconds, disk usage, PID
//! count); remote executions report zeros because the providers expose no
//! comparable per-execution counters.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::constants::MAIN_PID;
use crate::error::Result;
use crate::types::{ProcessList, StatsSnapshot};

use super::Engine;

/// Sampling cadence for streamed stats.
const STATS_INTERVAL: Duration = Duration::from_secs(1);

impl Engine {
    /// One-shot resource snapshot.
    pub fn container_stats(&self, reference: &str) -> Result<StatsSnapshot> {
        let id = self.state.resolve(reference)?;
        self.state.get_container(&id)?;
        if let Some(process) = self.wasi.process(&id) {
            return Ok(process.stats());
        }
        Ok(StatsSnapshot {
            read: Some(Utc::now()),
            ..Default::default()
        })
    }

    /// Streamed stats, one snapshot per second. The channel yields a
    /// final snapshot after the container exits, then closes.
    pub fn stream_stats(
        self: &Arc<Self>,
        reference: &str,
    ) -> Result<mpsc::Receiver<StatsSnapshot>> {
        let id = self.state.resolve(reference)?;
        self.state.get_container(&id)?;

        let (tx, rx) = mpsc::channel(1);
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                let Ok(snapshot) = engine.container_stats(&id) else {
                    return;
                };
                if tx.send(snapshot).await.is_err() {
                    return;
                }
                let running = engine
                    .state
                    .get_container(&id)
                    .map(|c| c.state.running)
                    .unwrap_or(false);
                if !running {
                    return;
                }
                tokio::time::sleep(STATS_INTERVAL).await;
            }
        });
        Ok(rx)
    }

    /// Process table: PID 1 plus any live exec sessions.
    pub fn container_top(&self, reference: &str) -> Result<ProcessList> {
        let id = self.state.resolve(reference)?;
        let container = self.state.get_container(&id)?;
        if let Some(process) = self.wasi.process(&id) {
            return Ok(process.top());
        }

        let mut processes = Vec::new();
        if container.state.running {
            let mut command = container.config.entrypoint.clone();
            command.extend(container.config.cmd.iter().cloned());
            processes.push(vec![
                MAIN_PID.to_string(),
                "root".to_string(),
                command.join(" "),
            ]);
            for exec in self.state.execs_for_container(&id)? {
                if exec.running {
                    processes.push(vec![
                        exec.pid.to_string(),
                        "root".to_string(),
                        exec.cmd.join(" "),
                    ]);
                }
            }
        }
        Ok(ProcessList {
            titles: vec!["PID".to_string(), "USER".to_string(), "COMMAND".to_string()],
            processes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{cloud_engine, sandbox_engine};
    use crate::provider::{ExecutionState, ProviderKind};
    use crate::types::{ContainerConfig, HostConfig};

    fn sentinel() -> ContainerConfig {
        ContainerConfig {
            image: "alpine".to_string(),
            cmd: ["tail", "-f", "/dev/null"].map(String::from).to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sandbox_stats_report_live_process() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(sentinel(), HostConfig::default(), None)
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let stats = engine.container_stats(&id).unwrap();
        assert_eq!(stats.pids, 1);
        assert!(stats.read.is_some());

        let top = engine.container_top(&id).unwrap();
        assert_eq!(top.titles, ["PID", "USER", "COMMAND"]);
        assert_eq!(top.processes.len(), 1);
        assert_eq!(top.processes[0][0], "1");

        engine.kill_container(&id, "KILL").await.unwrap();
        assert_eq!(engine.container_stats(&id).unwrap().pids, 0);
    }

    #[tokio::test]
    async fn stream_closes_after_exit() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(sentinel(), HostConfig::default(), None)
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let mut rx = engine.stream_stats(&id).unwrap();
        assert!(rx.recv().await.is_some(), "first sample while running");
        engine.kill_container(&id, "KILL").await.unwrap();
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn remote_stats_are_zeroed() {
        let (engine, provider, _dir) = cloud_engine(ProviderKind::Ecs);
        provider.api().script_states(&[ExecutionState::Running]);

        let id = engine
            .create_container(sentinel(), HostConfig::default(), None)
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let stats = engine.container_stats(&id).unwrap();
        assert_eq!(stats.cpu_nanos, 0);
        assert_eq!(stats.memory_bytes, 0);

        let top = engine.container_top(&id).unwrap();
        assert_eq!(top.processes.len(), 1, "main process row for a running remote");
        assert!(top.processes[0][2].contains("tail"));
    }
}
