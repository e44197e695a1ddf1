//! Forward-mode agent health probing.
//!
//! After a provider reports RUNNING with an address, the orchestrator
//! probes `GET http://<addr>/health` at 1 Hz until it answers 200 or the
//! bounded timeout elapses. Health is advisory: a container whose
//! execution is RUNNING stays running even if the probe never succeeds.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::constants::AGENT_HEALTH_POLL;
use crate::error::{Error, Result};

/// Body of the agent's `/health` response.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default)]
    pub exited: Option<bool>,
    #[serde(rename = "exitCode", default)]
    pub exit_code: Option<i64>,
}

/// Polls the agent health endpoint until any 200 response or timeout.
pub async fn wait_agent_healthy(
    client: &reqwest::Client,
    addr: &str,
    timeout: Duration,
) -> Result<HealthReport> {
    let url = format!("http://{addr}/health");
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let report = resp
                    .json::<HealthReport>()
                    .await
                    .unwrap_or_else(|_| HealthReport {
                        status: "ok".to_string(),
                        pid: None,
                        exited: None,
                        exit_code: None,
                    });
                return Ok(report);
            }
            Ok(resp) => {
                debug!(addr, status = %resp.status(), "agent health probe not ready");
            }
            Err(e) => {
                debug!(addr, error = %e, "agent health probe failed");
            }
        }

        if tokio::time::Instant::now() + AGENT_HEALTH_POLL > deadline {
            return Err(Error::Timeout {
                operation: format!("agent health check at {addr}"),
                duration: timeout,
            });
        }
        tokio::time::sleep(AGENT_HEALTH_POLL).await;
    }
}
