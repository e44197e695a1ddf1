//! Engine configuration.
//!
//! Loaded from environment variables with the `SOCKERLESS_` prefix. The
//! outer transport owns flag parsing and subscriber installation; this
//! struct only captures what the engine itself consumes.

use crate::constants;
use crate::error::{Error, Result};
use crate::ids;

/// Runtime configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Unique ID of this engine instance, used for cloud resource tagging
    /// and orphan-sweep scoping. Random per process unless overridden.
    pub instance_id: String,

    /// Override for the cloud endpoint (simulator mode). When set, poll
    /// cadences switch to their fast variants.
    pub endpoint_url: Option<String>,

    /// Callback URL for reverse-agent mode. When set, dispatched jobs are
    /// told to dial back instead of listening.
    pub callback_url: Option<String>,

    /// Image containing the agent binary, prepended to workload entrypoints.
    pub agent_image: String,

    /// Default bearer token for agent links. Random per container if empty.
    pub agent_token: Option<String>,

    /// Log level requested via `SOCKERLESS_LOG_LEVEL`.
    pub log_level: tracing::Level,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            instance_id: ids::short_id(&ids::generate_id()).to_string(),
            endpoint_url: None,
            callback_url: None,
            agent_image: "sockerless/agent:latest".to_string(),
            agent_token: None,
            log_level: tracing::Level::INFO,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `SOCKERLESS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = EngineConfig::default();

        if let Ok(v) = std::env::var("SOCKERLESS_INSTANCE_ID") {
            if !v.is_empty() {
                cfg.instance_id = v;
            }
        }
        if let Ok(v) = std::env::var("SOCKERLESS_ENDPOINT_URL") {
            if !v.is_empty() {
                cfg.endpoint_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("SOCKERLESS_CALLBACK_URL") {
            if !v.is_empty() {
                cfg.callback_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("SOCKERLESS_AGENT_IMAGE") {
            if !v.is_empty() {
                cfg.agent_image = v;
            }
        }
        if let Ok(v) = std::env::var("SOCKERLESS_AGENT_TOKEN") {
            if !v.is_empty() {
                cfg.agent_token = Some(v);
            }
        }
        if let Ok(v) = std::env::var("SOCKERLESS_LOG_LEVEL") {
            cfg.log_level = parse_log_level(&v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if self.instance_id.is_empty() {
            return Err(Error::InvalidConfig("instance_id cannot be empty".into()));
        }
        if let Some(url) = &self.callback_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::InvalidConfig(format!(
                    "callback URL must be http(s): {url}"
                )));
            }
        }
        if self.agent_image.is_empty() {
            return Err(Error::InvalidConfig("agent image cannot be empty".into()));
        }
        Ok(())
    }

    /// True when the engine runs against a simulator endpoint; shortens
    /// poll cadences and health timeouts.
    pub fn fast_poll(&self) -> bool {
        self.endpoint_url.is_some()
    }

    /// True when jobs attach via reverse callback rather than a listener.
    pub fn reverse_mode(&self) -> bool {
        self.callback_url.is_some()
    }

    /// Poll cadence for wait-running, respecting simulator mode.
    pub fn wait_running_poll(&self) -> std::time::Duration {
        if self.fast_poll() {
            constants::WAIT_RUNNING_POLL_FAST
        } else {
            constants::WAIT_RUNNING_POLL
        }
    }

    /// Poll cadence for the exit poller, respecting simulator mode.
    pub fn wait_finished_poll(&self) -> std::time::Duration {
        if self.fast_poll() {
            constants::WAIT_FINISHED_POLL_FAST
        } else {
            constants::WAIT_FINISHED_POLL
        }
    }

    /// Health-check timeout, respecting simulator mode.
    pub fn agent_health_timeout(&self) -> std::time::Duration {
        if self.fast_poll() {
            constants::AGENT_HEALTH_TIMEOUT_FAST
        } else {
            constants::AGENT_HEALTH_TIMEOUT
        }
    }
}

fn parse_log_level(s: &str) -> Result<tracing::Level> {
    match s.to_ascii_lowercase().as_str() {
        "debug" => Ok(tracing::Level::DEBUG),
        "info" => Ok(tracing::Level::INFO),
        "warn" => Ok(tracing::Level::WARN),
        "error" => Ok(tracing::Level::ERROR),
        other => Err(Error::InvalidConfig(format!("unknown log level: {other}"))),
    }
}
