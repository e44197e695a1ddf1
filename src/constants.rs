//! # Engine Constants
//!
//! Defines resource limits, timeouts, polling cadences, and wire-protocol
//! values for the engine. These constants are the **single source of truth**
//! for bounds throughout the codebase.
//!
//! ## Modification Guidelines
//!
//! Before modifying any constant:
//! 1. Evaluate interactions with other limits (e.g. poll cadence × timeout)
//! 2. Update dependent tests and documentation
//! 3. Check whether the value is part of a wire contract (framing bytes,
//!    exit-code mappings, header values) and therefore fixed
//!
//! ## Cross-References
//!
//! - [`crate::provider`]: Uses provisioning timeouts and poll cadences
//! - [`crate::agent`]: Uses health-check and session-inbox bounds
//! - [`crate::sandbox`]: Uses fuel and log-buffer limits
//! - [`crate::engine`]: Uses lifecycle timeouts and exit-code mappings

use std::time::Duration;

// =============================================================================
// API Surface
// =============================================================================

/// Engine wire-protocol version reported by `/_ping` and `/version`.
pub const API_VERSION: &str = "1.44";

/// Minimum API version accepted from clients.
pub const API_MIN_VERSION: &str = "1.24";

/// Content type of multiplexed log/attach streams.
pub const MULTIPLEXED_STREAM_CONTENT_TYPE: &str = "application/vnd.docker.multiplexed-stream";

// =============================================================================
// Identifiers
// =============================================================================

/// Length of a container ID in hex characters (256 bits of entropy).
pub const CONTAINER_ID_LEN: usize = 64;

/// Length of the ID prefix used in client-facing messages and cloud tags.
pub const SHORT_ID_LEN: usize = 12;

/// Valid characters for container names.
///
/// Excludes `/` and `.` so names are safe in filesystem paths and URLs.
pub const CONTAINER_NAME_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

/// Maximum container name length.
pub const MAX_CONTAINER_NAME_LEN: usize = 128;

// =============================================================================
// Lifecycle Limits
// =============================================================================

/// Maximum number of concurrent containers tracked by one engine instance.
///
/// Bounds memory used for container state, wait channels, and agent
/// sessions. 1024 is generous for a single instance.
pub const MAX_CONTAINERS: usize = 1024;

/// Exit code recorded when a container is killed with SIGKILL (128 + 9).
pub const EXIT_CODE_SIGKILL: i64 = 137;

/// Exit code for a command that could not be found.
pub const EXIT_CODE_NOT_FOUND: i64 = 127;

/// Synthetic PID assigned to a container's main process.
pub const MAIN_PID: i64 = 1;

/// Command that signals "stay idle": containers running it never fast-exit
/// and block until cancelled in the WASI sandbox.
pub const IDLE_SENTINEL: [&str; 3] = ["tail", "-f", "/dev/null"];

// =============================================================================
// Provisioning Timeouts
// =============================================================================
//
// All remote polling is bounded. Cadences have a "fast" variant used when
// the provider endpoint is overridden (simulator mode), where sub-second
// polls keep test suites quick without hammering real cloud APIs.
// =============================================================================

/// Timeout for an execution to reach RUNNING after dispatch (5 minutes).
///
/// Cold starts on function platforms can take minutes when an image must
/// be pulled; 5 minutes bounds truly stuck provisioning.
pub const WAIT_RUNNING_TIMEOUT: Duration = Duration::from_secs(300);

/// Poll cadence while waiting for RUNNING.
pub const WAIT_RUNNING_POLL: Duration = Duration::from_secs(2);

/// Poll cadence while waiting for RUNNING against a simulator endpoint.
pub const WAIT_RUNNING_POLL_FAST: Duration = Duration::from_millis(500);

/// Poll cadence for the exit-detection poller.
pub const WAIT_FINISHED_POLL: Duration = Duration::from_secs(5);

/// Poll cadence for the exit-detection poller against a simulator endpoint.
pub const WAIT_FINISHED_POLL_FAST: Duration = Duration::from_secs(1);

/// Timeout for the forward-mode agent health check.
pub const AGENT_HEALTH_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for the agent health check against a simulator endpoint.
pub const AGENT_HEALTH_TIMEOUT_FAST: Duration = Duration::from_secs(2);

/// Cadence of agent health probes (1 Hz).
pub const AGENT_HEALTH_POLL: Duration = Duration::from_secs(1);

/// Timeout for a reverse agent to dial back after dispatch.
pub const AGENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Grace period before auto-stopping a short-lived helper container in
/// reverse mode. Documented minimum; the stop resolves earlier if the
/// provider reports completion first.
pub const REVERSE_HELPER_GRACE: Duration = Duration::from_millis(500);

// =============================================================================
// Agent Channel
// =============================================================================

/// TCP port the forward-mode agent listens on inside the workload.
pub const AGENT_PORT: u16 = 9111;

/// Bounded capacity of a per-session inbox on an agent link.
///
/// Overflow closes the session with an error frame rather than
/// back-pressuring the shared connection.
pub const SESSION_INBOX_CAPACITY: usize = 64;

/// Bounded capacity of the outbound frame queue on an agent link.
pub const LINK_OUTBOX_CAPACITY: usize = 256;

/// Environment variable carrying the agent bearer token into workloads.
pub const AGENT_TOKEN_ENV: &str = "SOCKERLESS_AGENT_TOKEN";

/// Environment variable carrying the container ID into workloads.
pub const CONTAINER_ID_ENV: &str = "SOCKERLESS_CONTAINER_ID";

/// Environment variable carrying the reverse callback URL into workloads.
pub const CALLBACK_URL_ENV: &str = "SOCKERLESS_CALLBACK_URL";

// =============================================================================
// Cloud Resource Tags
// =============================================================================

/// Tag key identifying resources created by this engine.
pub const TAG_MANAGED_BY: &str = "managed-by";

/// Tag value for [`TAG_MANAGED_BY`].
pub const MANAGED_BY_VALUE: &str = "sockerless";

/// Tag key holding the engine instance ID that created the resource.
pub const TAG_INSTANCE: &str = "instance";

/// Tag key holding the 12-character container ID prefix.
pub const TAG_CONTAINER_ID: &str = "container-id";

// =============================================================================
// WASI Sandbox
// =============================================================================

/// Default fuel limit for one Wasm command invocation (1 billion ops).
///
/// Bounds CPU time per applet run; exhaustion traps with `OutOfFuel` and
/// surfaces as a nonzero exit code.
pub const DEFAULT_WASM_FUEL: u64 = 1_000_000_000;

/// Maximum size of the precompiled applet module (256 MiB).
pub const MAX_WASM_MODULE_SIZE: u64 = 256 * 1024 * 1024;

/// Maximum bytes retained in a sandbox process's log buffer.
///
/// Older output is discarded from the front once the bound is reached,
/// matching the bounded replay window on attach.
pub const LOG_BUFFER_LIMIT: usize = 4 * 1024 * 1024;

/// Bounded capacity of a log-subscriber channel. Slow subscribers are
/// dropped rather than back-pressuring the producing command.
pub const LOG_SUBSCRIBER_CAPACITY: usize = 256;

// =============================================================================
// Orphan Registry
// =============================================================================

/// Initial retry delay for failed orphan cleanup.
pub const ORPHAN_RETRY_INITIAL: Duration = Duration::from_secs(1);

/// Maximum retry delay for failed orphan cleanup (exponential backoff cap).
pub const ORPHAN_RETRY_MAX: Duration = Duration::from_secs(60);

/// Maximum cleanup attempts per orphan entry before giving up.
pub const ORPHAN_RETRY_ATTEMPTS: u32 = 6;

// =============================================================================
// Validation Helpers
// =============================================================================

/// Validates a client-supplied container name.
///
/// # Returns
///
/// `Ok(())` if valid, `Err(reason)` with a description of the failure.
#[inline]
#[must_use = "validation result must be checked before using the name"]
pub fn validate_container_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("container name cannot be empty");
    }
    if name.len() > MAX_CONTAINER_NAME_LEN {
        return Err("container name exceeds maximum length");
    }
    if !name.chars().all(|c| CONTAINER_NAME_VALID_CHARS.contains(c)) {
        return Err("container name contains invalid characters");
    }
    Ok(())
}

/// Returns true when the command line is the stay-idle sentinel.
pub fn is_idle_sentinel(cmd: &[String]) -> bool {
    cmd.len() == IDLE_SENTINEL.len() && cmd.iter().zip(IDLE_SENTINEL).all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_pass() {
        assert!(validate_container_name("web-1").is_ok());
        assert!(validate_container_name("My_App2").is_ok());
    }

    #[test]
    fn invalid_names_rejected() {
        assert!(validate_container_name("").is_err());
        assert!(validate_container_name("has/slash").is_err());
        assert!(validate_container_name(&"x".repeat(200)).is_err());
    }

    #[test]
    fn sentinel_detection() {
        let cmd: Vec<String> = ["tail", "-f", "/dev/null"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(is_idle_sentinel(&cmd));

        let other: Vec<String> = ["echo", "hi"].iter().map(|s| s.to_string()).collect();
        assert!(!is_idle_sentinel(&other));
    }
}
