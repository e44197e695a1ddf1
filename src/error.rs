//! Error types for the engine.
//!
//! A single crate-wide enum maps each failure onto the HTTP status the
//! public API surfaces for it. Variants whose `Display` text is part of
//! the wire contract (name conflicts, illegal kill/remove) reproduce the
//! client-visible message exactly.

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Client-Visible Errors (status is part of the wire contract)
    // =========================================================================
    /// Referenced entity does not exist. Maps to 404.
    #[error("No such {kind}: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Operation conflicts with current state. Maps to 409.
    #[error("{0}")]
    Conflict(String),

    /// Operation is a no-op in the current state. Maps to 304.
    #[error("not modified")]
    NotModified,

    /// Malformed or missing request data. Maps to 400.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation unsupported by the active backend. Maps to 501.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    /// Remote job creation failed.
    #[error("failed to create job for container '{id}': {reason}")]
    ProvisionFailed { id: String, reason: String },

    /// Execution entered a terminal state before becoming reachable.
    #[error("execution stopped before running: {0}")]
    ExecutionStopped(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    // =========================================================================
    // Agent Errors
    // =========================================================================
    /// No agent link is available for the container.
    #[error("agent not connected for container '{0}'")]
    AgentUnavailable(String),

    /// The agent link was lost mid-session.
    #[error("agent link lost for container '{0}'")]
    AgentDisconnected(String),

    /// Bearer-token mismatch on agent connect.
    #[error("agent authorization failed")]
    AgentUnauthorized,

    // =========================================================================
    // Sandbox Errors
    // =========================================================================
    /// The primary command is not an admissible applet, shell, or builtin.
    #[error("command not runnable in sandbox: {0}")]
    CommandNotRunnable(String),

    /// Wasm compilation or instantiation failed.
    #[error("wasm execution failed: {0}")]
    WasmFailed(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Required configuration is missing or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Constructs the 404 error for a missing container.
    pub fn no_such_container(id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "container",
            id: id.into(),
        }
    }

    /// Constructs the 409 error for a name already in the name index.
    pub fn name_in_use(name: &str) -> Self {
        Error::Conflict(format!(
            "Conflict. The container name \"{name}\" is already in use"
        ))
    }

    /// Constructs the 409 error for killing a container that is not running.
    pub fn not_running(id: &str) -> Self {
        Error::Conflict(format!("Container {id} is not running"))
    }

    /// Constructs the 409 error for removing a running container.
    pub fn remove_running(short_id: &str) -> Self {
        Error::Conflict(format!(
            "You cannot remove a running container {short_id}. \
             Stop the container before attempting removal or force remove"
        ))
    }

    /// HTTP status code the public API reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Conflict(_) => 409,
            Error::NotModified => 304,
            Error::InvalidParameter(_) => 400,
            Error::NotImplemented(_) => 501,
            _ => 500,
        }
    }
}
