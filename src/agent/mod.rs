//! In-container agent integration.
//!
//! The agent runs next to the workload (prepended to its entrypoint) and
//! serves a framed session protocol. This module holds the orchestrator
//! side: the wire [`protocol`], the per-container session [`registry`],
//! the multiplexing [`link`] actor, and forward-mode [`health`] probing.
//!
//! Two attachment modes exist:
//!
//! - **Forward**: the agent listens inside the workload; the orchestrator
//!   learns its address from the provider and connects out.
//! - **Reverse**: the agent dials a callback URL; the accepted stream is
//!   parked in the registry keyed by container ID.

pub mod health;
pub mod link;
pub mod protocol;
pub mod registry;

pub use health::{wait_agent_healthy, HealthReport};
pub use link::AgentLink;
pub use protocol::{decode_data, encode_data, Message, MAIN_SESSION};
pub use registry::{AgentPhase, AgentRegistry};
