//! # sockerless
//!
//! **Container Engine over Serverless Execution Backends**
//!
//! This crate exposes a container-engine surface (create, start, exec,
//! logs, attach, stop, remove) whose workloads do not run on the host.
//! Each started container becomes an ephemeral execution on a cloud
//! serverless platform, or a WASI process inside the in-process sandbox
//! for local development and tests.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           sockerless                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                         Engine                              │    │
//! │  │  create → start → (exec / logs / attach / stats) → stop     │    │
//! │  │        networks │ volumes │ images │ wait │ remove          │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                  JobProvider Trait                        │      │
//! │  │  register_workload → start_execution → wait_running       │      │
//! │  │        wait_finished │ stop │ delete │ fetch_logs         │      │
//! │  └───────────────────────────┼───────────────────────────────┘      │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                    Agent Channel                          │      │
//! │  │  exec / attach / stdin bridged over a live connection     │      │
//! │  │  forward dial-in │ reverse dial-back │ bearer tokens      │      │
//! │  └───────────────────────────────────────────────────────────┘      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                      Execution Backends                             │
//! │  ┌──────────────┐  ┌───────────────┐  ┌─────────────────────┐      │
//! │  │ Cloud jobs   │  │ Cloud functions│  │   WasiProvider      │      │
//! │  │ (long-lived  │  │ (single-shot   │  │ (in-process wasmtime│      │
//! │  │  executions) │  │  invocations)  │  │  sandbox + applets) │      │
//! │  └──────────────┘  └───────────────┘  └─────────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Container Lifecycle
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                 restart                      │
//!                    ▼                                              │
//!   ┌─────────┐   create   ┌─────────┐   start   ┌─────────┐       │
//!   │ (none)  │ ─────────► │ Created │ ────────► │ Running │       │
//!   └─────────┘            └─────────┘           └────┬────┘       │
//!                               │                     │            │
//!                               │ remove              │ stop/kill/ │
//!                               │                     │ exit       │
//!                               ▼                     ▼            │
//!                          ┌─────────┐           ┌─────────┐       │
//!                          │ Removed │ ◄──────── │ Exited  │ ──────┘
//!                          └─────────┘  remove   └─────────┘
//! ```
//!
//! `wait` observers are released exactly once per start, whether the
//! workload exits on its own, is stopped locally, or the provider-side
//! execution disappears.
//!
//! # Durability
//!
//! Every remote resource is written to a file-backed registry before the
//! provider call that creates it. [`Engine::recover`] sweeps resources
//! left behind by a previous run of the same instance, with exponential
//! backoff per entry, so crashed engines never leak paid cloud jobs.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use sockerless::{
//!     Engine, EngineConfig, NativeApplets, ProviderKind, ResourceRegistry,
//!     StaticImageResolver,
//! };
//!
//! #[tokio::main]
//! async fn main() -> sockerless::Result<()> {
//!     let registry = Arc::new(ResourceRegistry::open(ResourceRegistry::default_dir())?);
//!     let engine = Engine::new(
//!         EngineConfig::default(),
//!         ProviderKind::InProcessWasi,
//!         HashMap::new(),
//!         Arc::new(NativeApplets),
//!         registry,
//!         Arc::new(StaticImageResolver::new()),
//!     )?;
//!     engine.recover().await;
//!     // ... serve the engine
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod ids;
pub mod image;
pub mod ipam;
pub mod logsfmt;
pub mod orphan;
pub mod pod;
pub mod provider;
pub mod sandbox;
pub mod store;
pub mod types;

// Re-exports
pub use config::EngineConfig;
pub use constants::*;
pub use engine::{Engine, ExecConfig, InfoReport, LogOptions, VersionInfo, DEFAULT_NETWORK};
pub use error::{Error, Result};
pub use image::{ImageConfig, ImageConfigResolver, StaticImageResolver};
pub use logsfmt::{LogChunk, StreamKind};
pub use orphan::{OrphanEntry, RecoveryReport, ResourceRegistry};
pub use provider::{
    ExecutionHandle, JobHandle, JobProvider, JobSpec, ProviderKind, RunningStatus, WasiProvider,
};
pub use sandbox::{AppletRunner, NativeApplets};
pub use store::EngineState;
pub use types::{Container, ContainerConfig, ContainerStatus, HostConfig};
