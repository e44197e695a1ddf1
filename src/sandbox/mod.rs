//! In-process WASI sandbox.
//!
//! Runs container workloads without any cloud backend: a temp-directory
//! virtual root stands in for the image filesystem, a POSIX-subset shell
//! interprets the command, and external programs dispatch to BusyBox-style
//! applets (a precompiled Wasm module, or a native subset when no module
//! is configured) and host builtins.
//!
//! Dispatch order for a command word: shell builtin, host builtin, script
//! found on PATH inside the root, applet, then `not found` (127).

pub mod applets;
pub mod applets_native;
pub mod builtins;
pub mod process;
pub mod rootfs;
pub mod shell;
pub mod wasm;

pub use applets_native::NativeApplets;
pub use process::SandboxProcess;
pub use rootfs::{DirMount, VirtualRoot};
pub use shell::{Shell, ShellEnv};
pub use wasm::{AppletInvocation, AppletRunner, ExecOutcome, WasmAppletRunner};
