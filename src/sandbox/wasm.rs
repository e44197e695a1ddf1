//! Wasm applet execution.
//!
//! One shared engine and one precompiled module expose the applet set;
//! every command invocation instantiates the module fresh with argv[0]
//! naming the applet, the virtual root preopened at `/`, and stdio wired
//! to in-memory pipes. Fuel bounds each invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use wasmtime::{Config, Engine, Linker, Module, Store};
use wasmtime_wasi::preview1::{self as p1, WasiP1Ctx};
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::WasiCtxBuilder;

use crate::constants::{DEFAULT_WASM_FUEL, LOG_BUFFER_LIMIT, MAX_WASM_MODULE_SIZE};
use crate::error::{Error, Result};

use super::applets::is_known_applet;
use super::rootfs::VirtualRoot;

/// Result of one command invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    pub code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutcome {
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        ExecOutcome {
            code: 0,
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    pub fn failure(code: i64, stderr: impl Into<Vec<u8>>) -> Self {
        ExecOutcome {
            code,
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }
}

/// One applet invocation request.
pub struct AppletInvocation<'a> {
    /// argv with the applet name at index 0; paths already rewritten to
    /// container-absolute where the dispatch rules call for it.
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Vec<u8>,
    pub root: &'a VirtualRoot,
}

/// Executes applets for the shell's external-command dispatch.
#[async_trait]
pub trait AppletRunner: Send + Sync {
    /// Whether this runner can execute `name`.
    fn has_applet(&self, name: &str) -> bool;

    async fn run(&self, invocation: AppletInvocation<'_>) -> Result<ExecOutcome>;
}

/// Runs applets from a precompiled BusyBox-style Wasm module.
pub struct WasmAppletRunner {
    engine: Engine,
    module: Arc<Module>,
}

impl WasmAppletRunner {
    /// Compiles the applet module once; instances are per invocation.
    pub fn new(module_path: &Path) -> Result<Self> {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.wasm_memory64(false);
        let engine =
            Engine::new(&config).map_err(|e| Error::WasmFailed(format!("engine: {e}")))?;

        let meta = std::fs::metadata(module_path)?;
        if meta.len() > MAX_WASM_MODULE_SIZE {
            return Err(Error::WasmFailed(format!(
                "module too large: {} > {} bytes",
                meta.len(),
                MAX_WASM_MODULE_SIZE
            )));
        }
        let bytes = std::fs::read(module_path)?;
        let module = Module::new(&engine, &bytes)
            .map_err(|e| Error::WasmFailed(format!("compile: {e}")))?;
        debug!(path = %module_path.display(), "applet module compiled");
        Ok(WasmAppletRunner {
            engine,
            module: Arc::new(module),
        })
    }

    fn run_instance(
        engine: &Engine,
        module: &Module,
        argv: &[String],
        env: &[(String, String)],
        stdin: Vec<u8>,
        preopens: &[(String, PathBuf, bool)],
    ) -> Result<ExecOutcome> {
        let stdout = MemoryOutputPipe::new(LOG_BUFFER_LIMIT);
        let stderr = MemoryOutputPipe::new(LOG_BUFFER_LIMIT);

        let mut builder = WasiCtxBuilder::new();
        builder
            .stdin(MemoryInputPipe::new(stdin))
            .stdout(stdout.clone())
            .stderr(stderr.clone())
            .args(argv);
        for (key, value) in env {
            builder.env(key, value);
        }
        for (guest, host, read_only) in preopens {
            let (dir_perms, file_perms) = if *read_only {
                (wasmtime_wasi::DirPerms::READ, wasmtime_wasi::FilePerms::READ)
            } else {
                (wasmtime_wasi::DirPerms::all(), wasmtime_wasi::FilePerms::all())
            };
            builder
                .preopened_dir(host, guest, dir_perms, file_perms)
                .map_err(|e| Error::WasmFailed(format!("preopen {guest}: {e}")))?;
        }
        let wasi = builder.build_p1();

        let mut store: Store<WasiP1Ctx> = Store::new(engine, wasi);
        store
            .set_fuel(DEFAULT_WASM_FUEL)
            .map_err(|e| Error::WasmFailed(format!("fuel: {e}")))?;

        let mut linker: Linker<WasiP1Ctx> = Linker::new(engine);
        p1::add_to_linker_sync(&mut linker, |ctx| ctx)
            .map_err(|e| Error::WasmFailed(format!("link wasi: {e}")))?;

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| Error::WasmFailed(format!("instantiate: {e}")))?;

        let code = match instance.get_func(&mut store, "_start") {
            Some(start) => match start.call(&mut store, &[], &mut []) {
                Ok(()) => 0,
                Err(trap) => match trap.downcast_ref::<wasmtime_wasi::I32Exit>() {
                    Some(exit) => i64::from(exit.0),
                    None => {
                        debug!(error = %trap, "applet trapped");
                        1
                    }
                },
            },
            None => return Err(Error::WasmFailed("module has no _start".into())),
        };

        drop(store);
        Ok(ExecOutcome {
            code,
            stdout: stdout.contents().to_vec(),
            stderr: stderr.contents().to_vec(),
        })
    }
}

#[async_trait]
impl AppletRunner for WasmAppletRunner {
    fn has_applet(&self, name: &str) -> bool {
        is_known_applet(name)
    }

    async fn run(&self, invocation: AppletInvocation<'_>) -> Result<ExecOutcome> {
        let mut preopens: Vec<(String, PathBuf, bool)> = vec![(
            "/".to_string(),
            invocation.root.host_root().to_path_buf(),
            false,
        )];
        for mount in invocation.root.mounts() {
            preopens.push((
                mount.container_path.clone(),
                mount.host_path.clone(),
                mount.read_only,
            ));
        }

        let engine = self.engine.clone();
        let module = self.module.clone();
        let argv = invocation.argv;
        let env = invocation.env;
        let stdin = invocation.stdin;

        // Instantiation and execution are synchronous; keep them off the
        // async workers.
        tokio::task::spawn_blocking(move || {
            Self::run_instance(&engine, &module, &argv, &env, stdin, &preopens)
        })
        .await
        .map_err(|e| Error::Internal(format!("applet task join: {e}")))?
    }
}
