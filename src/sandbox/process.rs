//! In-process sandbox execution.
//!
//! A `SandboxProcess` stands in for one container: a virtual root, a main
//! command driven by the shell interpreter, a fan-out log buffer, and a
//! table of synthetic PIDs for exec sessions. The idle sentinel
//! `tail -f /dev/null` never reaches the interpreter; it parks until a
//! kill signal arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::constants::{
    is_idle_sentinel, EXIT_CODE_SIGKILL, LOG_BUFFER_LIMIT, LOG_SUBSCRIBER_CAPACITY, MAIN_PID,
};
use crate::error::{Error, Result};
use crate::logsfmt::LogChunk;
use crate::store::Latch;
use crate::types::{ProcessList, StatsSnapshot};

use super::applets::{is_host_builtin, is_noop_command, is_shell};
use super::rootfs::VirtualRoot;
use super::shell::{Shell, ShellEnv};
use super::wasm::{AppletRunner, ExecOutcome};

/// A running (or finished) sandbox workload.
pub struct SandboxProcess {
    id: String,
    root: Arc<VirtualRoot>,
    runner: Arc<dyn AppletRunner>,
    command: Vec<String>,
    env: Vec<(String, String)>,
    working_dir: String,
    exit: Arc<Latch>,
    exit_code: AtomicI64,
    kill_tx: watch::Sender<bool>,
    cpu_nanos: AtomicU64,
    next_pid: AtomicI64,
    buffer: Mutex<LogBuffer>,
    subscribers: Mutex<Vec<mpsc::Sender<LogChunk>>>,
    execs: Mutex<HashMap<i64, String>>,
}

impl std::fmt::Debug for SandboxProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxProcess")
            .field("id", &self.id)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

struct LogBuffer {
    chunks: Vec<LogChunk>,
    bytes: usize,
}

impl SandboxProcess {
    /// Validates the command and starts the main task.
    ///
    /// The first word must be admissible: a shell, a host builtin, an
    /// applet the runner knows, or the idle sentinel. Anything else is
    /// rejected before any work happens.
    pub fn spawn(
        id: &str,
        command: Vec<String>,
        env: Vec<(String, String)>,
        binds: &[String],
        working_dir: Option<&str>,
        runner: Arc<dyn AppletRunner>,
    ) -> Result<Arc<Self>> {
        if command.is_empty() {
            return Err(Error::CommandNotRunnable("empty command".into()));
        }
        let name = command[0].rsplit('/').next().unwrap_or(&command[0]);
        let admissible = is_idle_sentinel(&command)
            || is_shell(&command[0])
            || is_host_builtin(name)
            || is_noop_command(name)
            || runner.has_applet(name);
        if !admissible {
            return Err(Error::CommandNotRunnable(command[0].clone()));
        }

        let root = Arc::new(VirtualRoot::new(binds)?);
        let (kill_tx, _) = watch::channel(false);
        let process = Arc::new(SandboxProcess {
            id: id.to_string(),
            root,
            runner,
            command,
            env,
            working_dir: working_dir.unwrap_or("/").to_string(),
            exit: Latch::new(),
            exit_code: AtomicI64::new(0),
            kill_tx,
            cpu_nanos: AtomicU64::new(0),
            next_pid: AtomicI64::new(MAIN_PID + 1),
            buffer: Mutex::new(LogBuffer {
                chunks: Vec::new(),
                bytes: 0,
            }),
            subscribers: Mutex::new(Vec::new()),
            execs: Mutex::new(HashMap::new()),
        });

        let task = process.clone();
        tokio::spawn(async move { task.run_main().await });
        Ok(process)
    }

    async fn run_main(self: Arc<Self>) {
        let code = if is_idle_sentinel(&self.command) {
            let mut kill_rx = self.kill_tx.subscribe();
            // Parked until a signal; the sentinel has no output.
            let _ = kill_rx.changed().await;
            EXIT_CODE_SIGKILL
        } else {
            let started = Instant::now();
            let mut kill_rx = self.kill_tx.subscribe();
            let script = render_script(&self.command);
            let run = async {
                let mut shell = Shell::new(
                    self.runner.as_ref(),
                    self.root.as_ref(),
                    self.shell_env(),
                );
                let code = shell.run(script).await;
                (code, shell.stdout, shell.stderr)
            };
            let code = tokio::select! {
                (code, stdout, stderr) = run => {
                    if !stdout.is_empty() {
                        self.publish(LogChunk::stdout(stdout));
                    }
                    if !stderr.is_empty() {
                        self.publish(LogChunk::stderr(stderr));
                    }
                    code
                }
                _ = kill_rx.changed() => EXIT_CODE_SIGKILL,
            };
            self.cpu_nanos
                .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
            code
        };

        info!(container = %self.id, code, "sandbox main command finished");
        self.exit_code.store(code, Ordering::SeqCst);
        self.exit.set();
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn shell_env(&self) -> ShellEnv {
        let mut env = ShellEnv::new(&self.working_dir);
        for (key, value) in &self.env {
            env.set(key, value.clone());
            env.export(key);
        }
        env.set("PWD", self.working_dir.clone());
        env
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &VirtualRoot {
        &self.root
    }

    pub fn running(&self) -> bool {
        !self.exit.is_set()
    }

    /// Waits for the main command and returns its exit code.
    pub async fn wait(&self) -> i64 {
        self.exit.wait().await;
        self.exit_code.load(Ordering::SeqCst)
    }

    pub fn exit_code(&self) -> Option<i64> {
        self.exit
            .is_set()
            .then(|| self.exit_code.load(Ordering::SeqCst))
    }

    /// Delivers a signal. KILL and TERM stop the main command; everything
    /// else is accepted and dropped, matching a PID-1 with no handlers.
    pub fn signal(&self, signal: &str) -> Result<()> {
        let name = signal.trim_start_matches("SIG");
        match name {
            "KILL" | "TERM" | "9" | "15" => {
                debug!(container = %self.id, signal, "stopping sandbox process");
                let _ = self.kill_tx.send(true);
                Ok(())
            }
            _ if name.parse::<u32>().is_ok() => Ok(()),
            "HUP" | "INT" | "QUIT" | "USR1" | "USR2" | "WINCH" => Ok(()),
            other => Err(Error::InvalidParameter(format!("Invalid signal: {other}"))),
        }
    }

    /// Runs one exec session to completion under a synthetic PID.
    pub async fn exec(
        &self,
        command: &[String],
        env: &[(String, String)],
        working_dir: Option<&str>,
        stdin: Vec<u8>,
    ) -> Result<(i64, ExecOutcome)> {
        if !self.running() {
            return Err(Error::not_running(&self.id));
        }
        if command.is_empty() {
            return Err(Error::InvalidParameter("empty exec command".into()));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.execs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pid, command.join(" "));

        let started = Instant::now();
        let mut shell_env = self.shell_env();
        for (key, value) in env {
            shell_env.set(key, value.clone());
            shell_env.export(key);
        }
        if let Some(dir) = working_dir {
            shell_env.cwd = dir.to_string();
            shell_env.set("PWD", dir.to_string());
        }

        let script = render_script(command);
        let mut shell = Shell::new(self.runner.as_ref(), self.root.as_ref(), shell_env);
        shell.stdin = stdin;
        let mut kill_rx = self.kill_tx.subscribe();
        let code = tokio::select! {
            code = shell.run(script) => code,
            _ = kill_rx.changed() => EXIT_CODE_SIGKILL,
            _ = self.exit.wait() => EXIT_CODE_SIGKILL,
        };

        self.cpu_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.execs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&pid);
        Ok((
            pid,
            ExecOutcome {
                code,
                stdout: shell.stdout,
                stderr: shell.stderr,
            },
        ))
    }

    /// Appends a chunk to the bounded buffer and fans it out. Subscribers
    /// that cannot keep up are dropped rather than blocking the writer.
    pub fn publish(&self, chunk: LogChunk) {
        {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.bytes += chunk.data.len();
            buffer.chunks.push(chunk.clone());
            while buffer.bytes > LOG_BUFFER_LIMIT && buffer.chunks.len() > 1 {
                let dropped = buffer.chunks.remove(0);
                buffer.bytes -= dropped.data.len();
            }
        }
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| match tx.try_send(chunk.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(container = %self.id, "dropping slow log subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Snapshot of everything logged so far.
    pub fn log_chunks(&self) -> Vec<LogChunk> {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .chunks
            .clone()
    }

    /// Subscribes to live log output. The receiver is primed with the
    /// buffered history so late followers see the full stream.
    pub fn subscribe(&self) -> mpsc::Receiver<LogChunk> {
        let (tx, rx) = mpsc::channel(LOG_SUBSCRIBER_CAPACITY);
        for chunk in self.log_chunks() {
            if tx.try_send(chunk).is_err() {
                break;
            }
        }
        if self.running() {
            self.subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(tx);
        }
        rx
    }

    pub fn stats(&self) -> StatsSnapshot {
        let buffer_bytes = self.buffer.lock().unwrap_or_else(|e| e.into_inner()).bytes;
        let pids = 1 + self.execs.lock().unwrap_or_else(|e| e.into_inner()).len() as u64;
        StatsSnapshot {
            cpu_nanos: self.cpu_nanos.load(Ordering::Relaxed),
            memory_bytes: self.root.disk_usage() + buffer_bytes as u64,
            pids: if self.running() { pids } else { 0 },
            read: Some(chrono::Utc::now()),
        }
    }

    pub fn top(&self) -> ProcessList {
        let mut processes = Vec::new();
        if self.running() {
            processes.push(vec![
                MAIN_PID.to_string(),
                "root".to_string(),
                self.command.join(" "),
            ]);
            let execs = self.execs.lock().unwrap_or_else(|e| e.into_inner());
            let mut entries: Vec<(&i64, &String)> = execs.iter().collect();
            entries.sort();
            for (pid, cmd) in entries {
                processes.push(vec![pid.to_string(), "root".to_string(), cmd.clone()]);
            }
        }
        ProcessList {
            titles: vec!["PID".to_string(), "USER".to_string(), "COMMAND".to_string()],
            processes,
        }
    }
}

/// Renders an argv into shell source, quoting anything that needs it.
/// `sh -c script` collapses to the script itself so the interpreter sees
/// the original source rather than a doubly-quoted wrapper.
fn render_script(command: &[String]) -> String {
    if command.len() >= 3 && is_shell(&command[0]) && command[1] == "-c" {
        return command[2].clone();
    }
    command
        .iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:%+,@".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}
