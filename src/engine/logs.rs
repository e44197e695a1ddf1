//! Log and attach streams.
//!
//! Non-follow log reads collect whatever the container's backend has
//! buffered and encode it with the multiplexed framing (raw when the
//! container has a TTY). Follow and attach hand back a channel: the
//! sandbox fans out directly, a connected agent streams live frames, and
//! an agent-less remote execution falls back to cursor polling.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::agent::{decode_data, Message, MAIN_SESSION};
use crate::constants::LOG_SUBSCRIBER_CAPACITY;
use crate::error::{Error, Result};
use crate::ids;
use crate::logsfmt::{encode_stream, tail_chunks, LogChunk, StreamKind};

use super::Engine;

/// Options for a log read.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
    /// `Some(n)` keeps the last n lines; `None` returns everything.
    pub tail: Option<usize>,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: None,
        }
    }
}

impl Engine {
    /// One-shot log read, encoded for the wire.
    pub async fn container_logs(&self, reference: &str, options: &LogOptions) -> Result<Vec<u8>> {
        let id = self.state.resolve(reference)?;
        let container = self.state.get_container(&id)?;

        let mut chunks = self.collect_chunks(&id).await?;
        chunks.retain(|c| match c.stream {
            StreamKind::Stdout => options.stdout,
            StreamKind::Stderr => options.stderr,
        });
        if let Some(n) = options.tail {
            chunks = tail_chunks(&chunks, n);
        }
        Ok(encode_stream(&chunks, container.config.tty, options.timestamps))
    }

    /// Buffered-then-live output stream, shared by attach and
    /// `logs --follow`. The channel closes when the source ends.
    pub async fn stream_output(self: &Arc<Self>, reference: &str) -> Result<mpsc::Receiver<LogChunk>> {
        let id = self.state.resolve(reference)?;
        self.state.get_container(&id)?;

        if let Some(process) = self.wasi.process(&id) {
            return Ok(process.subscribe());
        }

        let (tx, rx) = mpsc::channel(LOG_SUBSCRIBER_CAPACITY);
        if let Some(link) = self.agents.link(&id) {
            for chunk in self.state.log_chunks(&id)? {
                if tx.try_send(chunk).is_err() {
                    return Ok(rx);
                }
            }
            let session = format!("attach-{}", ids::short_id(&ids::generate_id()));
            let mut frames = link.bridge_attach(&session).await?;
            tokio::spawn(async move {
                while let Some(msg) = frames.recv().await {
                    let chunk = match msg {
                        Message::Stdout { data, .. } => decode_data(&data).ok().map(LogChunk::stdout),
                        Message::Stderr { data, .. } => decode_data(&data).ok().map(LogChunk::stderr),
                        Message::Exit { .. } | Message::Error { .. } => break,
                        _ => None,
                    };
                    if let Some(chunk) = chunk {
                        if tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                }
            });
            return Ok(rx);
        }

        let backend = self.state.get_backend(&id)?;
        if backend.execution_name.is_empty() {
            // Never started; replay whatever was captured and end.
            for chunk in self.state.log_chunks(&id)? {
                let _ = tx.try_send(chunk);
            }
            return Ok(rx);
        }

        // Agent-less remote execution: poll the provider's cursor API.
        let handle = self.execution_handle(&id, &backend.job_name, &backend.execution_name);
        let engine = self.clone();
        tokio::spawn(async move {
            let mut cursor = 0;
            loop {
                match engine.provider().fetch_logs(&handle, cursor).await {
                    Ok((chunks, next)) => {
                        cursor = next;
                        for chunk in chunks {
                            if tx.send(chunk).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => debug!(error = %e, "log poll failed"),
                }
                let running = engine
                    .state
                    .get_container(&handle.container_id)
                    .map(|c| c.state.running)
                    .unwrap_or(false);
                if !running {
                    return;
                }
                tokio::time::sleep(engine.config.wait_finished_poll()).await;
            }
        });
        Ok(rx)
    }

    /// Forwards attach stdin to the container's main process.
    pub async fn attach_stdin(&self, reference: &str, data: &[u8]) -> Result<()> {
        let id = self.state.resolve(reference)?;
        let container = self.state.get_container(&id)?;
        if !container.config.open_stdin {
            return Err(Error::InvalidParameter(
                "container was not created with open stdin".into(),
            ));
        }
        if let Some(link) = self.agents.link(&id) {
            link.send(Message::stdin(MAIN_SESSION, data)).await
        } else {
            // The sandbox main process takes no stdin after spawn.
            debug!(container_id = %ids::short_id(&id), "stdin dropped, no agent link");
            Ok(())
        }
    }

    /// The container's buffered output, preferring the live backend over
    /// the engine-side capture.
    async fn collect_chunks(&self, id: &str) -> Result<Vec<LogChunk>> {
        if let Some(process) = self.wasi.process(id) {
            return Ok(process.log_chunks());
        }
        let backend = self.state.get_backend(id)?;
        if !backend.execution_name.is_empty() {
            let handle = self.execution_handle(id, &backend.job_name, &backend.execution_name);
            match self.provider().fetch_logs(&handle, 0).await {
                Ok((chunks, _)) if !chunks.is_empty() => return Ok(chunks),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "provider log read failed, using capture"),
            }
        }
        self.state.log_chunks(id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{cloud_engine, sandbox_engine};
    use super::*;
    use crate::logsfmt::decode_frames;
    use crate::provider::{ExecutionState, ProviderKind};
    use crate::types::{ContainerConfig, HostConfig};

    fn config(cmd: &[&str]) -> ContainerConfig {
        ContainerConfig {
            image: "alpine".to_string(),
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sandbox_logs_are_framed() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(config(&["echo", "hello", "world"]), HostConfig::default(), None)
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let encoded = engine
            .container_logs(&id, &LogOptions::default())
            .await
            .unwrap();
        let frames = decode_frames(&encoded);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, StreamKind::Stdout);
        assert_eq!(frames[0].1, b"hello world\n");
    }

    #[tokio::test]
    async fn tail_limits_lines() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(
                config(&["sh", "-c", "echo one; echo two; echo three"]),
                HostConfig::default(),
                None,
            )
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let options = LogOptions {
            tail: Some(1),
            ..Default::default()
        };
        let encoded = engine.container_logs(&id, &options).await.unwrap();
        let frames = decode_frames(&encoded);
        let text: Vec<u8> = frames.into_iter().flat_map(|(_, payload)| payload).collect();
        assert_eq!(text, b"three\n");
    }

    #[tokio::test]
    async fn timestamps_prefix_rfc3339() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(config(&["echo", "stamped"]), HostConfig::default(), None)
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let options = LogOptions {
            timestamps: true,
            ..Default::default()
        };
        let encoded = engine.container_logs(&id, &options).await.unwrap();
        let frames = decode_frames(&encoded);
        let text = String::from_utf8(frames[0].1.clone()).unwrap();
        assert!(text.ends_with("stamped\n"));
        assert!(text.contains('T') && text.contains('Z'), "RFC3339 prefix: {text}");
    }

    #[tokio::test]
    async fn stderr_selection_filters_streams() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(
                config(&["sh", "-c", "echo out; cat /does-not-exist"]),
                HostConfig::default(),
                None,
            )
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let options = LogOptions {
            stdout: false,
            ..Default::default()
        };
        let encoded = engine.container_logs(&id, &options).await.unwrap();
        let frames = decode_frames(&encoded);
        assert!(frames.iter().all(|(stream, _)| *stream == StreamKind::Stderr));
        assert!(!frames.is_empty(), "stderr output is kept");
    }

    #[tokio::test]
    async fn stream_output_replays_sandbox_history() {
        let (engine, _dir) = sandbox_engine();
        let id = engine
            .create_container(config(&["echo", "early"]), HostConfig::default(), None)
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let mut rx = engine.stream_output(&id).await.unwrap();
        let chunk = rx.recv().await.expect("replayed chunk");
        assert_eq!(chunk.data, b"early\n");
        assert!(rx.recv().await.is_none(), "channel closes after an exited main");
    }

    #[tokio::test]
    async fn remote_logs_come_from_the_provider() {
        let (engine, provider, _dir) = cloud_engine(ProviderKind::Ecs);
        provider.api().script_states(&[ExecutionState::Running]);
        provider.api().push_log(LogChunk::stdout("remote line\n"));

        let id = engine
            .create_container(config(&["tail", "-f", "/dev/null"]), HostConfig::default(), None)
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let encoded = engine
            .container_logs(&id, &LogOptions::default())
            .await
            .unwrap();
        let frames = decode_frames(&encoded);
        assert_eq!(frames[0].1, b"remote line\n");
    }
}
