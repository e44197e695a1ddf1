//! Agent link actor.
//!
//! One [`AgentLink`] owns a bidirectional byte stream to an in-container
//! agent and multiplexes concurrent sessions over it. A single writer task
//! drains the outbound queue so frames never interleave; a reader task
//! demultiplexes inbound frames into bounded per-session inboxes. Slow
//! sessions overflow and are closed with a synthetic error frame instead
//! of stalling the shared connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::constants::{LINK_OUTBOX_CAPACITY, SESSION_INBOX_CAPACITY};
use crate::error::{Error, Result};
use crate::store::Latch;

use super::protocol::Message;

/// A live connection to an agent.
pub struct AgentLink {
    outbound: mpsc::Sender<Message>,
    sessions: Arc<Mutex<HashMap<String, mpsc::Sender<Message>>>>,
    closed: Arc<Latch>,
}

impl AgentLink {
    /// Takes ownership of an established stream and spawns the reader and
    /// writer tasks.
    pub fn spawn<S>(stream: S) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(LINK_OUTBOX_CAPACITY);
        let sessions: Arc<Mutex<HashMap<String, mpsc::Sender<Message>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let closed = Latch::new();

        // Writer: the only task allowed to touch the write half.
        let writer_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let line = match msg.to_json_line() {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "dropping unserializable frame");
                        continue;
                    }
                };
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
            writer_closed.set();
        });

        // Reader: demultiplex frames into session inboxes.
        let reader_sessions = sessions.clone();
        let reader_closed = closed.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) | Err(_) => break,
                };
                if line.trim().is_empty() {
                    continue;
                }
                let msg = match Message::from_json(&line) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(error = %e, "skipping malformed agent frame");
                        continue;
                    }
                };
                let Some(session_id) = msg.session_id().map(str::to_string) else {
                    debug!(?msg, "connection-scoped frame");
                    continue;
                };
                let terminal = msg.is_terminal();

                let sender = {
                    let sessions = reader_sessions.lock().unwrap_or_else(|e| e.into_inner());
                    sessions.get(&session_id).cloned()
                };
                let Some(sender) = sender else { continue };

                let overflow = sender.try_send(msg).is_err();
                if overflow {
                    warn!(session = %session_id, "session inbox overflow, closing session");
                }
                if overflow || terminal {
                    reader_sessions
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&session_id);
                }
            }
            // Dropping the senders resolves every outstanding session.
            reader_sessions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
            reader_closed.set();
        });

        Arc::new(AgentLink {
            outbound: outbound_tx,
            sessions,
            closed,
        })
    }

    /// Queues a frame for the writer task.
    pub async fn send(&self, msg: Message) -> Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| Error::AgentDisconnected("link writer gone".into()))
    }

    /// Registers a session and returns its inbox.
    ///
    /// The inbox yields frames until the session's terminal frame, inbox
    /// overflow, or link loss; all three close the channel.
    pub fn open_session(&self, session_id: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(SESSION_INBOX_CAPACITY);
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), tx);
        rx
    }

    /// Drops a session's inbox registration.
    pub fn close_session(&self, session_id: &str) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
    }

    /// Starts an exec session: registers the inbox, then sends the `exec`
    /// frame.
    pub async fn bridge_exec(
        &self,
        session_id: &str,
        cmd: Vec<String>,
        env: Vec<String>,
        workdir: Option<String>,
        tty: bool,
    ) -> Result<mpsc::Receiver<Message>> {
        let rx = self.open_session(session_id);
        self.send(Message::Exec {
            id: session_id.to_string(),
            cmd,
            env,
            workdir,
            tty,
        })
        .await?;
        Ok(rx)
    }

    /// Starts an attach session against the agent's main process.
    pub async fn bridge_attach(&self, session_id: &str) -> Result<mpsc::Receiver<Message>> {
        let rx = self.open_session(session_id);
        self.send(Message::Attach {
            id: session_id.to_string(),
        })
        .await?;
        Ok(rx)
    }

    /// Level-triggered event fired when the link is lost.
    pub fn closed(&self) -> Arc<Latch> {
        self.closed.clone()
    }

    /// True once either half of the connection has failed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::protocol::decode_data;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    /// Drives the far end of a duplex pipe as a scripted agent.
    async fn read_line(reader: &mut (impl AsyncRead + Unpin)) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            reader.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                break;
            }
            buf.push(byte[0]);
        }
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn exec_frames_reach_the_wire() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let link = AgentLink::spawn(ours);
        let (mut agent_read, _agent_write) = tokio::io::split(theirs);

        let _rx = link
            .bridge_exec("s1", vec!["echo".into(), "hi".into()], vec![], None, false)
            .await
            .unwrap();

        let line = read_line(&mut agent_read).await;
        let msg = Message::from_json(&line).unwrap();
        assert_eq!(
            msg,
            Message::Exec {
                id: "s1".into(),
                cmd: vec!["echo".into(), "hi".into()],
                env: vec![],
                workdir: None,
                tty: false,
            }
        );
    }

    #[tokio::test]
    async fn inbound_frames_route_to_session() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let link = AgentLink::spawn(ours);
        let (_agent_read, mut agent_write) = tokio::io::split(theirs);

        let mut rx = link.open_session("s1");

        let frame = Message::stdout("s1", b"output\n").to_json_line().unwrap();
        agent_write.write_all(frame.as_bytes()).await.unwrap();
        let exit = Message::Exit {
            id: "s1".into(),
            code: 0,
        }
        .to_json_line()
        .unwrap();
        agent_write.write_all(exit.as_bytes()).await.unwrap();

        let msg = rx.recv().await.expect("stdout frame");
        match msg {
            Message::Stdout { data, .. } => assert_eq!(decode_data(&data).unwrap(), b"output\n"),
            other => panic!("unexpected frame {other:?}"),
        }
        let msg = rx.recv().await.expect("exit frame");
        assert_eq!(
            msg,
            Message::Exit {
                id: "s1".into(),
                code: 0
            }
        );
        assert!(
            rx.recv().await.is_none(),
            "exit is the last frame for a session"
        );
    }

    #[tokio::test]
    async fn frames_for_unknown_sessions_are_dropped() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let link = AgentLink::spawn(ours);
        let (_agent_read, mut agent_write) = tokio::io::split(theirs);

        let frame = Message::stdout("ghost", b"x").to_json_line().unwrap();
        agent_write.write_all(frame.as_bytes()).await.unwrap();

        let mut rx = link.open_session("s1");
        let frame = Message::Exit {
            id: "s1".into(),
            code: 3,
        }
        .to_json_line()
        .unwrap();
        agent_write.write_all(frame.as_bytes()).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(Message::Exit {
                id: "s1".into(),
                code: 3
            })
        );
    }

    #[tokio::test]
    async fn link_loss_closes_sessions_and_latch() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let link = AgentLink::spawn(ours);
        let mut rx = link.open_session("s1");

        drop(theirs);

        tokio::time::timeout(Duration::from_secs(1), link.closed().wait())
            .await
            .expect("closed latch fires on link loss");
        assert!(rx.recv().await.is_none(), "sessions resolve on link loss");
        assert!(link.is_closed());
    }
}
