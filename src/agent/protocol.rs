//! Agent wire protocol.
//!
//! JSON messages framed as newline-delimited lines over the upgraded
//! bidirectional channel. Concurrent sessions share one connection and are
//! routed by the `id` field; `exit` is the final message for its id.
//!
//! # Message Flow
//!
//! ```text
//!  orchestrator                                agent
//!       │  {"type":"exec","id":"s1","cmd":[..]}  │
//!       │ ──────────────────────────────────────►│ spawn process
//!       │  {"type":"stdin","id":"s1","data":b64} │
//!       │ ──────────────────────────────────────►│
//!       │◄────────────────────────────────────── │ {"type":"stdout",...}
//!       │◄────────────────────────────────────── │ {"type":"exit","id":"s1","code":0}
//! ```

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reserved session id addressing the agent's main process.
pub const MAIN_SESSION: &str = "main";

/// A frame on the agent channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    // -------------------------------------------------------------------------
    // Client -> agent
    // -------------------------------------------------------------------------
    /// Start a new process under session `id`.
    Exec {
        id: String,
        cmd: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        env: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workdir: Option<String>,
        #[serde(default)]
        tty: bool,
    },
    /// Attach session `id` to the main process's buffered + live output.
    Attach { id: String },
    /// Base64 stdin bytes for session `id`.
    Stdin { id: String, data: String },
    /// EOF for session `id`'s stdin.
    CloseStdin { id: String },
    /// Deliver a POSIX signal (by name) to session `id`.
    Signal { id: String, signal: String },
    /// Resize session `id`'s terminal.
    Resize { id: String, width: u32, height: u32 },

    // -------------------------------------------------------------------------
    // Agent -> client
    // -------------------------------------------------------------------------
    /// Base64 stdout bytes from session `id`.
    Stdout { id: String, data: String },
    /// Base64 stderr bytes from session `id`.
    Stderr { id: String, data: String },
    /// Terminal frame for session `id`.
    Exit { id: String, code: i64 },
    /// Session-scoped failure; also terminal.
    Error { id: String, message: String },
    /// Connection-scoped report about the main process.
    Status {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i64>,
    },
}

impl Message {
    /// Session this frame belongs to, if any (`status` is connection-wide).
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Message::Exec { id, .. }
            | Message::Attach { id }
            | Message::Stdin { id, .. }
            | Message::CloseStdin { id }
            | Message::Signal { id, .. }
            | Message::Resize { id, .. }
            | Message::Stdout { id, .. }
            | Message::Stderr { id, .. }
            | Message::Exit { id, .. }
            | Message::Error { id, .. } => Some(id),
            Message::Status { .. } => None,
        }
    }

    /// True when no further frames may follow for this session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Message::Exit { .. } | Message::Error { .. })
    }

    /// Serializes to one newline-terminated JSON line.
    pub fn to_json_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parses a frame from a JSON line.
    pub fn from_json(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| Error::InvalidParameter(format!("malformed agent frame: {e}")))
    }

    /// Builds a stdout frame from raw bytes.
    pub fn stdout(id: impl Into<String>, data: &[u8]) -> Self {
        Message::Stdout {
            id: id.into(),
            data: encode_data(data),
        }
    }

    /// Builds a stderr frame from raw bytes.
    pub fn stderr(id: impl Into<String>, data: &[u8]) -> Self {
        Message::Stderr {
            id: id.into(),
            data: encode_data(data),
        }
    }

    /// Builds a stdin frame from raw bytes.
    pub fn stdin(id: impl Into<String>, data: &[u8]) -> Self {
        Message::Stdin {
            id: id.into(),
            data: encode_data(data),
        }
    }
}

/// Encodes payload bytes for the wire.
pub fn encode_data(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decodes a payload field. Malformed base64 is a protocol error.
pub fn decode_data(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::InvalidParameter(format!("malformed base64 payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_serialization() {
        let msg = Message::Exec {
            id: "s1".into(),
            cmd: vec!["echo".into(), "hi".into()],
            env: vec!["A=1".into()],
            workdir: Some("/tmp".into()),
            tty: false,
        };
        let line = msg.to_json_line().unwrap();
        assert!(line.ends_with('\n'), "frames are newline-terminated");
        assert!(line.contains("\"type\":\"exec\""));

        let parsed = Message::from_json(&line).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let msg = Message::Exec {
            id: "s1".into(),
            cmd: vec!["ls".into()],
            env: Vec::new(),
            workdir: None,
            tty: false,
        };
        let line = msg.to_json_line().unwrap();
        assert!(!line.contains("workdir"));
        assert!(!line.contains("env"));
    }

    #[test]
    fn data_frames_round_trip_base64() {
        let msg = Message::stdout("s1", b"hello\n");
        if let Message::Stdout { data, .. } = &msg {
            assert_eq!(decode_data(data).unwrap(), b"hello\n");
        } else {
            panic!("expected stdout frame");
        }
    }

    #[test]
    fn terminal_frames() {
        assert!(Message::Exit { id: "s".into(), code: 0 }.is_terminal());
        assert!(Message::Error {
            id: "s".into(),
            message: "boom".into()
        }
        .is_terminal());
        assert!(!Message::stdout("s", b"x").is_terminal());
    }

    #[test]
    fn status_has_no_session() {
        let msg = Message::Status {
            status: "running".into(),
            code: None,
        };
        assert!(msg.session_id().is_none());
        let line = msg.to_json_line().unwrap();
        assert!(!line.contains("code"), "None code omitted from the wire");
    }

    #[test]
    fn malformed_frames_are_invalid_parameter() {
        let err = Message::from_json("{not json").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
