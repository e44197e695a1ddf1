//! Multiplexed log-stream framing.
//!
//! Non-TTY log and attach streams interleave stdout and stderr using an
//! 8-byte header per chunk: `[stream_type, 0, 0, 0, len_be_u32]`, with
//! stream type 1 for stdout and 2 for stderr. TTY streams are raw bytes.

use serde::{Deserialize, Serialize};

/// Which output stream a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    /// Wire byte for the frame header.
    pub fn header_byte(self) -> u8 {
        match self {
            StreamKind::Stdout => 1,
            StreamKind::Stderr => 2,
        }
    }
}

/// One captured output chunk with its origin stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub stream: StreamKind,
    pub data: Vec<u8>,
    /// Capture time, RFC3339Nano when rendered with timestamps.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl LogChunk {
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        LogChunk {
            stream: StreamKind::Stdout,
            data: data.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn stderr(data: impl Into<Vec<u8>>) -> Self {
        LogChunk {
            stream: StreamKind::Stderr,
            data: data.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Appends one framed chunk to `out`.
pub fn write_frame(out: &mut Vec<u8>, stream: StreamKind, data: &[u8]) {
    let mut header = [0u8; 8];
    header[0] = stream.header_byte();
    header[4..].copy_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(data);
}

/// Encodes chunks for a log response.
///
/// `timestamps` prefixes each chunk's payload with its RFC3339Nano capture
/// time; `tty` disables framing entirely.
pub fn encode_stream(chunks: &[LogChunk], tty: bool, timestamps: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in chunks {
        let payload = if timestamps {
            let mut p = chunk
                .timestamp
                .format("%Y-%m-%dT%H:%M:%S%.9fZ ")
                .to_string()
                .into_bytes();
            p.extend_from_slice(&chunk.data);
            p
        } else {
            chunk.data.clone()
        };
        if tty {
            out.extend_from_slice(&payload);
        } else {
            write_frame(&mut out, chunk.stream, &payload);
        }
    }
    out
}

/// Splits a framed stream back into `(stream, payload)` pairs.
///
/// Used by tests and the attach bridge; trailing partial frames are
/// ignored.
pub fn decode_frames(data: &[u8]) -> Vec<(StreamKind, Vec<u8>)> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos + 8 <= data.len() {
        let stream = match data[pos] {
            1 => StreamKind::Stdout,
            2 => StreamKind::Stderr,
            _ => break,
        };
        let len = u32::from_be_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
            as usize;
        pos += 8;
        if pos + len > data.len() {
            break;
        }
        out.push((stream, data[pos..pos + len].to_vec()));
        pos += len;
    }
    out
}

/// Keeps the last `n` newline-terminated lines of a chunk sequence, for
/// the `tail` log option.
pub fn tail_chunks(chunks: &[LogChunk], n: usize) -> Vec<LogChunk> {
    let total_lines: usize = chunks
        .iter()
        .map(|c| c.data.iter().filter(|&&b| b == b'\n').count())
        .sum();
    if total_lines <= n {
        return chunks.to_vec();
    }
    let mut skip = total_lines - n;
    let mut out = Vec::new();
    for chunk in chunks {
        if skip == 0 {
            out.push(chunk.clone());
            continue;
        }
        let lines = chunk.data.iter().filter(|&&b| b == b'\n').count();
        if lines <= skip {
            skip -= lines;
            continue;
        }
        // split inside this chunk
        let mut seen = 0;
        let mut start = 0;
        for (i, &b) in chunk.data.iter().enumerate() {
            if b == b'\n' {
                seen += 1;
                if seen == skip {
                    start = i + 1;
                    break;
                }
            }
        }
        skip = 0;
        if start < chunk.data.len() {
            out.push(LogChunk {
                stream: chunk.stream,
                data: chunk.data[start..].to_vec(),
                timestamp: chunk.timestamp,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_layout() {
        let mut out = Vec::new();
        write_frame(&mut out, StreamKind::Stdout, b"hello world\n");
        assert_eq!(out[0], 1, "stdout stream byte");
        assert_eq!(&out[1..4], &[0, 0, 0], "padding bytes");
        assert_eq!(&out[4..8], &12u32.to_be_bytes(), "big-endian length");
        assert_eq!(&out[8..], b"hello world\n");
    }

    #[test]
    fn round_trip_mixed_streams() {
        let chunks = vec![LogChunk::stdout("out\n"), LogChunk::stderr("err\n")];
        let encoded = encode_stream(&chunks, false, false);
        let decoded = decode_frames(&encoded);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], (StreamKind::Stdout, b"out\n".to_vec()));
        assert_eq!(decoded[1], (StreamKind::Stderr, b"err\n".to_vec()));
    }

    #[test]
    fn tty_streams_are_raw() {
        let chunks = vec![LogChunk::stdout("raw")];
        assert_eq!(encode_stream(&chunks, true, false), b"raw");
    }

    #[test]
    fn timestamps_prefix_payload() {
        let chunks = vec![LogChunk::stdout("x\n")];
        let encoded = encode_stream(&chunks, true, true);
        let text = String::from_utf8(encoded).unwrap();
        assert!(text.ends_with("x\n"));
        assert!(text.contains('T') && text.contains('Z'), "RFC3339 prefix");
    }

    #[test]
    fn tail_keeps_last_lines() {
        let chunks = vec![
            LogChunk::stdout("a\nb\n"),
            LogChunk::stdout("c\n"),
            LogChunk::stdout("d\n"),
        ];
        let tailed = tail_chunks(&chunks, 2);
        let text: Vec<u8> = tailed.iter().flat_map(|c| c.data.clone()).collect();
        assert_eq!(text, b"c\nd\n");
    }

    #[test]
    fn tail_splits_inside_chunk() {
        let chunks = vec![LogChunk::stdout("a\nb\nc\n")];
        let tailed = tail_chunks(&chunks, 1);
        let text: Vec<u8> = tailed.iter().flat_map(|c| c.data.clone()).collect();
        assert_eq!(text, b"c\n");
    }
}
