//! # SSE Decoder
//!
//! Incremental Server-Sent Events decoder over chunked response bytes.
//!
//! - Line buffering across chunk boundaries (`\n` or `\r\n` endings)
//! - `event`, `data`, `id` and `retry` fields; other fields are ignored
//! - Multiple `data` lines are joined with `\n`
//! - `:` comment lines are skipped
//! - A blank line terminates a frame; a partial frame at end-of-stream is
//!   never emitted

use bytes::BytesMut;
use tracing::warn;

/// One decoded SSE frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event` field.
    pub event: Option<String>,
    /// Joined `data` lines, `None` when the frame had no `data` field.
    pub data: Option<String>,
    /// Value of the `id` field. An empty string resets the last event id.
    pub id: Option<String>,
    /// Reconnection time requested through the `retry` field, in ms.
    pub retry_ms: Option<u64>,
}

impl SseFrame {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_none() && self.id.is_none() && self.retry_ms.is_none()
    }
}

/// Stateful decoder fed with raw body chunks.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: BytesMut,
    pending: SseFrame,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            pending: SseFrame::default(),
        }
    }

    /// Feed a chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line_bytes = self.buffer.split_to(newline_pos + 1);
            line_bytes.truncate(line_bytes.len() - 1);
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.truncate(line_bytes.len() - 1);
            }

            let Ok(line) = std::str::from_utf8(&line_bytes) else {
                warn!(len = line_bytes.len(), "skipping SSE line with invalid UTF-8");
                continue;
            };

            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Whether a frame has been started but not yet terminated.
    pub fn has_partial_frame(&self) -> bool {
        !self.pending.is_empty() || !self.buffer.is_empty()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            if self.pending.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.pending));
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.pending.event = Some(value.to_owned()),
            "data" => match self.pending.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.pending.data = Some(value.to_owned()),
            },
            "id" if !value.contains('\0') => self.pending.id = Some(value.to_owned()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.pending.retry_ms = Some(ms);
                }
            }
            _ => {}
        }

        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
