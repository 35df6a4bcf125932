//! Incremental parsers for the agent wire formats.
//!
//! Two protocols are spoken by the supported CLIs: Claude-style
//! `system`/`assistant`/`user`/`result` envelopes ([`claude`]) and
//! Codex-style `thread`/`turn`/`item` events ([`codex`]). Both converge on
//! the [`ConversationTurn`] model and fire the same side-channel events as
//! data arrives. Parsers accept arbitrarily-chunked byte input; a line
//! split across chunks is buffered until complete. A malformed line is
//! skipped with a diagnostic and never aborts the rest of the stream.

pub mod claude;
pub mod codex;

use crate::conversation::ConversationTurn;
use serde_json::Value;

pub use claude::ClaudeStreamParser;
pub use codex::CodexStreamParser;

/// Side-channel event fired while a stream is being parsed, before the
/// final turn list is complete.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Assistant free text arrived.
    Text(String),
    /// The agent invoked a tool.
    ToolCall { name: String, input: Value },
}

/// An incremental stream parser drivable directly off a subprocess pipe.
///
/// State transitions and emitted events are produced together, atomically,
/// per input line.
pub trait StreamParser: Send {
    /// Feed a chunk of bytes; returns the events produced by every line
    /// completed within it.
    fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent>;

    /// Signal end of stream, flushing any buffered partial line.
    fn finish(&mut self) -> Vec<StreamEvent>;

    /// Take the accumulated turn list (leaves the parser empty).
    fn take_turns(&mut self) -> Vec<ConversationTurn>;

    /// The terminal result text, if the stream produced one.
    fn result_text(&self) -> Option<String>;

    /// One-shot entry point: parse a whole transcript at once.
    fn parse_all(&mut self, input: &str) -> Vec<StreamEvent> {
        let mut events = self.push(input.as_bytes());
        events.extend(self.finish());
        events
    }
}

/// Accumulates raw bytes and yields complete lines, buffering a partial
/// trailing line across chunk boundaries. Shared by the stream parsers and
/// the socket client so every NDJSON consumer has the same discipline.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line it closes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // trailing \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Drain the trailing partial line, if any. Call at end of stream.
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(line)
    }
}
