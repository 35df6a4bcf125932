//! Parser for the Claude CLI's line-delimited stream format.
//!
//! Each line is one JSON envelope with a `type` of `system`, `assistant`,
//! `user`, or `result`. Assistant messages carry free text and/or
//! `tool_use` blocks; a tool use stays pending until a later user-role
//! message supplies the matching `tool_result`, at which point the output
//! and elapsed time are backfilled. A `result` envelope is terminal.

use super::{LineBuffer, StreamEvent, StreamParser};
use crate::conversation::{ConversationTurn, ToolCall};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

struct PendingCall {
    name: String,
    started: Instant,
}

/// Incremental state machine for Format A.
#[derive(Default)]
pub struct ClaudeStreamParser {
    lines: LineBuffer,
    turns: Vec<ConversationTurn>,
    /// Tool uses awaiting their result, keyed by tool-use id.
    pending: HashMap<String, PendingCall>,
    result: Option<String>,
}

impl std::fmt::Debug for ClaudeStreamParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeStreamParser")
            .field("turns", &self.turns.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl ClaudeStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        let envelope: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(err) => {
                debug!(line = trimmed, error = %err, "skipping unparseable stream line");
                return Vec::new();
            }
        };

        match envelope.get("type").and_then(Value::as_str) {
            Some("assistant") => self.handle_assistant(&envelope),
            Some("user") => {
                self.handle_user(&envelope);
                Vec::new()
            }
            Some("result") => {
                self.handle_result(&envelope);
                Vec::new()
            }
            // `system` envelopes (init, hooks) carry no conversation data.
            _ => Vec::new(),
        }
    }

    fn handle_assistant(&mut self, envelope: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let mut text_parts: Vec<&str> = Vec::new();
        let mut tool_calls = Vec::new();

        let blocks = envelope
            .pointer("/message/content")
            .and_then(Value::as_array);
        for block in blocks.into_iter().flatten() {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        text_parts.push(text);
                    }
                }
                Some("tool_use") => {
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    if let Some(id) = block.get("id").and_then(Value::as_str) {
                        self.pending.insert(
                            id.to_string(),
                            PendingCall {
                                name: name.clone(),
                                started: Instant::now(),
                            },
                        );
                    }
                    events.push(StreamEvent::ToolCall {
                        name: name.clone(),
                        input: input.clone(),
                    });
                    tool_calls.push(ToolCall::pending(name, input));
                }
                _ => {}
            }
        }

        let text = if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join(""))
        };
        if let Some(text) = &text {
            events.push(StreamEvent::Text(text.clone()));
        }
        if text.is_some() || !tool_calls.is_empty() {
            self.turns.push(ConversationTurn::Assistant { text, tool_calls });
        }
        events
    }

    fn handle_user(&mut self, envelope: &Value) {
        let blocks = envelope
            .pointer("/message/content")
            .and_then(Value::as_array);
        for block in blocks.into_iter().flatten() {
            if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                continue;
            }
            let Some(id) = block.get("tool_use_id").and_then(Value::as_str) else {
                continue;
            };
            let Some(pending) = self.pending.remove(id) else {
                debug!(tool_use_id = id, "tool result without a pending tool use");
                continue;
            };
            let output = tool_result_content(block);
            let duration_ms = pending.started.elapsed().as_millis() as u64;
            self.resolve_call(&pending.name, output, duration_ms);
        }
    }

    /// Backfill output onto the most recent pending call with this name,
    /// searching the turn history newest-first; the first unresolved match
    /// wins.
    fn resolve_call(&mut self, name: &str, output: String, duration_ms: u64) {
        for turn in self.turns.iter_mut().rev() {
            let ConversationTurn::Assistant { tool_calls, .. } = turn else {
                continue;
            };
            for call in tool_calls.iter_mut().rev() {
                if call.name == name && call.is_pending() {
                    call.output = Some(output);
                    call.duration_ms = Some(duration_ms);
                    return;
                }
            }
        }
        debug!(tool = name, "no unresolved call found for tool result");
    }

    fn handle_result(&mut self, envelope: &Value) {
        let text = envelope
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.result = Some(text.clone());
        self.turns.push(ConversationTurn::Result {
            text,
            cost_usd: envelope.get("total_cost_usd").and_then(Value::as_f64),
            duration_ms: envelope.get("duration_ms").and_then(Value::as_u64),
            num_turns: envelope
                .get("num_turns")
                .and_then(Value::as_u64)
                .map(|n| n as u32),
        });
    }
}

/// Flatten a `tool_result` content field (plain string or text blocks).
fn tool_result_content(block: &Value) -> String {
    match block.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

impl StreamParser for ClaudeStreamParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for line in self.lines.push(chunk) {
            events.extend(self.handle_line(&line));
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        match self.lines.flush() {
            Some(line) => self.handle_line(&line),
            None => Vec::new(),
        }
    }

    fn take_turns(&mut self) -> Vec<ConversationTurn> {
        std::mem::take(&mut self.turns)
    }

    fn result_text(&self) -> Option<String> {
        self.result.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOOL_USE: &str = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"checking"},{"type":"tool_use","id":"toolu_01","name":"Bash","input":{"command":"git status"}}]}}"#;
    const TOOL_RESULT: &str = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_01","content":"clean"}]}}"#;
    const RESULT: &str = r#"{"type":"result","result":"HEARTBEAT_OK","total_cost_usd":0.04,"duration_ms":5100,"num_turns":2}"#;

    fn feed(input: &str) -> (ClaudeStreamParser, Vec<StreamEvent>) {
        let mut parser = ClaudeStreamParser::new();
        let events = parser.parse_all(input);
        (parser, events)
    }

    #[test]
    fn tool_use_then_result_resolves_the_call() {
        let input = format!("{TOOL_USE}\n{TOOL_RESULT}\n");
        let (mut parser, events) = feed(&input);

        let turns = parser.take_turns();
        assert_eq!(turns.len(), 1);
        let ConversationTurn::Assistant { text, tool_calls } = &turns[0] else {
            panic!("expected assistant turn");
        };
        assert_eq!(text.as_deref(), Some("checking"));
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].name, "Bash");
        assert_eq!(tool_calls[0].output.as_deref(), Some("clean"));
        assert!(tool_calls[0].duration_ms.is_some());

        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::ToolCall { name, .. } if name == "Bash")));
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Text(t) if t == "checking")));
    }

    #[test]
    fn arbitrary_chunking_produces_identical_turns() {
        let input = format!("{TOOL_USE}\n{TOOL_RESULT}\n{RESULT}\n");

        let (mut whole, _) = feed(&input);
        let expected = whole.take_turns();

        for chunk_size in [1, 3, 7, 16, 64] {
            let mut parser = ClaudeStreamParser::new();
            for chunk in input.as_bytes().chunks(chunk_size) {
                parser.push(chunk);
            }
            parser.finish();
            assert_eq!(
                parser.take_turns(),
                expected,
                "chunk size {chunk_size} diverged"
            );
        }
    }

    #[test]
    fn result_envelope_is_terminal() {
        let (mut parser, _) = feed(&format!("{RESULT}\n"));
        assert_eq!(parser.result_text().as_deref(), Some("HEARTBEAT_OK"));

        let turns = parser.take_turns();
        let ConversationTurn::Result {
            text,
            cost_usd,
            duration_ms,
            num_turns,
        } = &turns[0]
        else {
            panic!("expected result turn");
        };
        assert_eq!(text, "HEARTBEAT_OK");
        assert_eq!(*cost_usd, Some(0.04));
        assert_eq!(*duration_ms, Some(5100));
        assert_eq!(*num_turns, Some(2));
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let input = format!("not json at all\n{{\"type\":\n{RESULT}\n");
        let (parser, _) = feed(&input);
        assert_eq!(parser.result_text().as_deref(), Some("HEARTBEAT_OK"));
    }

    #[test]
    fn backfill_targets_most_recent_pending_call() {
        let first = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"a","name":"Bash","input":{"command":"one"}}]}}"#;
        let second = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"b","name":"Bash","input":{"command":"two"}}]}}"#;
        let result_b = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"b","content":"done"}]}}"#;

        let (mut parser, _) = feed(&format!("{first}\n{second}\n{result_b}\n"));
        let turns = parser.take_turns();

        let call_of = |turn: &ConversationTurn| -> ToolCall {
            let ConversationTurn::Assistant { tool_calls, .. } = turn else {
                panic!("expected assistant turn");
            };
            tool_calls[0].clone()
        };
        // The newer pending call is resolved, the older one stays pending.
        assert!(call_of(&turns[0]).is_pending());
        assert_eq!(call_of(&turns[1]).output.as_deref(), Some("done"));
    }

    #[test]
    fn tool_result_block_content_is_flattened() {
        let use_line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"x","name":"Read","input":{}}]}}"#;
        let result_line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"x","content":[{"type":"text","text":"line 1"},{"type":"text","text":"line 2"}]}]}}"#;
        let (mut parser, _) = feed(&format!("{use_line}\n{result_line}\n"));

        let turns = parser.take_turns();
        let ConversationTurn::Assistant { tool_calls, .. } = &turns[0] else {
            panic!("expected assistant turn");
        };
        assert_eq!(tool_calls[0].output.as_deref(), Some("line 1\nline 2"));
    }

    #[test]
    fn system_envelopes_are_ignored() {
        let input = r#"{"type":"system","subtype":"init","model":"x"}"#;
        let (mut parser, events) = feed(&format!("{input}\n"));
        assert!(events.is_empty());
        assert!(parser.take_turns().is_empty());
    }

    #[test]
    fn trailing_line_without_newline_is_flushed() {
        let mut parser = ClaudeStreamParser::new();
        parser.push(RESULT.as_bytes());
        assert_eq!(parser.result_text(), None);
        parser.finish();
        assert_eq!(parser.result_text().as_deref(), Some("HEARTBEAT_OK"));
    }
}
