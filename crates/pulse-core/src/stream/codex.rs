//! Parser for the Codex CLI's line-delimited thread/turn/item format.
//!
//! `item.started` records a start time keyed by item id so that
//! `item.completed` can compute a duration. Completed items map onto the
//! conversation model: `agent_message` becomes assistant text (the latest
//! one is the result text), `command_execution` / `mcp_tool_call` /
//! `file_change` each become one resolved tool call. Unrecognized item
//! types are ignored without aborting the stream; `turn.failed` and
//! `error` events are logged, never raised.

use super::{LineBuffer, StreamEvent, StreamParser};
use crate::conversation::{ConversationTurn, ToolCall};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, warn};

/// Incremental state machine for Format B.
#[derive(Default)]
pub struct CodexStreamParser {
    lines: LineBuffer,
    turns: Vec<ConversationTurn>,
    /// Start times of items seen via `item.started`, keyed by item id.
    started: HashMap<String, Instant>,
    /// Latest agent message; becomes the result text.
    result: Option<String>,
}

impl std::fmt::Debug for CodexStreamParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodexStreamParser")
            .field("turns", &self.turns.len())
            .field("started", &self.started.len())
            .finish()
    }
}

impl CodexStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        let event: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(err) => {
                debug!(line = trimmed, error = %err, "skipping unparseable stream line");
                return Vec::new();
            }
        };

        match event.get("type").and_then(Value::as_str) {
            Some("item.started") => {
                if let Some(id) = event.pointer("/item/id").and_then(Value::as_str) {
                    self.started.insert(id.to_string(), Instant::now());
                }
                Vec::new()
            }
            Some("item.completed") => match event.get("item") {
                Some(item) => self.handle_item(item),
                None => Vec::new(),
            },
            Some("turn.failed") | Some("error") => {
                let message = event
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .or_else(|| event.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                warn!(error = message, "agent stream reported a failure");
                Vec::new()
            }
            // thread.started, turn.started, turn.completed and anything
            // newer carry no conversation data we track.
            _ => Vec::new(),
        }
    }

    fn handle_item(&mut self, item: &Value) -> Vec<StreamEvent> {
        let duration_ms = item
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| self.started.remove(id))
            .map(|started| started.elapsed().as_millis() as u64);

        match item.get("type").and_then(Value::as_str) {
            Some("agent_message") => {
                let text = item
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.result = Some(text.clone());
                self.turns.push(ConversationTurn::Assistant {
                    text: Some(text.clone()),
                    tool_calls: Vec::new(),
                });
                vec![StreamEvent::Text(text)]
            }
            Some("command_execution") => {
                let input = json!({
                    "command": item.get("command").cloned().unwrap_or(Value::Null),
                });
                let output = item
                    .get("aggregated_output")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.push_resolved_call("command_execution", input, output, duration_ms)
            }
            Some("mcp_tool_call") => {
                let server = item.get("server").and_then(Value::as_str).unwrap_or("mcp");
                let tool = item.get("tool").and_then(Value::as_str).unwrap_or("tool");
                let name = format!("{server}.{tool}");
                let input = item.get("arguments").cloned().unwrap_or(Value::Null);
                let output = item
                    .get("result")
                    .map(|result| result.to_string())
                    .unwrap_or_default();
                self.push_resolved_call(&name, input, output, duration_ms)
            }
            Some("file_change") => {
                let input = json!({
                    "changes": item.get("changes").cloned().unwrap_or(Value::Null),
                });
                let output = item
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("completed")
                    .to_string();
                self.push_resolved_call("file_change", input, output, duration_ms)
            }
            other => {
                debug!(item_type = ?other, "ignoring unrecognized item");
                Vec::new()
            }
        }
    }

    fn push_resolved_call(
        &mut self,
        name: &str,
        input: Value,
        output: String,
        duration_ms: Option<u64>,
    ) -> Vec<StreamEvent> {
        let event = StreamEvent::ToolCall {
            name: name.to_string(),
            input: input.clone(),
        };
        self.turns.push(ConversationTurn::Assistant {
            text: None,
            tool_calls: vec![ToolCall {
                name: name.to_string(),
                input,
                output: Some(output),
                duration_ms: duration_ms.or(Some(0)),
            }],
        });
        vec![event]
    }

    /// Close the conversation with a result turn once the stream ends.
    fn seal(&mut self) {
        let Some(text) = self.result.clone() else {
            return;
        };
        let already_sealed = self
            .turns
            .last()
            .is_some_and(|turn| matches!(turn, ConversationTurn::Result { .. }));
        if !already_sealed {
            self.turns.push(ConversationTurn::Result {
                text,
                cost_usd: None,
                duration_ms: None,
                num_turns: None,
            });
        }
    }
}

impl StreamParser for CodexStreamParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for line in self.lines.push(chunk) {
            events.extend(self.handle_line(&line));
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let events = match self.lines.flush() {
            Some(line) => self.handle_line(&line),
            None => Vec::new(),
        };
        self.seal();
        events
    }

    fn take_turns(&mut self) -> Vec<ConversationTurn> {
        std::mem::take(&mut self.turns)
    }

    fn result_text(&self) -> Option<String> {
        self.result.clone()
    }
}
