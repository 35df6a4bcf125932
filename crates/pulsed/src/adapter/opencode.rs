//! Adapter for the OpenCode CLI.
//!
//! OpenCode prints plain text rather than a structured stream, so the
//! whole stdout becomes the result text and each line is surfaced as a
//! `text` event. There is no tool-call protocol to translate.

use super::{
    run_streaming, timeout_secs, AdapterError, AgentAdapter, ExecCallbacks, ExecutionResult,
};
use async_trait::async_trait;
use pulse_core::config::{AgentKind, WorkspaceConfig};
use pulse_core::conversation::ConversationTurn;
use pulse_core::stream::{LineBuffer, StreamEvent, StreamParser};

/// Sink for unstructured stdout: lines become `text` events and the
/// accumulated text becomes the result.
#[derive(Debug, Default)]
struct PlainTextParser {
    lines: LineBuffer,
    text: String,
}

impl PlainTextParser {
    fn record(&mut self, line: &str) -> Vec<StreamEvent> {
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(line);
        if line.trim().is_empty() {
            Vec::new()
        } else {
            vec![StreamEvent::Text(line.to_string())]
        }
    }
}

impl StreamParser for PlainTextParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for line in self.lines.push(chunk) {
            events.extend(self.record(&line));
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        match self.lines.flush() {
            Some(line) => self.record(&line),
            None => Vec::new(),
        }
    }

    fn take_turns(&mut self) -> Vec<ConversationTurn> {
        let text = self.text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        vec![ConversationTurn::Result {
            text: text.to_string(),
            cost_usd: None,
            duration_ms: None,
            num_turns: None,
        }]
    }

    fn result_text(&self) -> Option<String> {
        let text = self.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

#[derive(Debug, Default)]
pub struct OpencodeAdapter;

impl OpencodeAdapter {
    fn build_args(workspace: &WorkspaceConfig) -> Vec<String> {
        let mut args = vec!["run".to_string()];
        if let Some(model) = &workspace.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }
}

#[async_trait]
impl AgentAdapter for OpencodeAdapter {
    fn name(&self) -> &'static str {
        "opencode"
    }

    fn command(&self) -> &str {
        "opencode"
    }

    fn validate(&self, workspace: &WorkspaceConfig) -> Result<(), AdapterError> {
        if workspace.agent != AgentKind::Opencode {
            return Err(AdapterError::AgentMismatch {
                declared: workspace.agent.to_string(),
                invoked: self.name(),
            });
        }
        if matches!(&workspace.model, Some(model) if model.trim().is_empty()) {
            return Err(AdapterError::InvalidField {
                agent: self.name(),
                field: "model",
                reason: "must be a non-empty string".to_string(),
            });
        }
        let unsupported: Option<&'static str> = if workspace.session.is_some() {
            Some("session")
        } else if workspace.sandbox.is_some() {
            Some("sandbox")
        } else if workspace.network.is_some() {
            Some("network")
        } else {
            None
        };
        if let Some(field) = unsupported {
            return Err(AdapterError::InvalidField {
                agent: self.name(),
                field,
                reason: "not supported by the opencode agent".to_string(),
            });
        }
        Ok(())
    }

    async fn execute(
        &self,
        prompt: &str,
        workspace: &WorkspaceConfig,
        callbacks: ExecCallbacks,
    ) -> Result<ExecutionResult, AdapterError> {
        self.validate(workspace)?;
        run_streaming(
            self.command(),
            &Self::build_args(workspace),
            &workspace.path,
            prompt,
            timeout_secs(workspace),
            Box::new(PlainTextParser::default()),
            &callbacks,
        )
        .await
    }
}
