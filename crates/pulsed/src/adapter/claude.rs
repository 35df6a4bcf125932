//! Adapter for the Claude Code CLI (Format A stream output).

use super::{
    deny, run_streaming, timeout_secs, AdapterError, AgentAdapter, ExecCallbacks, ExecutionResult,
};
use async_trait::async_trait;
use pulse_core::config::{AgentKind, WorkspaceConfig};
use pulse_core::stream::claude::ClaudeStreamParser;

#[derive(Debug, Default)]
pub struct ClaudeAdapter;

impl ClaudeAdapter {
    fn build_args(workspace: &WorkspaceConfig) -> Vec<String> {
        let mut args: Vec<String> = [
            "-p",
            "--verbose",
            "--output-format",
            "stream-json",
            // Runs are unattended; interactive permission prompts would
            // hang the daemon. The deny-list below is the guard rail.
            "--dangerously-skip-permissions",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect();

        if let Some(model) = &workspace.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(session) = &workspace.session {
            args.push("--resume".to_string());
            args.push(session.clone());
        }
        if let Some(max_turns) = workspace.max_turns {
            args.push("--max-turns".to_string());
            args.push(max_turns.to_string());
        }
        args.extend(deny::disallowed_tools_args(workspace.permissions.as_ref()));
        args
    }
}

#[async_trait]
impl AgentAdapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn command(&self) -> &str {
        "claude"
    }

    fn validate(&self, workspace: &WorkspaceConfig) -> Result<(), AdapterError> {
        if workspace.agent != AgentKind::Claude {
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
        if matches!(&workspace.session, Some(session) if session.trim().is_empty()) {
            return Err(AdapterError::InvalidField {
                agent: self.name(),
                field: "session",
                reason: "must be a non-empty string".to_string(),
            });
        }
        if workspace.sandbox.is_some() {
            return Err(AdapterError::InvalidField {
                agent: self.name(),
                field: "sandbox",
                reason: "only supported by the codex agent".to_string(),
            });
        }
        if workspace.network.is_some() {
            return Err(AdapterError::InvalidField {
                agent: self.name(),
                field: "network",
                reason: "only supported by the codex agent".to_string(),
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
            Box::new(ClaudeStreamParser::new()),
            &callbacks,
        )
        .await
    }
}
