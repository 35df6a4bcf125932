//! Adapter for the Codex CLI (Format B stream output).

use super::{
    run_streaming, timeout_secs, AdapterError, AgentAdapter, ExecCallbacks, ExecutionResult,
};
use async_trait::async_trait;
use pulse_core::config::{AgentKind, SandboxMode, WorkspaceConfig};
use pulse_core::stream::codex::CodexStreamParser;

#[derive(Debug, Default)]
pub struct CodexAdapter;

impl CodexAdapter {
    fn build_args(workspace: &WorkspaceConfig) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "--json".to_string()];

        if let Some(model) = &workspace.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        let sandbox = workspace.sandbox.unwrap_or(SandboxMode::WorkspaceWrite);
        args.push("--sandbox".to_string());
        args.push(sandbox.as_str().to_string());
        if workspace.network == Some(true) {
            args.push("-c".to_string());
            args.push("sandbox_workspace_write.network_access=true".to_string());
        }

        // Read the prompt from stdin.
        args.push("-".to_string());
        args
    }
}

#[async_trait]
impl AgentAdapter for CodexAdapter {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn command(&self) -> &str {
        "codex"
    }

    fn validate(&self, workspace: &WorkspaceConfig) -> Result<(), AdapterError> {
        if workspace.agent != AgentKind::Codex {
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
        if workspace.session.is_some() {
            return Err(AdapterError::InvalidField {
                agent: self.name(),
                field: "session",
                reason: "only supported by the claude agent".to_string(),
            });
        }
        if workspace.network == Some(true)
            && workspace.sandbox == Some(SandboxMode::ReadOnly)
        {
            return Err(AdapterError::InvalidField {
                agent: self.name(),
                field: "network",
                reason: "read-only sandbox cannot enable network access".to_string(),
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
            Box::new(CodexStreamParser::new()),
            &callbacks,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> WorkspaceConfig {
        let mut ws = WorkspaceConfig::new("/tmp/demo");
        ws.interval = Some("1h".to_string());
        ws.agent = AgentKind::Codex;
        ws
    }

    #[test]
    fn args_default_to_workspace_write_sandbox() {
        let args = CodexAdapter::build_args(&workspace());
        let joined = args.join(" ");
        assert!(joined.starts_with("exec --json"));
        assert!(joined.contains("--sandbox workspace-write"));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn args_respect_sandbox_and_network() {
        let mut ws = workspace();
        ws.sandbox = Some(SandboxMode::ReadOnly);
        let joined = CodexAdapter::build_args(&ws).join(" ");
        assert!(joined.contains("--sandbox read-only"));

        let mut ws = workspace();
        ws.network = Some(true);
        let joined = CodexAdapter::build_args(&ws).join(" ");
        assert!(joined.contains("sandbox_workspace_write.network_access=true"));
    }

    #[test]
    fn validate_rejects_agent_mismatch() {
        let mut ws = workspace();
        ws.agent = AgentKind::Claude;
        assert!(matches!(
            CodexAdapter.validate(&ws),
            Err(AdapterError::AgentMismatch { .. })
        ));
    }

    #[test]
    fn validate_rejects_claude_only_session() {
        let mut ws = workspace();
        ws.session = Some("sess".to_string());
        assert!(matches!(
            CodexAdapter.validate(&ws),
            Err(AdapterError::InvalidField { field: "session", .. })
        ));
    }

    #[test]
    fn validate_rejects_network_with_read_only_sandbox() {
        let mut ws = workspace();
        ws.sandbox = Some(SandboxMode::ReadOnly);
        ws.network = Some(true);
        assert!(matches!(
            CodexAdapter.validate(&ws),
            Err(AdapterError::InvalidField { field: "network", .. })
        ));
    }
}
