//! Agent adapters: the process-execution boundary.
//!
//! An adapter translates a workspace config into one invocation of an
//! external agent CLI. The shared executor here owns the hazardous parts:
//! login-shell wrapping with proper escaping, piping the prompt via stdin,
//! teeing stdout into both the structural parser and a raw capture sink,
//! draining stderr concurrently (reading one pipe to completion before the
//! other can deadlock once a buffer fills), enforcing the per-run timeout,
//! and surfacing the child PID before completion is awaited.

pub mod claude;
pub mod codex;
pub mod deny;
pub mod opencode;

use async_trait::async_trait;
use pulse_core::config::WorkspaceConfig;
use pulse_core::conversation::ConversationTurn;
use pulse_core::stream::{StreamEvent, StreamParser};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use opencode::OpencodeAdapter;

/// Default per-run timeout when the workspace declares none.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Timeout for collecting remaining pipe output after the process exits
/// or is killed.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cap on captured stdout/stderr bytes.
const MAX_OUTPUT_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unknown agent '{name}' (known agents: {known})")]
    UnknownAgent { name: String, known: String },
    #[error("workspace declares agent '{declared}' but the {invoked} adapter was invoked")]
    AgentMismatch {
        declared: String,
        invoked: &'static str,
    },
    #[error("invalid {field} for agent '{agent}': {reason}")]
    InvalidField {
        agent: &'static str,
        field: &'static str,
        reason: String,
    },
    #[error("agent CLI '{command}' not found")]
    CommandNotFound { command: String },
    #[error("agent process timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

type SpawnFn = dyn Fn(u32) + Send + Sync;
type EventFn = dyn Fn(StreamEvent) + Send + Sync;

/// Callbacks fired during one execution: the child PID as soon as it is
/// known (so the runner can register crash-recovery state before awaiting
/// completion), and each side-channel stream event as it arrives.
#[derive(Clone)]
pub struct ExecCallbacks {
    on_spawn: Arc<SpawnFn>,
    on_event: Arc<EventFn>,
}

impl std::fmt::Debug for ExecCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExecCallbacks")
    }
}

impl ExecCallbacks {
    pub fn new(
        on_spawn: impl Fn(u32) + Send + Sync + 'static,
        on_event: impl Fn(StreamEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_spawn: Arc::new(on_spawn),
            on_event: Arc::new(on_event),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {}, |_| {})
    }

    pub fn spawned(&self, pid: u32) {
        (self.on_spawn)(pid);
    }

    pub fn event(&self, event: StreamEvent) {
        (self.on_event)(event);
    }
}

/// Outcome of one agent execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: i32,
    /// Terminal result text from the stream, or the raw stdout for
    /// adapters without a structural protocol.
    pub result_text: String,
    pub turns: Vec<ConversationTurn>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// A named agent capability. Implementations validate their own config
/// fields before any process spawns.
#[async_trait]
pub trait AgentAdapter: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// The CLI binary this adapter drives.
    fn command(&self) -> &str;

    /// Reject config the adapter cannot honor, before spawning anything.
    fn validate(&self, workspace: &WorkspaceConfig) -> Result<(), AdapterError>;

    async fn execute(
        &self,
        prompt: &str,
        workspace: &WorkspaceConfig,
        callbacks: ExecCallbacks,
    ) -> Result<ExecutionResult, AdapterError>;

    /// Probe for the CLI on the user's PATH. Never errors; absence is
    /// `false`.
    async fn is_available(&self) -> bool {
        let mut cmd = login_shell_command("which", &[self.command().to_string()]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        matches!(cmd.status().await, Ok(status) if status.success())
    }

    /// Probe the CLI version. Never errors; failure is `None`.
    async fn version(&self) -> Option<String> {
        let mut cmd = login_shell_command(self.command(), &["--version".to_string()]);
        cmd.stdin(Stdio::null()).stderr(Stdio::null());
        let output = cmd.output().await.ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        text.lines().next().map(|line| line.trim().to_string())
    }
}

/// Maps agent names to adapters. Resolution failures list the known names.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn AgentAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: vec![
                Arc::new(ClaudeAdapter),
                Arc::new(CodexAdapter),
                Arc::new(OpencodeAdapter),
            ],
        }
    }

    #[cfg(test)]
    pub fn with_adapters(adapters: Vec<Arc<dyn AgentAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn AgentAdapter>, AdapterError> {
        self.adapters
            .iter()
            .find(|adapter| adapter.name() == name)
            .map(Arc::clone)
            .ok_or_else(|| AdapterError::UnknownAgent {
                name: name.to_string(),
                known: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }
}

/// Single-quote an argument for the shell, escaping embedded quotes, so
/// workspace-controlled content cannot inject commands.
pub fn shell_escape(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Wrap a command through the user's interactive login shell so their PATH
/// customizations apply. On platforms without a login-shell concept the raw
/// command is used unmodified.
#[cfg(unix)]
pub fn login_shell_command(program: &str, args: &[String]) -> Command {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let mut line = shell_escape(program);
    for arg in args {
        line.push(' ');
        line.push_str(&shell_escape(arg));
    }
    let mut cmd = Command::new(shell);
    cmd.arg("-l").arg("-c").arg(line);
    cmd
}

#[cfg(not(unix))]
pub fn login_shell_command(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

/// Read an async pipe to completion with a byte cap, draining past the cap
/// so the child never blocks on a full pipe.
async fn read_bounded<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            warn!(max_bytes, "output exceeded limit, truncating");
            while reader.read(&mut chunk).await? > 0 {}
            break;
        }
        buf.extend_from_slice(&chunk[..n.min(remaining)]);
    }
    Ok(buf)
}

/// Read stdout, feeding each chunk to the parser (firing its events as
/// they occur) while also capturing the raw bytes. Returns the raw capture
/// and the parser with its accumulated state.
async fn tee_stdout<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    mut parser: Box<dyn StreamParser>,
    callbacks: ExecCallbacks,
) -> (Vec<u8>, Box<dyn StreamParser>) {
    let mut raw = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "stdout read failed");
                break;
            }
        };
        if raw.len() < MAX_OUTPUT_BYTES {
            let take = n.min(MAX_OUTPUT_BYTES - raw.len());
            raw.extend_from_slice(&chunk[..take]);
        }
        for event in parser.push(&chunk[..n]) {
            callbacks.event(event);
        }
    }
    for event in parser.finish() {
        callbacks.event(event);
    }
    (raw, parser)
}

/// Spawn an agent CLI and stream its output through a parser.
///
/// The prompt goes to the child via stdin. Stdout and stderr are read by
/// two concurrent tasks, joined after the process exits; a timeout kills
/// the child rather than hanging the run.
pub(crate) async fn run_streaming(
    program: &str,
    args: &[String],
    workspace_dir: &Path,
    prompt: &str,
    timeout_secs: u64,
    parser: Box<dyn StreamParser>,
    callbacks: &ExecCallbacks,
) -> Result<ExecutionResult, AdapterError> {
    let mut cmd = login_shell_command(program, args);
    cmd.current_dir(workspace_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program, ?args, "spawning agent process");
    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            AdapterError::CommandNotFound {
                command: program.to_string(),
            }
        } else {
            AdapterError::Io(err)
        }
    })?;

    if let Some(pid) = child.id() {
        callbacks.spawned(pid);
    }

    // Feed the prompt and close stdin so the CLI sees EOF.
    if let Some(mut stdin) = child.stdin.take() {
        let prompt = prompt.as_bytes().to_vec();
        tokio::spawn(async move {
            if let Err(err) = stdin.write_all(&prompt).await {
                warn!(error = %err, "failed to write prompt to agent stdin");
            }
            let _ = stdin.shutdown().await;
        });
    }

    let stdout_task = child
        .stdout
        .take()
        .map(|stdout| tokio::spawn(tee_stdout(stdout, parser, callbacks.clone())));
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(read_bounded(stderr, MAX_OUTPUT_BYTES)));

    let (was_timeout, exit_code) = if timeout_secs > 0 {
        match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
            Ok(status) => (false, status?.code().unwrap_or(-1)),
            Err(_) => {
                warn!(timeout_secs, "agent process timed out; killing");
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill timed-out process");
                }
                let _ = child.wait().await;
                (true, -1)
            }
        }
    } else {
        (false, child.wait().await?.code().unwrap_or(-1))
    };

    // Pipes close after exit or kill; collect what the reader tasks have.
    let (raw_stdout, parser) = match stdout_task {
        Some(task) => match timeout(IO_CAPTURE_TIMEOUT, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(error = %err, "stdout task panicked");
                return Err(AdapterError::Io(std::io::Error::other("stdout capture failed")));
            }
            Err(_) => {
                warn!("stdout capture timed out");
                return Err(AdapterError::Io(std::io::Error::other("stdout capture timed out")));
            }
        },
        None => return Err(AdapterError::Io(std::io::Error::other("stdout was not piped"))),
    };
    let stderr = match stderr_task {
        Some(task) => match timeout(IO_CAPTURE_TIMEOUT, task).await {
            Ok(Ok(Ok(buf))) => buf,
            _ => {
                warn!("stderr capture failed");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    if was_timeout {
        return Err(AdapterError::Timeout {
            seconds: timeout_secs,
        });
    }

    let mut parser = parser;
    let stdout = String::from_utf8_lossy(&raw_stdout).into_owned();
    let result_text = parser
        .result_text()
        .unwrap_or_else(|| stdout.trim().to_string());

    Ok(ExecutionResult {
        exit_code,
        result_text,
        turns: parser.take_turns(),
        stdout,
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Resolve the per-run timeout for a workspace.
pub(crate) fn timeout_secs(workspace: &WorkspaceConfig) -> u64 {
    workspace.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::stream::claude::ClaudeStreamParser;
    use tempfile::TempDir;

    #[test]
    fn shell_escape_wraps_and_escapes_quotes() {
        assert_eq!(shell_escape("plain"), "'plain'");
        assert_eq!(shell_escape("has space"), "'has space'");
        assert_eq!(shell_escape("it's"), r"'it'\''s'");
        // A classic injection attempt stays inert inside quotes.
        assert_eq!(shell_escape("; rm -rf /"), "'; rm -rf /'");
    }

    #[test]
    fn registry_resolves_known_agents() {
        let registry = AdapterRegistry::new();
        assert_eq!(registry.resolve("claude").unwrap().name(), "claude");
        assert_eq!(registry.resolve("codex").unwrap().name(), "codex");
        assert_eq!(registry.resolve("opencode").unwrap().name(), "opencode");
    }

    #[test]
    fn unknown_agent_error_lists_known_names() {
        let registry = AdapterRegistry::new();
        let err = registry.resolve("gemini").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("gemini"));
        assert!(msg.contains("claude"));
        assert!(msg.contains("codex"));
        assert!(msg.contains("opencode"));
    }

    #[tokio::test]
    async fn run_streaming_captures_stdout_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let result = run_streaming(
            "sh",
            &["-c".to_string(), "echo HEARTBEAT_OK".to_string()],
            dir.path(),
            "",
            30,
            Box::new(ClaudeStreamParser::new()),
            &ExecCallbacks::noop(),
        )
        .await
        .unwrap();

        assert_eq!(result.exit_code, 0);
        // No result envelope in plain echo output: raw stdout is the
        // fallback result text.
        assert_eq!(result.result_text, "HEARTBEAT_OK");
    }

    #[tokio::test]
    async fn run_streaming_reads_prompt_from_stdin() {
        let dir = TempDir::new().unwrap();
        let result = run_streaming(
            "cat",
            &[],
            dir.path(),
            "prompt body",
            30,
            Box::new(ClaudeStreamParser::new()),
            &ExecCallbacks::noop(),
        )
        .await
        .unwrap();
        assert_eq!(result.stdout, "prompt body");
    }

    #[tokio::test]
    async fn run_streaming_drains_stderr_without_deadlock() {
        let dir = TempDir::new().unwrap();
        // Write a large burst to stderr before stdout; with a synchronous
        // drain of stdout first this would deadlock on pipe back-pressure.
        let script = r#"i=0; while [ $i -lt 2000 ]; do echo "eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee" >&2; i=$((i+1)); done; echo done"#;
        let result = run_streaming(
            "sh",
            &["-c".to_string(), script.to_string()],
            dir.path(),
            "",
            30,
            Box::new(ClaudeStreamParser::new()),
            &ExecCallbacks::noop(),
        )
        .await
        .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("done"));
        assert!(result.stderr.len() > 60_000);
    }

    #[tokio::test]
    async fn run_streaming_times_out_and_kills() {
        let dir = TempDir::new().unwrap();
        let err = run_streaming(
            "sleep",
            &["5".to_string()],
            dir.path(),
            "",
            1,
            Box::new(ClaudeStreamParser::new()),
            &ExecCallbacks::noop(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AdapterError::Timeout { seconds: 1 }));
    }

    #[tokio::test]
    async fn run_streaming_surfaces_pid_before_completion() {
        let dir = TempDir::new().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in_cb = Arc::clone(&seen);
        let callbacks = ExecCallbacks::new(
            move |pid| {
                *seen_in_cb.lock().unwrap() = Some(pid);
            },
            |_| {},
        );

        run_streaming(
            "true",
            &[],
            dir.path(),
            "",
            30,
            Box::new(ClaudeStreamParser::new()),
            &callbacks,
        )
        .await
        .unwrap();

        assert!(seen.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn run_streaming_missing_command_maps_to_not_found() {
        // Bypass the login shell (which would report exit 127 instead of a
        // spawn error) by clearing SHELL for the raw /bin/sh path; spawn of
        // the shell itself still succeeds, so probe the raw error mapping
        // directly with a program that cannot exist.
        let dir = TempDir::new().unwrap();
        let err = run_streaming(
            "definitely-not-a-real-binary-xyz",
            &[],
            dir.path(),
            "",
            5,
            Box::new(ClaudeStreamParser::new()),
            &ExecCallbacks::noop(),
        )
        .await;
        // Under a login shell this surfaces as exit 127 rather than a
        // spawn failure; both are acceptable "not found" signals.
        match err {
            Err(AdapterError::CommandNotFound { .. }) => {}
            Ok(result) => assert_eq!(result.exit_code, 127),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
