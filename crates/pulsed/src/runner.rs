//! Per-run orchestration.
//!
//! One run walks a strict sequence: build-prompt, resolve-adapter,
//! check-availability, execute, classify, persist. Any failure before
//! execute short-circuits to an `error` log entry with no process spawned.
//! Once a PID is known an ActiveBeat is registered, and it is released on
//! every exit path — that guarantee is what crash recovery stands on.

use crate::adapter::{AdapterRegistry, ExecCallbacks, ExecutionResult};
use crate::bus::EventBus;
use crate::store::Store;
use chrono::Utc;
use pulse_core::config::WorkspaceConfig;
use pulse_core::events::DaemonEvent;
use pulse_core::outcome::{classify, excerpt, Outcome};
use pulse_core::prompt::build_heartbeat_prompt;
use pulse_core::stream::StreamEvent;
use pulse_core::types::{ActiveBeat, Heartbeat, LogEntry};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Maximum characters kept in summary/error excerpts.
const EXCERPT_CHARS: usize = 200;

#[derive(Debug)]
pub struct Runner {
    store: Arc<Store>,
    bus: Arc<EventBus>,
    registry: Arc<AdapterRegistry>,
}

impl Runner {
    pub fn new(store: Arc<Store>, bus: Arc<EventBus>, registry: Arc<AdapterRegistry>) -> Self {
        Self {
            store,
            bus,
            registry,
        }
    }

    /// Run one heartbeat to completion and return its log entry. Never
    /// panics or propagates: every failure becomes an `error` entry.
    pub async fn run(&self, workspace: &WorkspaceConfig, heartbeat: &Heartbeat) -> LogEntry {
        let identity = heartbeat.identity();
        info!(heartbeat = %identity, agent = %workspace.agent, "heartbeat run starting");
        self.bus.emit(&DaemonEvent::HeartbeatStart {
            heartbeat: identity.clone(),
            name: heartbeat.display_name(),
            agent: workspace.agent.to_string(),
        });
        self.store.debug(&format!("run start {identity}"));

        let entry = self.execute(workspace, heartbeat, &identity).await;

        if let Err(err) = self.store.append_log(&entry) {
            error!(heartbeat = %identity, error = %err, "failed to append log entry");
        }
        self.bus.emit(&DaemonEvent::HeartbeatDone {
            heartbeat: identity.clone(),
            outcome: entry.outcome,
            duration_ms: entry.duration_ms,
            summary: entry.summary.clone().or_else(|| entry.error.clone()),
        });
        info!(
            heartbeat = %identity,
            outcome = %entry.outcome,
            duration_ms = entry.duration_ms,
            "heartbeat run finished"
        );
        self.store
            .debug(&format!("run done {identity} outcome={}", entry.outcome));
        entry
    }

    async fn execute(
        &self,
        workspace: &WorkspaceConfig,
        heartbeat: &Heartbeat,
        identity: &str,
    ) -> LogEntry {
        let started = Instant::now();

        // Everything up to execute() short-circuits without a spawn.
        let prompt = match build_heartbeat_prompt(&heartbeat.path()) {
            Ok(prompt) => prompt,
            Err(err) => {
                return error_entry(
                    identity,
                    started,
                    &format!("heartbeat file {} unreadable: {err}", heartbeat.path().display()),
                );
            }
        };

        let adapter = match self.registry.resolve(workspace.agent.as_str()) {
            Ok(adapter) => adapter,
            Err(err) => return error_entry(identity, started, &err.to_string()),
        };

        if let Err(err) = adapter.validate(workspace) {
            return error_entry(identity, started, &err.to_string());
        }

        if !adapter.is_available().await {
            return error_entry(
                identity,
                started,
                &format!("agent CLI '{}' not found on PATH", adapter.command()),
            );
        }

        let callbacks = self.callbacks(workspace, identity);
        let result = adapter.execute(&prompt, workspace, callbacks).await;

        // Release the crash-recovery record on every exit path. Harmless
        // when the spawn itself failed and nothing was registered.
        if let Err(err) = self.store.remove_active_beat(identity) {
            warn!(heartbeat = identity, error = %err, "failed to clear active beat");
        }

        match result {
            Ok(execution) => self.classified_entry(heartbeat, identity, started, execution),
            Err(err) => error_entry(identity, started, &err.to_string()),
        }
    }

    /// Wire execution callbacks: the PID registers the ActiveBeat, stream
    /// events are re-emitted on the bus.
    fn callbacks(&self, workspace: &WorkspaceConfig, identity: &str) -> ExecCallbacks {
        let store = Arc::clone(&self.store);
        let bus = Arc::clone(&self.bus);
        let spawn_identity = identity.to_string();
        let event_identity = identity.to_string();
        let workspace_path = workspace.path.display().to_string();

        ExecCallbacks::new(
            move |pid| {
                let beat = ActiveBeat {
                    pid,
                    started_at: Utc::now(),
                    workspace: workspace_path.clone(),
                };
                if let Err(err) = store.add_active_beat(&spawn_identity, beat) {
                    warn!(heartbeat = %spawn_identity, error = %err, "failed to record active beat");
                }
            },
            move |event| match event {
                StreamEvent::Text(text) => bus.emit(&DaemonEvent::HeartbeatStdout {
                    heartbeat: event_identity.clone(),
                    text,
                }),
                StreamEvent::ToolCall { name, input } => {
                    bus.emit(&DaemonEvent::HeartbeatToolCall {
                        heartbeat: event_identity.clone(),
                        tool: name,
                        input,
                    });
                }
            },
        )
    }

    fn classified_entry(
        &self,
        heartbeat: &Heartbeat,
        identity: &str,
        started: Instant,
        execution: ExecutionResult,
    ) -> LogEntry {
        let outcome = classify(&execution.result_text, execution.exit_code);
        let mut entry = LogEntry::new(identity, outcome, started.elapsed().as_millis() as u64);

        match outcome {
            Outcome::Ok => {}
            Outcome::Attention => {
                entry.summary = Some(excerpt(&execution.result_text, EXCERPT_CHARS));
            }
            _ => {
                let detail = if execution.stderr.trim().is_empty() {
                    &execution.result_text
                } else {
                    &execution.stderr
                };
                entry.error = Some(excerpt(
                    &format!("exit code {}: {detail}", execution.exit_code),
                    EXCERPT_CHARS,
                ));
            }
        }

        if !execution.turns.is_empty() {
            if let Err(err) = self
                .store
                .write_last_conversation(&heartbeat.slug(), &execution.turns)
            {
                warn!(heartbeat = identity, error = %err, "failed to write last conversation");
            }
            entry.turns = Some(execution.turns);
        }
        entry
    }
}

fn error_entry(identity: &str, started: Instant, message: &str) -> LogEntry {
    let mut entry = LogEntry::new(
        identity,
        Outcome::Error,
        started.elapsed().as_millis() as u64,
    );
    entry.error = Some(excerpt(message, EXCERPT_CHARS));
    entry
}
