//! Core types: heartbeat identity and the persisted records keyed by it.

use crate::conversation::ConversationTurn;
use crate::outcome::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the default heartbeat at a workspace root.
pub const ROOT_HEARTBEAT_FILE: &str = "HEARTBEAT.md";

/// Sentinel an agent prints when the heartbeat found nothing needing review.
pub const OK_SENTINEL: &str = "HEARTBEAT_OK";

/// One schedulable heartbeat, produced by discovery.
///
/// Identity is the `(workspace, file)` pair. For the root heartbeat the
/// identity collapses to the workspace path alone so records written by
/// older single-heartbeat versions keep joining against the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    /// Absolute path of the workspace directory.
    pub workspace: PathBuf,
    /// Heartbeat file path relative to the workspace
    /// (`HEARTBEAT.md` or `heartbeats/<name>/HEARTBEAT.md`).
    pub file: String,
    /// When this heartbeat last ran, resolved independently per heartbeat.
    pub last_run: Option<DateTime<Utc>>,
}

impl Heartbeat {
    pub fn is_root(&self) -> bool {
        self.file == ROOT_HEARTBEAT_FILE
    }

    /// Stable identity used as the join key across scheduling state,
    /// active-beat records, and log entries.
    pub fn identity(&self) -> String {
        if self.is_root() {
            self.workspace.display().to_string()
        } else {
            format!("{}::{}", self.workspace.display(), self.file)
        }
    }

    /// Human-facing name: the workspace directory name, suffixed with the
    /// heartbeat's subdirectory name for named heartbeats.
    pub fn display_name(&self) -> String {
        let base = self
            .workspace
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.workspace.display().to_string());
        match self.subdir_name() {
            Some(name) => format!("{base}#{name}"),
            None => base,
        }
    }

    /// Slug for per-heartbeat files: display name with every
    /// non-alphanumeric character replaced by `-`.
    pub fn slug(&self) -> String {
        self.display_name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect()
    }

    /// Absolute path of the heartbeat file.
    pub fn path(&self) -> PathBuf {
        self.workspace.join(&self.file)
    }

    /// The `<name>` component for `heartbeats/<name>/HEARTBEAT.md`, if any.
    fn subdir_name(&self) -> Option<&str> {
        let rest = self.file.strip_prefix("heartbeats/")?;
        rest.split('/').next()
    }
}

/// Record of one in-flight agent subprocess, persisted so a restarted
/// daemon can tell what the previous process left behind.
///
/// Invariant: an identity appears in `active-beats.json` iff its subprocess
/// has been spawned and not yet completed or reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBeat {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub workspace: String,
}

/// One line of `heartbeats.jsonl`: the durable history of completed (or
/// recovered-as-lost) runs. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    /// Heartbeat identity (see [`Heartbeat::identity`]).
    pub heartbeat: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turns: Option<Vec<ConversationTurn>>,
}

impl LogEntry {
    pub fn new(heartbeat: impl Into<String>, outcome: Outcome, duration_ms: u64) -> Self {
        Self {
            at: Utc::now(),
            heartbeat: heartbeat.into(),
            outcome,
            duration_ms,
            summary: None,
            error: None,
            turns: None,
        }
    }
}

/// Build a heartbeat value for a workspace path without going through
/// discovery. Used by one-shot invocations and tests.
pub fn root_heartbeat(workspace: &Path, last_run: Option<DateTime<Utc>>) -> Heartbeat {
    Heartbeat {
        workspace: workspace.to_path_buf(),
        file: ROOT_HEARTBEAT_FILE.to_string(),
        last_run,
    }
}
