//! Heartbeat discovery: expand one workspace config into its schedulable
//! heartbeats.
//!
//! A workspace always carries its root `HEARTBEAT.md`; a `heartbeats/`
//! directory adds one named heartbeat per subdirectory that contains its
//! own `HEARTBEAT.md`. Expansion is a pure function of directory contents
//! and each heartbeat resolves its `lastRun` independently.

use crate::config::WorkspaceConfig;
use crate::types::{Heartbeat, ROOT_HEARTBEAT_FILE};
use tracing::warn;

/// Directory holding named heartbeats under a workspace root.
pub const HEARTBEATS_DIR: &str = "heartbeats";

/// Enumerate the heartbeats of one workspace.
///
/// An unreadable `heartbeats/` directory degrades to the root heartbeat
/// alone with a warning; discovery never aborts.
pub fn discover(workspace: &WorkspaceConfig) -> Vec<Heartbeat> {
    let mut found = vec![Heartbeat {
        workspace: workspace.path.clone(),
        file: ROOT_HEARTBEAT_FILE.to_string(),
        last_run: workspace.last_run_for(ROOT_HEARTBEAT_FILE),
    }];

    let dir = workspace.path.join(HEARTBEATS_DIR);
    if !dir.is_dir() {
        return found;
    }

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "cannot read heartbeats directory");
            return found;
        }
    };

    let mut named = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let file = format!("{HEARTBEATS_DIR}/{name}/{ROOT_HEARTBEAT_FILE}");
        if !workspace.path.join(&file).is_file() {
            continue;
        }
        named.push(Heartbeat {
            workspace: workspace.path.clone(),
            file: file.clone(),
            last_run: workspace.last_run_for(&file),
        });
    }

    // Stable order so ticks and status listings don't shuffle.
    named.sort_by(|a, b| a.file.cmp(&b.file));
    found.extend(named);
    found
}
