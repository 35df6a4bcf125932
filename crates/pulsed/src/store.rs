//! Data directory and on-disk persistence.
//!
//! Everything the daemon remembers lives in one directory: the workspace
//! config, the append-only run log, the active-beats map, per-heartbeat
//! last-conversation files, and the pid/socket files. Mutations go through
//! atomic write-then-rename; that rename is the only guard against a
//! concurrent writer, so racing writers are last-write-wins.

use chrono::Utc;
use pulse_core::config::{atomic_write, BeatsConfig, ConfigError};
use pulse_core::conversation::ConversationTurn;
use pulse_core::outcome::Outcome;
use pulse_core::types::{ActiveBeat, LogEntry};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const CONFIG_FILE: &str = "config.json";
const LOG_FILE: &str = "heartbeats.jsonl";
const ACTIVE_BEATS_FILE: &str = "active-beats.json";
const DEBUG_LOG_FILE: &str = "debug.log";
const SOCKET_FILE: &str = "pulsed.sock";
const PID_FILE: &str = "pulsed.pid";

/// Default data directory: `$XDG_DATA_HOME/pulsed`, falling back to
/// `~/.local/share/pulsed`.
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::data_local_dir())
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("pulsed")
}

/// Handle on the data directory. Cheap to clone paths from; all I/O is
/// synchronous and small.
#[derive(Debug)]
pub struct Store {
    dir: PathBuf,
    debug_log: bool,
}

impl Store {
    /// Open (creating if needed) the data directory.
    pub fn open(dir: impl Into<PathBuf>, debug_log: bool) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, debug_log })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.join(SOCKET_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.join(PID_FILE)
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn active_beats_path(&self) -> PathBuf {
        self.dir.join(ACTIVE_BEATS_FILE)
    }

    fn last_beat_path(&self, slug: &str) -> PathBuf {
        self.dir.join(format!("last-beat-{slug}.json"))
    }

    // --- config ---

    pub fn load_config(&self) -> Result<BeatsConfig, ConfigError> {
        BeatsConfig::load(&self.config_path())
    }

    pub fn save_config(&self, config: &BeatsConfig) -> Result<(), ConfigError> {
        config.save(&self.config_path())
    }

    // --- run log ---

    /// Append one entry to `heartbeats.jsonl`.
    pub fn append_log(&self, entry: &LogEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        file.write_all(line.as_bytes())
    }

    /// Read all log entries, oldest first. Malformed lines are skipped with
    /// a warning so one bad line never hides the rest of the history.
    pub fn read_log(&self) -> Vec<LogEntry> {
        let content = match std::fs::read_to_string(self.log_path()) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(error = %err, "skipping malformed log line");
                    None
                }
            })
            .collect()
    }

    /// Most recent outcome and time per heartbeat identity.
    pub fn last_outcomes(&self) -> HashMap<String, (Outcome, chrono::DateTime<Utc>)> {
        let mut map = HashMap::new();
        for entry in self.read_log() {
            map.insert(entry.heartbeat.clone(), (entry.outcome, entry.at));
        }
        map
    }

    // --- active beats ---

    /// The active-beats map; an absent file means no in-flight work.
    pub fn load_active_beats(&self) -> HashMap<String, ActiveBeat> {
        let content = match std::fs::read_to_string(self.active_beats_path()) {
            Ok(content) => content,
            Err(_) => return HashMap::new(),
        };
        match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(err) => {
                warn!(error = %err, "active-beats file is corrupt; treating as empty");
                HashMap::new()
            }
        }
    }

    pub fn add_active_beat(&self, identity: &str, beat: ActiveBeat) -> std::io::Result<()> {
        let mut map = self.load_active_beats();
        map.insert(identity.to_string(), beat);
        self.write_active_beats(&map)
    }

    pub fn remove_active_beat(&self, identity: &str) -> std::io::Result<()> {
        let mut map = self.load_active_beats();
        if map.remove(identity).is_none() {
            return Ok(());
        }
        if map.is_empty() {
            self.clear_active_beats()
        } else {
            self.write_active_beats(&map)
        }
    }

    /// Delete the active-beats file entirely (recovery's all-or-nothing
    /// reconciliation).
    pub fn clear_active_beats(&self) -> std::io::Result<()> {
        match std::fs::remove_file(self.active_beats_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn has_active_beats_file(&self) -> bool {
        self.active_beats_path().exists()
    }

    fn write_active_beats(&self, map: &HashMap<String, ActiveBeat>) -> std::io::Result<()> {
        let bytes = serde_json::to_vec_pretty(map)?;
        atomic_write(&self.active_beats_path(), &bytes)
    }

    // --- last conversation ---

    /// Write the full turn list of a heartbeat's most recent run.
    pub fn write_last_conversation(
        &self,
        slug: &str,
        turns: &[ConversationTurn],
    ) -> std::io::Result<()> {
        let bytes = serde_json::to_vec_pretty(turns)?;
        atomic_write(&self.last_beat_path(slug), &bytes)
    }

    pub fn read_last_conversation(&self, slug: &str) -> Option<Vec<ConversationTurn>> {
        let content = std::fs::read_to_string(self.last_beat_path(slug)).ok()?;
        serde_json::from_str(&content).ok()
    }

    // --- pid file ---

    pub fn write_pid_file(&self) -> std::io::Result<()> {
        std::fs::write(self.pid_path(), format!("{}\n", std::process::id()))
    }

    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(self.pid_path())
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn remove_pid_file(&self) {
        let _ = std::fs::remove_file(self.pid_path());
    }

    // --- debug log ---

    /// Append one timestamped line to `debug.log`, when enabled.
    pub fn debug(&self, message: &str) {
        if !self.debug_log {
            return;
        }
        let line = format!("{} {message}\n", Utc::now().to_rfc3339());
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(DEBUG_LOG_FILE))
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(err) = result {
            warn!(error = %err, "failed to append debug log");
        }
    }
}
