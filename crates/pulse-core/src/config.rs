//! Workspace configuration: the on-disk `config.json` model.
//!
//! Validation happens at load time; the scheduler and adapters can assume
//! a validated config. The file is rewritten atomically on every mutation,
//! which is the only protection against concurrent writers (a one-shot
//! `pulsectl beat` racing the daemon is last-write-wins).

use crate::schedule::{self, ScheduleError};
use crate::types::ROOT_HEARTBEAT_FILE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("workspace {workspace}: interval and cron are mutually exclusive")]
    ConflictingSchedule { workspace: String },
    #[error("workspace {workspace}: neither interval nor cron is set")]
    MissingSchedule { workspace: String },
    #[error("workspace {workspace}: timezone requires a cron schedule")]
    TimezoneWithoutCron { workspace: String },
    #[error("workspace {workspace}: invalid permissions value '{value}' (expected \"skip\" or {{deny: [...]}})")]
    InvalidPermissions { workspace: String, value: String },
}

/// Which agent CLI drives a workspace's heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Claude,
    Codex,
    Opencode,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Opencode => "opencode",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codex sandbox policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

impl SandboxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::WorkspaceWrite => "workspace-write",
            Self::DangerFullAccess => "danger-full-access",
        }
    }
}

/// Permission setting for a workspace: the literal string `"skip"` disables
/// the built-in deny-list, an object with `deny` rules extends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionSetting {
    Preset(String),
    Custom { deny: Vec<String> },
}

impl PermissionSetting {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Preset(s) if s == "skip")
    }

    pub fn deny_rules(&self) -> &[String] {
        match self {
            Self::Custom { deny } => deny,
            Self::Preset(_) => &[],
        }
    }
}

/// One registered workspace. May expand into several heartbeats when a
/// `heartbeats/` directory exists (see [`crate::discover`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    pub path: PathBuf,

    // Schedule: exactly one of interval/cron, validated at load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Last run of the root heartbeat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    /// Last runs keyed by heartbeat file, for multi-heartbeat workspaces.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub last_runs: BTreeMap<String, DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    /// Per-run timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub agent: AgentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionSetting>,
}

impl WorkspaceConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interval: None,
            cron: None,
            timezone: None,
            last_run: None,
            last_runs: BTreeMap::new(),
            max_turns: None,
            timeout: None,
            agent: AgentKind::default(),
            model: None,
            session: None,
            sandbox: None,
            network: None,
            permissions: None,
        }
    }

    /// Resolve the last run of one heartbeat file. The root heartbeat reads
    /// the flat field, named heartbeats read the map; a heartbeat never
    /// inherits another heartbeat's timestamp.
    pub fn last_run_for(&self, heartbeat_file: &str) -> Option<DateTime<Utc>> {
        if heartbeat_file == ROOT_HEARTBEAT_FILE {
            self.last_run
        } else {
            self.last_runs.get(heartbeat_file).copied()
        }
    }

    /// Record a run of one heartbeat file.
    pub fn set_last_run(&mut self, heartbeat_file: &str, at: DateTime<Utc>) {
        if heartbeat_file == ROOT_HEARTBEAT_FILE {
            self.last_run = Some(at);
        } else {
            self.last_runs.insert(heartbeat_file.to_string(), at);
        }
    }

    /// Validate schedule and permission fields, reporting the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let workspace = self.path.display().to_string();

        match (&self.interval, &self.cron) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::ConflictingSchedule { workspace });
            }
            (None, None) => {
                return Err(ConfigError::MissingSchedule { workspace });
            }
            (Some(interval), None) => {
                schedule::parse_interval(interval)?;
            }
            (None, Some(cron)) => {
                schedule::parse_cron(cron)?;
            }
        }

        if self.timezone.is_some() && self.cron.is_none() {
            return Err(ConfigError::TimezoneWithoutCron { workspace });
        }
        if let Some(tz) = &self.timezone {
            schedule::parse_timezone(tz)?;
        }

        if let Some(PermissionSetting::Preset(preset)) = &self.permissions {
            if preset != "skip" {
                return Err(ConfigError::InvalidPermissions {
                    workspace,
                    value: preset.clone(),
                });
            }
        }

        Ok(())
    }
}

/// The whole `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatsConfig {
    #[serde(default)]
    pub workspaces: Vec<WorkspaceConfig>,
}

impl BeatsConfig {
    /// Load and validate. Validation failures name the offending workspace.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        for workspace in &config.workspaces {
            workspace.validate()?;
        }
        Ok(config)
    }

    /// Rewrite the config file atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        atomic_write(path, &bytes)?;
        Ok(())
    }
}

/// Write a file atomically: write a temp sibling, then rename over the
/// target. Readers observe either the old or the new content, never a
/// partial write.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = match path.extension() {
        Some(ext) => {
            let mut ext = ext.to_os_string();
            ext.push(".tmp");
            path.with_extension(ext)
        }
        None => path.with_extension("tmp"),
    };
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn interval_workspace(interval: &str) -> WorkspaceConfig {
        let mut ws = WorkspaceConfig::new("/tmp/demo");
        ws.interval = Some(interval.to_string());
        ws
    }

    #[test]
    fn valid_interval_workspace_passes() {
        assert!(interval_workspace("30m").validate().is_ok());
    }

    #[test]
    fn both_interval_and_cron_rejected() {
        let mut ws = interval_workspace("30m");
        ws.cron = Some("0 9 * * 1-5".to_string());
        assert!(matches!(
            ws.validate(),
            Err(ConfigError::ConflictingSchedule { .. })
        ));
    }

    #[test]
    fn neither_interval_nor_cron_rejected() {
        let ws = WorkspaceConfig::new("/tmp/demo");
        assert!(matches!(
            ws.validate(),
            Err(ConfigError::MissingSchedule { .. })
        ));
    }

    #[test]
    fn unparseable_interval_rejected() {
        assert!(interval_workspace("soon").validate().is_err());
    }

    #[test]
    fn unparseable_cron_rejected() {
        let mut ws = WorkspaceConfig::new("/tmp/demo");
        ws.cron = Some("not a cron".to_string());
        assert!(ws.validate().is_err());
    }

    #[test]
    fn timezone_without_cron_rejected() {
        let mut ws = interval_workspace("1h");
        ws.timezone = Some("Europe/Berlin".to_string());
        assert!(matches!(
            ws.validate(),
            Err(ConfigError::TimezoneWithoutCron { .. })
        ));
    }

    #[test]
    fn cron_with_timezone_passes() {
        let mut ws = WorkspaceConfig::new("/tmp/demo");
        ws.cron = Some("0 9 * * 1-5".to_string());
        ws.timezone = Some("Europe/Berlin".to_string());
        assert!(ws.validate().is_ok());
    }

    #[test]
    fn permissions_skip_accepted_other_presets_rejected() {
        let mut ws = interval_workspace("1h");
        ws.permissions = Some(PermissionSetting::Preset("skip".to_string()));
        assert!(ws.validate().is_ok());

        ws.permissions = Some(PermissionSetting::Preset("yolo".to_string()));
        assert!(matches!(
            ws.validate(),
            Err(ConfigError::InvalidPermissions { .. })
        ));
    }

    #[test]
    fn permissions_deserialize_both_shapes() {
        let skip: PermissionSetting = serde_json::from_str("\"skip\"").unwrap();
        assert!(skip.is_skip());

        let custom: PermissionSetting =
            serde_json::from_str(r#"{"deny": ["Bash(curl *)"]}"#).unwrap();
        assert_eq!(custom.deny_rules(), ["Bash(curl *)".to_string()]);
        assert!(!custom.is_skip());
    }

    #[test]
    fn last_run_resolution_is_per_heartbeat() {
        let mut ws = interval_workspace("1h");
        let root_at = Utc::now();
        ws.set_last_run(ROOT_HEARTBEAT_FILE, root_at);
        ws.set_last_run("heartbeats/docs/HEARTBEAT.md", root_at);

        assert_eq!(ws.last_run_for(ROOT_HEARTBEAT_FILE), Some(root_at));
        assert_eq!(
            ws.last_run_for("heartbeats/docs/HEARTBEAT.md"),
            Some(root_at)
        );
        // A heartbeat that never ran resolves to None, not a sibling's time.
        assert_eq!(ws.last_run_for("heartbeats/ci/HEARTBEAT.md"), None);
    }

    #[test]
    fn config_round_trips_camel_case_keys() {
        let mut ws = interval_workspace("5m");
        ws.max_turns = Some(10);
        ws.set_last_run(ROOT_HEARTBEAT_FILE, Utc::now());
        let config = BeatsConfig {
            workspaces: vec![ws],
        };

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"lastRun\""));
        assert!(json.contains("\"maxTurns\""));

        let back: BeatsConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let config = BeatsConfig {
            workspaces: vec![interval_workspace("1h")],
        };
        config.save(&path).unwrap();

        let loaded = BeatsConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        // No temp file left behind.
        assert!(!dir.path().join("config.json.tmp").exists());
    }

    #[test]
    fn load_rejects_invalid_workspace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"workspaces": [{"path": "/tmp/demo", "interval": "1x"}]}"#,
        )
        .unwrap();
        assert!(BeatsConfig::load(&path).is_err());
    }
}
