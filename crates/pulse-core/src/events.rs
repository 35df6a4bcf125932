//! The daemon event vocabulary.
//!
//! These events are the only values exchanged between the daemon core,
//! in-process subscribers, and remote socket clients; a UI built on either
//! transport sees the same stream. Events are immutable and the bus keeps
//! no history.

use crate::outcome::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-heartbeat status embedded in a `tick` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickStatus {
    /// Heartbeat identity.
    pub heartbeat: String,
    /// Display name.
    pub name: String,
    /// Human schedule description, e.g. `every 30m`.
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<Outcome>,
    pub due: bool,
}

/// A daemon event, serialized as NDJSON over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DaemonEvent {
    #[serde(rename = "tick")]
    #[serde(rename_all = "camelCase")]
    Tick {
        at: DateTime<Utc>,
        heartbeats: Vec<TickStatus>,
    },
    #[serde(rename = "heartbeat:start")]
    #[serde(rename_all = "camelCase")]
    HeartbeatStart {
        heartbeat: String,
        name: String,
        agent: String,
    },
    #[serde(rename = "heartbeat:stdout")]
    #[serde(rename_all = "camelCase")]
    HeartbeatStdout { heartbeat: String, text: String },
    #[serde(rename = "heartbeat:tool-call")]
    #[serde(rename_all = "camelCase")]
    HeartbeatToolCall {
        heartbeat: String,
        tool: String,
        input: Value,
    },
    #[serde(rename = "heartbeat:done")]
    #[serde(rename_all = "camelCase")]
    HeartbeatDone {
        heartbeat: String,
        outcome: Outcome,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    #[serde(rename = "daemon:ready")]
    #[serde(rename_all = "camelCase")]
    DaemonReady { pid: u32 },
    #[serde(rename = "daemon:shutdown")]
    DaemonShutdown,
}

impl DaemonEvent {
    /// The wire tag, for logging and rendering.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tick { .. } => "tick",
            Self::HeartbeatStart { .. } => "heartbeat:start",
            Self::HeartbeatStdout { .. } => "heartbeat:stdout",
            Self::HeartbeatToolCall { .. } => "heartbeat:tool-call",
            Self::HeartbeatDone { .. } => "heartbeat:done",
            Self::DaemonReady { .. } => "daemon:ready",
            Self::DaemonShutdown => "daemon:shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_wire_tags() {
        let event = DaemonEvent::HeartbeatToolCall {
            heartbeat: "/tmp/demo".to_string(),
            tool: "Bash".to_string(),
            input: json!({"command": "ls"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"heartbeat:tool-call\""));

        let ready = serde_json::to_string(&DaemonEvent::DaemonReady { pid: 99 }).unwrap();
        assert!(ready.contains("\"type\":\"daemon:ready\""));

        let shutdown = serde_json::to_string(&DaemonEvent::DaemonShutdown).unwrap();
        assert_eq!(shutdown, r#"{"type":"daemon:shutdown"}"#);
    }

    #[test]
    fn events_round_trip() {
        let event = DaemonEvent::HeartbeatDone {
            heartbeat: "/tmp/demo".to_string(),
            outcome: Outcome::Attention,
            duration_ms: 5200,
            summary: Some("two tests failing".to_string()),
        };
        let back: DaemonEvent =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn kind_matches_wire_tag() {
        for (event, tag) in [
            (DaemonEvent::DaemonShutdown, "daemon:shutdown"),
            (DaemonEvent::DaemonReady { pid: 1 }, "daemon:ready"),
        ] {
            assert_eq!(event.kind(), tag);
            assert!(serde_json::to_string(&event)
                .unwrap()
                .contains(&format!("\"{tag}\"")));
        }
    }
}
