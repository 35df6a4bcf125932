//! Output rendering for the pulsectl CLI.
//!
//! Thin formatting only: one line per event for `watch`, a small table
//! for `status`.

use chrono::{DateTime, Local, Utc};
use pulse_core::events::{DaemonEvent, TickStatus};

/// One human-readable line per event; `None` for events that would be
/// noise in a terminal tail (per-heartbeat stdout is kept, ticks are
/// summarized).
pub fn format_event(event: &DaemonEvent) -> String {
    match event {
        DaemonEvent::Tick { heartbeats, .. } => {
            let due = heartbeats.iter().filter(|h| h.due).count();
            format!("tick: {} heartbeat(s), {due} due", heartbeats.len())
        }
        DaemonEvent::HeartbeatStart { name, agent, .. } => {
            format!("[{name}] starting ({agent})")
        }
        DaemonEvent::HeartbeatStdout { heartbeat, text } => {
            format!("[{}] {text}", short_name(heartbeat))
        }
        DaemonEvent::HeartbeatToolCall { heartbeat, tool, .. } => {
            format!("[{}] tool: {tool}", short_name(heartbeat))
        }
        DaemonEvent::HeartbeatDone {
            heartbeat,
            outcome,
            duration_ms,
            summary,
        } => {
            let mut line = format!(
                "[{}] done: {outcome} ({:.1}s)",
                short_name(heartbeat),
                *duration_ms as f64 / 1000.0
            );
            if let Some(summary) = summary {
                line.push_str(" - ");
                line.push_str(summary);
            }
            line
        }
        DaemonEvent::DaemonReady { pid } => format!("daemon ready (PID {pid})"),
        DaemonEvent::DaemonShutdown => "daemon shut down".to_string(),
    }
}

/// Print one status row per heartbeat.
pub fn print_status(statuses: &[TickStatus]) {
    if statuses.is_empty() {
        println!("No heartbeats configured.");
        return;
    }

    println!(
        "{:<24}  {:<20}  {:<20}  {:<10}  {:<20}",
        "NAME", "SCHEDULE", "LAST RUN", "OUTCOME", "NEXT RUN"
    );
    println!("{}", "-".repeat(100));
    for status in statuses {
        println!(
            "{:<24}  {:<20}  {:<20}  {:<10}  {:<20}",
            truncate(&status.name, 24),
            truncate(&status.schedule, 20),
            format_time(status.last_run),
            status
                .last_outcome
                .map_or_else(|| "-".to_string(), |o| o.to_string()),
            format_time(status.next_run),
        );
    }
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "never".to_string(),
    }
}

/// Last path component of a heartbeat identity, enough to tell runs apart
/// in a tail.
fn short_name(identity: &str) -> &str {
    identity
        .rsplit(['/', ':'])
        .find(|part| !part.is_empty())
        .unwrap_or(identity)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::outcome::Outcome;

    #[test]
    fn done_event_includes_outcome_and_summary() {
        let line = format_event(&DaemonEvent::HeartbeatDone {
            heartbeat: "/home/user/demo".to_string(),
            outcome: Outcome::Attention,
            duration_ms: 2500,
            summary: Some("tests failing".to_string()),
        });
        assert!(line.contains("demo"));
        assert!(line.contains("attention"));
        assert!(line.contains("2.5s"));
        assert!(line.contains("tests failing"));
    }

    #[test]
    fn tick_event_summarizes_due_count() {
        let line = format_event(&DaemonEvent::Tick {
            at: Utc::now(),
            heartbeats: vec![],
        });
        assert!(line.contains("0 due"));
    }

    #[test]
    fn short_name_takes_last_component() {
        assert_eq!(short_name("/home/user/demo"), "demo");
        assert_eq!(
            short_name("/home/user/demo::heartbeats/docs/HEARTBEAT.md"),
            "HEARTBEAT.md"
        );
    }
}
