//! Crash recovery: reconcile the previous daemon's in-flight work.
//!
//! Runs once, synchronously, before the tick loop starts. Dead entries in
//! the active-beats map become `lost` log entries; live entries are left
//! untouched (not adopted, monitored, or killed). Afterwards the file is
//! deleted entirely — this is an all-or-nothing reconciliation pass, not
//! an ongoing ledger edit.

use crate::store::Store;
use chrono::Utc;
use pulse_core::outcome::Outcome;
use pulse_core::types::LogEntry;
use tracing::{error, info, warn};

/// Zero-signal liveness probe. Alive-but-unauthorized (EPERM) counts as
/// alive; "no such process" counts as dead.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 performs only a permission/liveness
    // check; no signal is delivered.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Without a probe on this platform, assume alive rather than fabricate a
/// loss report.
#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    true
}

/// Reconcile the active-beats file. Returns the number of runs reported
/// lost.
pub fn recover(store: &Store) -> usize {
    let beats = store.load_active_beats();
    if beats.is_empty() {
        info!("crash recovery: nothing to recover");
        // A stale empty file still gets removed.
        if let Err(err) = store.clear_active_beats() {
            warn!(error = %err, "failed to remove active-beats file");
        }
        return 0;
    }

    let mut lost = 0;
    for (identity, beat) in beats {
        if pid_alive(beat.pid) {
            warn!(
                heartbeat = %identity,
                pid = beat.pid,
                "active beat's process is still alive; leaving it untouched"
            );
            continue;
        }

        let duration_ms = (Utc::now() - beat.started_at).num_milliseconds().max(0) as u64;
        let mut entry = LogEntry::new(&identity, Outcome::Lost, duration_ms);
        entry.summary = Some(format!(
            "agent process {} crashed or was killed before completing",
            beat.pid
        ));
        info!(heartbeat = %identity, pid = beat.pid, "recovering lost heartbeat run");
        if let Err(err) = store.append_log(&entry) {
            error!(heartbeat = %identity, error = %err, "failed to log lost run");
        }
        lost += 1;
    }

    if let Err(err) = store.clear_active_beats() {
        warn!(error = %err, "failed to remove active-beats file");
    }
    lost
}
