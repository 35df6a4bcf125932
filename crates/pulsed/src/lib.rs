//! pulsed - heartbeat orchestrator daemon.
//!
//! One long-lived tick loop drives everything: re-read config, emit a
//! `tick` describing every discovered heartbeat, run the due ones
//! sequentially, persist `lastRun` after each. Crash recovery runs once
//! before the loop; the socket server broadcasts the bus concurrently.

pub mod adapter;
pub mod bus;
pub mod recovery;
pub mod runner;
pub mod socket;
pub mod store;

use adapter::AdapterRegistry;
use bus::EventBus;
use chrono::Utc;
use eyre::WrapErr;
use pulse_core::discover::discover;
use pulse_core::events::{DaemonEvent, TickStatus};
use pulse_core::schedule::ScheduleSpec;
use pulse_core::types::Heartbeat;
use runner::Runner;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default pause between ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Daemon configuration, resolved from CLI flags.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub tick_interval: Duration,
    pub debug_log: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: store::default_data_dir(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            debug_log: false,
        }
    }
}

/// Explicitly constructed dependencies threaded through the runner and
/// socket server. There is no process-global state.
#[derive(Debug)]
pub struct DaemonContext {
    pub store: Arc<Store>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<AdapterRegistry>,
}

impl DaemonContext {
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(store),
            bus: Arc::new(EventBus::new()),
            registry: Arc::new(AdapterRegistry::new()),
        }
    }
}

#[derive(Debug)]
pub struct Daemon {
    config: DaemonConfig,
    ctx: DaemonContext,
    runner: Runner,
    shutdown: CancellationToken,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> eyre::Result<Self> {
        let store = Store::open(&config.data_dir, config.debug_log)
            .wrap_err("failed to open data directory")?;
        let ctx = DaemonContext::new(store);
        let runner = Runner::new(
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.bus),
            Arc::clone(&ctx.registry),
        );
        Ok(Self {
            config,
            ctx,
            runner,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token for external shutdown triggers (signal handlers, tests).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.shutdown.cancel();
    }

    /// Run until shutdown: recovery, socket server, then the tick loop.
    pub async fn run(&self) -> eyre::Result<()> {
        let store = &self.ctx.store;
        info!(data_dir = %store.dir().display(), "pulsed starting");

        // Refuse to double-start against the same data directory.
        if let Some(pid) = store.read_pid() {
            if pid != std::process::id() && recovery::pid_alive(pid) {
                eyre::bail!("daemon already running (PID {pid})");
            }
        }
        store.write_pid_file().wrap_err("failed to write pid file")?;

        // Reconcile whatever the previous process left in flight, before
        // the first tick can schedule anything.
        let lost = recovery::recover(store);
        if lost > 0 {
            info!(lost, "crash recovery reported lost runs");
        }

        let socket_task = tokio::spawn(socket::serve(
            store.socket_path(),
            Arc::clone(&self.ctx.bus),
            self.shutdown.clone(),
        ));

        self.ctx.bus.emit(&DaemonEvent::DaemonReady {
            pid: std::process::id(),
        });

        loop {
            if let Err(err) = self.tick().await {
                // A broken tick (unreadable config, full disk) must not
                // kill the daemon; try again next interval.
                error!(error = %err, "tick failed");
            }
            tokio::select! {
                () = tokio::time::sleep(self.config.tick_interval) => {}
                () = self.shutdown.cancelled() => break,
            }
        }

        // Orderly shutdown: tell watchers, close the socket, drop the
        // pid file.
        self.ctx.bus.emit(&DaemonEvent::DaemonShutdown);
        self.shutdown.cancel();
        match socket_task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "socket server error"),
            Err(err) => warn!(error = %err, "socket task panicked"),
        }
        store.remove_pid_file();
        info!("pulsed stopped");
        Ok(())
    }

    /// One pass of the loop: status for everything, then run what is due.
    async fn tick(&self) -> eyre::Result<()> {
        let store = &self.ctx.store;
        let mut config = store
            .load_config()
            .wrap_err_with(|| format!("failed to load {}", store.config_path().display()))?;

        let now = Utc::now();
        let last_outcomes = store.last_outcomes();
        let mut statuses = Vec::new();
        let mut due: Vec<(usize, Heartbeat)> = Vec::new();

        for (index, workspace) in config.workspaces.iter().enumerate() {
            let spec = match ScheduleSpec::resolve(
                workspace.interval.as_deref(),
                workspace.cron.as_deref(),
                workspace.timezone.as_deref(),
            ) {
                Ok(spec) => spec,
                Err(err) => {
                    warn!(workspace = %workspace.path.display(), error = %err, "bad schedule; skipping");
                    ScheduleSpec::Manual
                }
            };

            for heartbeat in discover(workspace) {
                let identity = heartbeat.identity();
                let is_due = spec.is_due(heartbeat.last_run, now);
                let last = last_outcomes.get(&identity);
                statuses.push(TickStatus {
                    heartbeat: identity,
                    name: heartbeat.display_name(),
                    schedule: spec.describe(),
                    next_run: spec.next_run(heartbeat.last_run, now),
                    last_run: heartbeat.last_run,
                    last_outcome: last.map(|(outcome, _)| *outcome),
                    due: is_due,
                });
                if is_due {
                    due.push((index, heartbeat));
                }
            }
        }

        self.ctx.bus.emit(&DaemonEvent::Tick {
            at: now,
            heartbeats: statuses,
        });
        store.debug(&format!("tick: {} due", due.len()));

        // Strictly sequential: one agent process at a time system-wide. A
        // shutdown between runs stops scheduling new ones; an in-flight
        // run drains to completion bounded by its own timeout.
        for (index, heartbeat) in due {
            if self.shutdown.is_cancelled() {
                info!("shutdown during tick; remaining due heartbeats deferred");
                break;
            }
            let started_at = Utc::now();
            let _entry = self.runner.run(&config.workspaces[index], &heartbeat).await;
            config.workspaces[index].set_last_run(&heartbeat.file, started_at);
            store
                .save_config(&config)
                .wrap_err("failed to persist lastRun")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::config::{BeatsConfig, WorkspaceConfig};
    use tempfile::TempDir;

    fn daemon_in(dir: &TempDir) -> Daemon {
        Daemon::new(DaemonConfig {
            data_dir: dir.path().join("data"),
            tick_interval: Duration::from_millis(50),
            debug_log: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn tick_skips_not_due_heartbeats_and_emits_status() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon_in(&dir);

        let workspace_dir = dir.path().join("ws");
        std::fs::create_dir_all(&workspace_dir).unwrap();
        std::fs::write(workspace_dir.join("HEARTBEAT.md"), "check").unwrap();

        let mut ws = WorkspaceConfig::new(&workspace_dir);
        ws.interval = Some("1d".to_string());
        // Ran just now, so the tick must not consider it due.
        ws.set_last_run("HEARTBEAT.md", Utc::now());
        daemon
            .ctx
            .store
            .save_config(&BeatsConfig {
                workspaces: vec![ws],
            })
            .unwrap();

        let (_id, mut events) = daemon.ctx.bus.subscribe();
        daemon.tick().await.unwrap();

        let event = events.try_recv().unwrap();
        let DaemonEvent::Tick { heartbeats, .. } = event else {
            panic!("expected tick event");
        };
        assert_eq!(heartbeats.len(), 1);
        assert!(!heartbeats[0].due);
        assert_eq!(heartbeats[0].schedule, "every 1d");
        // No run happened, so no log entry was appended.
        assert!(daemon.ctx.store.read_log().is_empty());
    }

    #[tokio::test]
    async fn tick_fails_gracefully_without_config() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon_in(&dir);
        assert!(daemon.tick().await.is_err());
    }

    #[tokio::test]
    async fn run_refuses_second_daemon_on_same_data_dir() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon_in(&dir);
        // A live pid file from "another" daemon (this test process).
        daemon.ctx.store.write_pid_file().unwrap();
        std::fs::write(
            daemon.ctx.store.pid_path(),
            format!("{}\n", fake_other_live_pid()),
        )
        .unwrap();

        let err = daemon.run().await.unwrap_err();
        assert!(err.to_string().contains("already running"));
    }

    /// PID 1 is always alive and never us.
    fn fake_other_live_pid() -> u32 {
        1
    }

    #[tokio::test]
    async fn shutdown_breaks_the_loop_and_removes_pid_file() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon_in(&dir);
        // Empty but valid config so ticks succeed.
        daemon
            .ctx
            .store
            .save_config(&BeatsConfig::default())
            .unwrap();

        let token = daemon.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        daemon.run().await.unwrap();
        assert_eq!(daemon.ctx.store.read_pid(), None);
        assert!(!daemon.ctx.store.socket_path().exists());
    }
}
