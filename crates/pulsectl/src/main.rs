//! pulsectl - watcher and control client for pulsed.
//!
//! Thin formatting over the socket client library and the store readers.

mod client;
mod render;

use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use pulse_core::config::WorkspaceConfig;
use pulse_core::discover::discover;
use pulse_core::events::TickStatus;
use pulse_core::schedule::ScheduleSpec;
use pulse_core::types::{Heartbeat, ROOT_HEARTBEAT_FILE};
use pulsed::adapter::AdapterRegistry;
use pulsed::bus::EventBus;
use pulsed::recovery::pid_alive;
use pulsed::runner::Runner;
use pulsed::store::{default_data_dir, Store};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "pulsectl")]
#[command(about = "Watch and control the pulsed heartbeat daemon")]
#[command(version)]
struct Cli {
    /// Daemon data directory (default: $XDG_DATA_HOME/pulsed)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream live daemon events to the terminal
    Watch {
        /// Print raw NDJSON instead of formatted lines
        #[arg(long)]
        json: bool,
    },
    /// Show every heartbeat's schedule and last outcome
    Status,
    /// Stop a running daemon
    Stop,
    /// Run one heartbeat immediately, outside the daemon schedule
    Beat {
        /// Workspace path (must be registered in config.json)
        workspace: PathBuf,
        /// Heartbeat file within the workspace (default: HEARTBEAT.md)
        #[arg(long, default_value = ROOT_HEARTBEAT_FILE)]
        heartbeat: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);

    let result = match cli.command {
        Command::Watch { json } => watch(&data_dir, json).await,
        Command::Status => status(&data_dir),
        Command::Stop => stop(&data_dir).await,
        Command::Beat {
            workspace,
            heartbeat,
        } => beat(&data_dir, &workspace, &heartbeat).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

type CtlResult = Result<(), Box<dyn std::error::Error>>;

async fn watch(data_dir: &PathBuf, json: bool) -> CtlResult {
    let store = Store::open(data_dir, false)?;
    let mut events = client::connect(&store.socket_path()).await?;

    while let Some(event) = events.next_event().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", render::format_event(&event));
        }
    }
    Ok(())
}

fn status(data_dir: &PathBuf) -> CtlResult {
    let store = Store::open(data_dir, false)?;
    let config = store.load_config()?;
    let last_outcomes = store.last_outcomes();
    let now = chrono::Utc::now();

    let mut statuses = Vec::new();
    for workspace in &config.workspaces {
        let spec = ScheduleSpec::resolve(
            workspace.interval.as_deref(),
            workspace.cron.as_deref(),
            workspace.timezone.as_deref(),
        )
        .unwrap_or(ScheduleSpec::Manual);
        for heartbeat in discover(workspace) {
            let identity = heartbeat.identity();
            let last = last_outcomes.get(&identity);
            statuses.push(TickStatus {
                heartbeat: identity,
                name: heartbeat.display_name(),
                schedule: spec.describe(),
                next_run: spec.next_run(heartbeat.last_run, now),
                last_run: heartbeat.last_run,
                last_outcome: last.map(|(outcome, _)| *outcome),
                due: spec.is_due(heartbeat.last_run, now),
            });
        }
    }

    match store.read_pid() {
        Some(pid) if pid_alive(pid) => println!("daemon: running (PID {pid})"),
        _ => println!("daemon: not running"),
    }
    render::print_status(&statuses);
    Ok(())
}

async fn stop(data_dir: &PathBuf) -> CtlResult {
    let store = Store::open(data_dir, false)?;
    let Some(pid) = store.read_pid() else {
        println!("daemon not running (no pid file)");
        return Ok(());
    };
    if !pid_alive(pid) {
        println!("daemon not running (stale pid file for {pid})");
        return Ok(());
    }

    #[cfg(unix)]
    {
        // SAFETY: sending SIGTERM to the recorded daemon PID.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }

    // The daemon removes its own pid and socket files on the way out.
    for _ in 0..100 {
        if !pid_alive(pid) {
            println!("daemon stopped (PID {pid})");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(format!("daemon (PID {pid}) did not exit within 10s").into())
}

async fn beat(data_dir: &PathBuf, workspace_path: &PathBuf, heartbeat_file: &str) -> CtlResult {
    let store = Arc::new(Store::open(data_dir, false)?);
    let mut config = store.load_config()?;

    let target = std::fs::canonicalize(workspace_path)?;
    let index = config
        .workspaces
        .iter()
        .position(|ws| {
            std::fs::canonicalize(&ws.path)
                .map(|p| p == target)
                .unwrap_or(false)
        })
        .ok_or_else(|| format!("workspace {} is not registered", workspace_path.display()))?;

    let workspace: &WorkspaceConfig = &config.workspaces[index];
    let heartbeat = Heartbeat {
        workspace: workspace.path.clone(),
        file: heartbeat_file.to_string(),
        last_run: workspace.last_run_for(heartbeat_file),
    };

    let runner = Runner::new(
        Arc::clone(&store),
        Arc::new(EventBus::new()),
        Arc::new(AdapterRegistry::new()),
    );

    let started_at = chrono::Utc::now();
    let entry = runner.run(workspace, &heartbeat).await;

    println!("{}: {}", heartbeat.display_name(), entry.outcome);
    if let Some(summary) = entry.summary.as_deref().or(entry.error.as_deref()) {
        println!("  {summary}");
    }

    // Same last-write-wins caveat as the daemon: atomic rename only.
    config.workspaces[index].set_last_run(heartbeat_file, started_at);
    store.save_config(&config)?;
    Ok(())
}
