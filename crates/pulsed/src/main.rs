//! pulsed - heartbeat orchestrator daemon.
//!
//! Main entry point for the daemon binary.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::Parser;
use pulse_core::schedule::parse_interval;
use pulsed::{Daemon, DaemonConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "pulsed", about = "Heartbeat orchestrator daemon", version)]
struct Cli {
    /// Data directory (config, logs, socket). Defaults to
    /// $XDG_DATA_HOME/pulsed.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Pause between scheduler ticks, e.g. 30s, 1m.
    #[arg(long, default_value = "60s")]
    tick_interval: String,

    /// Also append a human-readable trace to debug.log.
    #[arg(long)]
    debug_log: bool,
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let tick_interval = parse_interval(&cli.tick_interval)
        .map_err(|err| eyre::eyre!("--tick-interval: {err}"))?;
    let config = DaemonConfig {
        data_dir: cli.data_dir.unwrap_or_else(pulsed::store::default_data_dir),
        tick_interval,
        debug_log: cli.debug_log,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    runtime.block_on(async {
        let daemon = Daemon::new(config)?;
        let token = daemon.cancellation_token();

        #[cfg(unix)]
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT, initiating graceful shutdown"),
                _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
            }
            token.cancel();
        });

        #[cfg(not(unix))]
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received ctrl-c, initiating graceful shutdown");
            token.cancel();
        });

        daemon.run().await
    })
}
