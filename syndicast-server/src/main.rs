//! syndicast-server - HTTP entrypoints and sweep daemon
//!
//! Serves the OAuth connect flows and dispatch endpoints, and runs the
//! background sweep loop that dispatches scheduled posts when their local
//! wall-clock window arrives.

use clap::Parser;
use libsyndicast::logging::{LogFormat, LoggingConfig};
use libsyndicast::{
    AdapterRegistry, Config, ConnectService, Database, Dispatcher, RefreshManager, Scheduler,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

mod routes;

use routes::AppState;

#[derive(Parser, Debug)]
#[command(name = "syndicast-server")]
#[command(version)]
#[command(about = "Scheduled social post dispatch server")]
#[command(long_about = "\
syndicast-server - Scheduled social post dispatch server

DESCRIPTION:
    syndicast-server hosts the OAuth connect flows for supported platforms
    and runs the background sweep loop. The loop polls the database at
    regular intervals, selects posts scheduled on the current UTC date,
    filters them by the owning channel's local wall clock, and dispatches
    the due ones.

USAGE:
    # Run in foreground (logs to stderr)
    syndicast-server

    # Run with custom poll interval
    syndicast-server --poll-interval 30

    # Enable verbose logging
    syndicast-server --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current sweep)

CONFIGURATION:
    Configuration file: ~/.config/syndicast/config.toml
    Database location: ~/.local/share/syndicast/syndicast.db

    [server]
    bind = \"127.0.0.1:8787\"
    app_origin = \"https://app.example.com\"

    [scheduler]
    poll_interval = 60   # seconds between sweeps
    tolerance_secs = 60  # half-width of the due window

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, value_name = "PATH", env = "SYNDICAST_CONFIG")]
    config: Option<PathBuf>,

    /// Sweep interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to sweep for due posts (default: 60)")]
    poll_interval: Option<u64>,

    /// Bind address (overrides config)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Log output format
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run one sweep and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    LoggingConfig::new(cli.log_format, "info".to_string(), cli.verbose).init();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let db = Database::new(&config.database.path).await?;
    let adapters = AdapterRegistry::from_config(&config);

    let refresher = RefreshManager::new(db.clone(), adapters.clone());
    let dispatcher = Dispatcher::new(db.clone(), adapters.clone(), refresher.clone());
    let scheduler = Scheduler::new(
        db.clone(),
        adapters.clone(),
        dispatcher.clone(),
        config.scheduler.tolerance_secs,
    );
    let connect = ConnectService::new(db.clone(), adapters, &config);

    info!("syndicast-server starting");

    if cli.once {
        let summary = scheduler.sweep(chrono::Utc::now()).await?;
        info!(
            candidates = summary.candidates_found,
            due = summary.due,
            ok = summary.dispatched_ok,
            failed = summary.dispatch_failed,
            "Single sweep complete, exiting"
        );
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let poll_interval = cli.poll_interval.unwrap_or(config.scheduler.poll_interval);
    info!("Sweep interval: {}s", poll_interval);

    let sweep_handle = tokio::spawn(run_sweep_loop(
        scheduler.clone(),
        poll_interval,
        shutdown.clone(),
    ));

    let state = AppState {
        connect,
        dispatcher,
        refresher,
        scheduler,
    };

    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on {}", bind);

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await?;

    sweep_handle.await?;
    info!("syndicast-server stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

async fn wait_for_shutdown(shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        sleep(Duration::from_secs(1)).await;
    }
}

/// Background sweep loop
async fn run_sweep_loop(scheduler: Scheduler, poll_interval: u64, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping sweep loop");
            break;
        }

        match scheduler.sweep(chrono::Utc::now()).await {
            Ok(summary) if summary.due > 0 => {
                info!(
                    due = summary.due,
                    ok = summary.dispatched_ok,
                    failed = summary.dispatch_failed,
                    "Sweep dispatched posts"
                );
            }
            Ok(_) => {}
            Err(e) => error!("Sweep failed: {}", e),
        }

        // Sleep until the next sweep, checking for shutdown every second.
        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}
