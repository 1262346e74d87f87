//! Main application entry point (CLI binary).
//!
//! Composition root of the access layer:
//! - Environment variable loading (.env file)
//! - Command-line argument parsing and logger initialization
//! - Building the database service and its health monitor
//! - Optional status server
//! - Shutdown on Ctrl-C / SIGTERM

use std::net::SocketAddr;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use pg_resilience::initialization::init_logger_with;
use pg_resilience::status_server::{start_status_server, StatusState};
use pg_resilience::{ConnectionConfig, Database, HealthEvent, Opt};

#[tokio::main]
async fn main() -> Result<()> {
    // Try the current directory first, then next to the executable
    if dotenvy::dotenv().is_err() {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let env_path = exe_dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                }
            }
        }
    }

    let opt = Opt::parse();
    init_logger_with(opt.log_level.clone().into(), opt.log_format.clone())
        .context("Failed to initialize logger")?;

    let config = match ConnectionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            eprintln!("pg_resilience error: {}", e);
            process::exit(1);
        }
    };
    info!(
        "Using {} database endpoint ({} environment)",
        config.context,
        config.context.environment()
    );

    let db = match Database::connect(config).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("pg_resilience error: {}", e);
            process::exit(1);
        }
    };

    db.start_health_monitor(Duration::from_secs(opt.health_interval_secs.max(1)));
    let event_task = tokio::spawn(log_health_events(db.subscribe_health_events()));

    let server_shutdown = CancellationToken::new();
    let server_task = opt.status_port.map(|port| {
        let addr = SocketAddr::new(opt.status_host, port);
        let state = StatusState::new(db.clone());
        let shutdown = server_shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = start_status_server(addr, state, shutdown).await {
                error!("{}", e);
            }
        })
    });

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received");

    server_shutdown.cancel();
    if let Some(task) = server_task {
        let _ = task.await;
    }
    db.shutdown().await;
    event_task.abort();

    let stats = db.stats();
    info!(
        "Executed {} statement(s): {} succeeded, {} retries, {} failed attempts",
        stats.executions(),
        stats.successes(),
        stats.retries(),
        stats.total_failures()
    );
    Ok(())
}

/// Forwards health events to the log until the channel closes.
async fn log_health_events(mut events: tokio::sync::broadcast::Receiver<HealthEvent>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!("health event: {}", json),
                Err(e) => warn!("Unserializable health event {:?}: {}", event, e),
            },
            Err(RecvError::Lagged(skipped)) => warn!("Skipped {} health event(s)", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM ({}), waiting for Ctrl-C only", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
