//! # TMON Hub API Server
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Hub Server                                     │
//! │                                                                         │
//! │  spokes    ───► HTTP (8080) ───► tmon-sync services ───► SQLite        │
//! │  operators ───►                        │                                │
//! │                                        └── count-refresh (timer)        │
//! │                                              ───► every paired spoke    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `hub-api [CONFIG_PATH]` (or `TMON_CONFIG`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tmon_db::{Database, DbConfig};
use tmon_hub_api::{build_router, AppState};
use tmon_sync::scheduler::spawn_count_refresh;
use tmon_sync::{NodeRole, TmonConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tmon=debug,sqlx=warn")),
        )
        .with_target(true)
        .init();

    info!("Starting TMON hub...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TMON_CONFIG").ok())
        .map(PathBuf::from);
    let config = TmonConfig::load(config_path).context("loading configuration")?;
    if config.role() != NodeRole::Hub {
        warn!(role = %config.role(), "Configured role is not hub; serving hub routes anyway");
    }
    if config.hub.operator_key.is_none() {
        warn!("hub.operator_key not set; operator routes will refuse every call");
    }
    info!(
        bind = %config.server.bind_address(),
        db = %config.database.path.display(),
        refresh_secs = config.hub.refresh_interval_secs,
        "Configuration loaded"
    );

    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent).context("creating data directory")?;
    }
    let db = Database::new(
        DbConfig::new(config.database.path.clone()).max_connections(config.database.max_connections),
    )
    .await
    .context("opening database")?;

    let state = AppState::new(db.clone(), &config)?;

    let refresh = spawn_count_refresh(
        state.aggregator.clone(),
        Duration::from_secs(config.hub.refresh_interval_secs),
    );

    let listener = TcpListener::bind(config.server.bind_address())
        .await
        .with_context(|| format!("binding {}", config.server.bind_address()))?;
    info!(addr = %config.server.bind_address(), "Hub listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = refresh.shutdown().await {
        warn!(error = %e, "Job did not stop cleanly");
    }
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
