//! # beacon-server
//!
//! HTTP host for the beacon advertisement watcher and publisher.
//!
//! This binary provides:
//! - REST API to start and stop the foreground watcher and publisher
//! - Background trigger registration with persisted per-task results
//! - Recent notifications and adapter capabilities
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, simulated radio
//! cargo run --package beacon-server
//!
//! # Production: compact stdout plus a rolling JSON log file
//! BEACON_ENV=production ./beacon-server
//!
//! # Any config key can be overridden from the environment
//! BEACON__LOGGING__LEVEL=debug ./beacon-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use beacon_core::BeaconConfig;
use beacon_server::{api, logging, radio, state::AppState};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("BEACON_ENV").is_ok_and(|v| v == "production");
    let (config, source) = load_config()?;

    let mut logging = config.logging.clone();
    if is_production {
        logging = logging.for_production();
    }
    let _log_guard = logging::init(&logging, &config.background)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        is_production,
        config = ?source,
        "Starting beacon-server"
    );
    config
        .validate()
        .context("Configuration failed validation")?;

    let radio = radio::open(config.server.adapter.as_deref()).await?;
    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.server.bind_address))?;

    let state = AppState::new(config, radio).await?;
    let app = api::create_router(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.suspend();
    info!("beacon-server stopped");

    Ok(())
}

/// Loads configuration from `BEACON_CONFIG` if set, otherwise from the
/// platform config file. A missing platform file means defaults.
///
/// Runs before logging is up, so the chosen path is returned for the
/// startup line.
fn load_config() -> anyhow::Result<(BeaconConfig, Option<PathBuf>)> {
    if let Some(path) = std::env::var_os("BEACON_CONFIG") {
        let path = PathBuf::from(path);
        let config = BeaconConfig::load_from(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        return Ok((config, Some(path)));
    }
    let path = BeaconConfig::config_path()?;
    let config = BeaconConfig::load()?;
    Ok((config, path.exists().then_some(path)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
