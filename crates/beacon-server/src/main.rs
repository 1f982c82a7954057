//! # beacon-server
//!
//! HTTP host for the beacon proximity tracking engine.
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package beacon-server
//!
//! # Production
//! BEACON_ENV=production BEACON_CONFIG=/etc/beacon/config.toml ./beacon-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use anyhow::Context;
use beacon_core::BeaconEngine;
use beacon_server::api::create_router;
use beacon_server::settings::ServerSettings;
use beacon_server::state::SharedState;
use beacon_server::logging;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = ServerSettings::from_env()?;
    logging::init(settings.production)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting beacon-server");

    let config = settings
        .load_engine_config()
        .context("failed to load engine configuration")?;
    let engine = Arc::new(BeaconEngine::new(config)?);
    let state = SharedState::new(Arc::clone(&engine), settings.recent_events).await;

    let mut failures = engine.observer_errors();
    tokio::spawn(async move {
        loop {
            match failures.recv().await {
                Ok(failure) => warn!(
                    subscription = %failure.subscription,
                    observer = %failure.observer,
                    error = %failure.error,
                    "Observer failure"
                ),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Observer failure reports lost"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    engine.start().await?;

    let app = create_router(state).layer(TraceLayer::new_for_http());
    let listener = TcpListener::bind(settings.bind_addr).await?;
    info!(addr = %settings.bind_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.stop().await;
    info!("beacon-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for ctrl-c, shutting down");
    }
    info!("Shutdown requested");
}
