//! # Delivery API Server
//!
//! Entry point for the delivery batch tracking server. Serves the batch
//! commands and tracking queries over HTTP and supervises the per-batch
//! simulation runs.

mod config;
mod error;
mod handlers;
mod routes;
mod state;

use crate::config::ApiConfig;
use crate::routes::create_router;
use crate::state::AppState;

use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Delivery Tracking Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ApiConfig::load()?;
    info!("Configuration loaded");
    info!("   API Port: {}", config.api_port);
    info!("   Store: {:?} {:?}", config.db.backend, config.db.hosts);
    info!(
        "   Map provider: {}",
        if config.maps.api_key.is_some() { "tencent" } else { "offline" }
    );

    // Initialize application state
    let state = AppState::new(config.clone()).await?;
    if state.degraded {
        warn!("Serving from the in-memory store; data will not survive a restart");
    }

    // Create router
    let app = create_router(state.clone());
    info!("Routes configured");

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("API server listening on http://{}", addr);
    info!("Metrics available at http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let left = state.tracker.shutdown().await;
    if !left.is_empty() {
        warn!(
            "{} batch(es) left DELIVERING; stop or complete them after restart",
            left.len()
        );
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing; `LOG_FORMAT=json` selects JSON output
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,delivery_api=debug,delivery_tracker=debug"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_target(true).with_thread_ids(true)))
        .with((!json).then(|| fmt::layer().with_target(true).with_thread_ids(true)))
        .init();
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        }
    }
}
