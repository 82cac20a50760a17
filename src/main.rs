//! Arena Server - authoritative simulation server for a multiplayer arena shooter
//!
//! Each match is a single actor task fed by:
//! - a lifecycle socket (`/gameInfoWs`) that creates the match
//! - one display socket (`/screenWs`) receiving position frames
//! - controller sockets (`/controllerWs`) streaming player input
//!
//! Maps come from an external generator service over HTTP.

mod app;
mod config;
mod game;
mod http;
mod maps;
mod util;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::maps::service::HttpMapSource;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    init_tracing(&config.log_level, config.log_json);
    init_server_time();

    info!("Starting Arena Server");
    info!("Server address: {}", config.server_addr);
    info!(
        map_service = %config.map_service.base_url,
        max_rounds = config.rules.max_rounds,
        seeded = config.match_seed.is_some(),
        "Configuration loaded"
    );

    let speed_scale = config.rules.speed_scale();
    if (speed_scale - 1.0).abs() > f64::EPSILON {
        warn!(
            sim_tick_ms = config.rules.sim_tick.as_millis() as u64,
            speed_scale,
            "SIM_TICK_MS differs from the 15 ms calibration, game speed is scaled"
        );
    }

    let map_source = Arc::new(HttpMapSource::new(&config.map_service)?);
    let state = AppState::new(config.clone(), map_source);

    let router = build_router(state);

    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Lifecycle endpoint: ws://{}/gameInfoWs", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
