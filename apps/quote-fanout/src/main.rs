//! Quote Fan-out Binary
//!
//! Starts the WebSocket fan-out service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-fanout
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `QUOTE_PROVIDER`: simulated | alphavantage (default: simulated)
//! - `ALPHA_VANTAGE_API_KEY`: Required when the provider is alphavantage
//! - `QUOTE_FANOUT_WS_PORT`: WebSocket port (default: 8080)
//! - `QUOTE_FANOUT_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `QUOTE_FANOUT_MAX_CONNECTIONS`: Connection cap (default: 100)
//! - `QUOTE_FANOUT_POLL_INTERVAL_SECS`: Per-symbol poll period (default: 5)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quote_fanout::infrastructure::health::{HealthServer, HealthServerState};
use quote_fanout::infrastructure::telemetry;
use quote_fanout::infrastructure::websocket::WebSocketServer;
use quote_fanout::{FanoutConfig, FanoutService, FanoutSettings, build_provider, init_metrics};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Quote Fan-out");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = FanoutConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let provider = build_provider(&config.provider).context("failed to build quote provider")?;
    let service = FanoutService::new(
        provider,
        FanoutSettings::from(&config.service),
        shutdown_token.clone(),
    );

    // Spawn heartbeat and stale-subscription sweeps
    let heartbeat = tokio::spawn(service.clone().run_heartbeat(shutdown_token.clone()));
    let sweeper = tokio::spawn(service.clone().run_stale_sweeper(shutdown_token.clone()));

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        service.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn WebSocket server
    let ws_server = WebSocketServer::new(
        config.server.ws_port,
        service.clone(),
        config.server.max_message_bytes,
        shutdown_token.clone(),
    );
    let ws_shutdown = shutdown_token.clone();
    let ws = tokio::spawn(async move {
        if let Err(e) = ws_server.run().await {
            tracing::error!(error = %e, "WebSocket server error");
            ws_shutdown.cancel();
        }
    });

    tracing::info!("Quote fan-out ready");

    await_shutdown(shutdown_token).await;
    service.shutdown();

    drain(vec![heartbeat, sweeper, health, ws]).await;

    tracing::info!("Quote fan-out stopped");
    Ok(())
}

/// Wait for background tasks to finish, up to the shutdown timeout.
async fn drain(tasks: Vec<JoinHandle<()>>) {
    let joined = futures::future::join_all(tasks);
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, joined).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Background task panicked");
                }
            }
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Shutdown timed out waiting for background tasks"
            );
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FanoutConfig) {
    tracing::info!(
        provider = config.provider.kind.as_str(),
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        max_connections = config.service.max_connections,
        poll_interval_secs = config.service.poll_interval.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_interval_secs = config.service.heartbeat_interval.as_secs(),
        stale_threshold_secs = config.service.stale_threshold.as_secs(),
        sweep_interval_secs = config.service.sweep_interval.as_secs(),
        outbound_buffer = config.service.outbound_buffer,
        "Service timings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                if let Err(e) = dotenvy::from_path(&env_path) {
                    eprintln!("Failed to load {}: {e}", env_path.display());
                }
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT) or an internal cancel.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
