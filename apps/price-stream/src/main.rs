//! Pluto Price Stream Binary
//!
//! Starts the live price fan-out service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin pluto-price-stream
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//! - `PRICE_STREAM_GRPC_PORT`: gRPC server port (default: 8080)
//! - `PRICE_STREAM_HTTP_PORT`: Health and admin HTTP port (default: 8081)
//! - `PRICE_STREAM_POLL_INTERVAL_MS`: Per-symbol poll interval (default: 2000)
//! - `PRICE_STREAM_IDLE_TIMEOUT_MS`: Session heartbeat timeout (default: 5000)
//! - `PRICE_SOURCE_SYMBOLS`: Listed symbols as `SYM=price,...` (default: built-in set)
//! - `PRICE_SOURCE_VOLATILITY`: Max relative move per read (default: 0.001)
//! - `PRICE_SOURCE_TRANSIENT_FAILURE_RATE`: Fraction of failing reads (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: pluto-price-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pluto_price_stream::infrastructure::grpc::proto::pluto::price::v1::price_service_server::PriceServiceServer;
use pluto_price_stream::infrastructure::telemetry;
use pluto_price_stream::{
    HealthServer, HealthServerState, PriceRegistry, PriceSource, PriceStreamServer,
    PriceStreamServerConfig, ServiceConfig, SimulatedPriceSource, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Pluto price stream");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Price source and registry
    let source: Arc<dyn PriceSource> = Arc::new(SimulatedPriceSource::new(config.source.clone()));
    let registry = PriceRegistry::new(source, config.stream.registry());

    if let Err(e) = registry.ensure_ready().await {
        tracing::warn!(error = %e, "Price source not ready, retrying on first subscribe");
    }

    // Initialize gRPC server
    let grpc_server = PriceStreamServer::new(
        PriceStreamServerConfig {
            version: env!("CARGO_PKG_VERSION").to_string(),
            idle_timeout: config.stream.idle_timeout,
        },
        registry.clone(),
        shutdown_token.clone(),
    );

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        registry.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.http_port,
        health_state,
        shutdown_token.clone(),
    );

    // Spawn health server
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn gRPC server
    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.server.grpc_port));
    let grpc_service = PriceServiceServer::new(grpc_server);
    let grpc_shutdown = shutdown_token.clone();

    let grpc_task = tokio::spawn(async move {
        tracing::info!(addr = %grpc_addr, "gRPC server listening");
        if let Err(e) = Server::builder()
            .add_service(grpc_service)
            .serve_with_shutdown(grpc_addr, grpc_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "gRPC server error");
        }
        tracing::info!("gRPC server stopped");
    });

    tracing::info!("Price stream ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(grpc_task, health_task);
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Servers did not stop within the shutdown timeout");
    }

    registry.shutdown().await;

    tracing::info!("Price stream stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        grpc_port = config.server.grpc_port,
        http_port = config.server.http_port,
        poll_interval_ms = u64::try_from(config.stream.poll_interval.as_millis()).unwrap_or(u64::MAX),
        idle_timeout_ms = u64::try_from(config.stream.idle_timeout.as_millis()).unwrap_or(u64::MAX),
        "Configuration loaded"
    );
    tracing::debug!(
        listed = config.source.universe.len(),
        volatility = config.source.volatility,
        transient_failure_rate = config.source.transient_failure_rate,
        "Simulated source settings"
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
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
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
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
