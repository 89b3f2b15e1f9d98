//! Health Check, Metrics and Admin Endpoint
//!
//! HTTP endpoint for health checks, Prometheus metrics and ticker
//! administration. Used by container orchestrators, load balancers,
//! monitoring systems and operators.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (price source initialized)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /tickers` - Sorted list of actively polled tickers
//! - `DELETE /tickers/{ticker}` - Force-remove a ticker and release its resources

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{PriceRegistry, RemovalOutcome};
use crate::domain::price::Symbol;
use crate::domain::subscription::RegistryStats;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether the price source has been initialized.
    pub source_ready: bool,
    /// Actively polled tickers, sorted.
    pub active_tickers: Vec<Symbol>,
    /// Registry statistics.
    pub registry: RegistryStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Source initialized and accepting subscriptions.
    Healthy,
    /// Accepting subscriptions, source not yet initialized.
    Degraded,
    /// Shutting down.
    Unhealthy,
}

/// Active ticker listing.
#[derive(Debug, Clone, Serialize)]
pub struct TickersResponse {
    /// Actively polled tickers, sorted.
    pub tickers: Vec<Symbol>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: PriceRegistry,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, registry: PriceRegistry) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/tickers", get(list_tickers_handler))
        .route("/tickers/{ticker}", delete(remove_ticker_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if determine_health_status(&state.registry) == HealthStatus::Healthy {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn list_tickers_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(TickersResponse {
        tickers: state.registry.list_active_symbols(),
    })
}

async fn remove_ticker_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(ticker): Path<String>,
) -> impl IntoResponse {
    let symbol = match Symbol::parse(&ticker) {
        Ok(symbol) => symbol,
        Err(e) => {
            let outcome = RemovalOutcome {
                success: false,
                message: e.to_string(),
            };
            return (StatusCode::BAD_REQUEST, Json(outcome));
        }
    };

    tracing::info!(symbol = %symbol, "Ticker removal requested over HTTP");
    let outcome = state.registry.remove_ticker(&symbol).await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(outcome))
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    HealthResponse {
        status: determine_health_status(&state.registry),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        source_ready: state.registry.is_ready(),
        active_tickers: state.registry.list_active_symbols(),
        registry: state.registry.stats(),
    }
}

fn determine_health_status(registry: &PriceRegistry) -> HealthStatus {
    if registry.is_closed() {
        HealthStatus::Unhealthy
    } else if registry.is_ready() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
