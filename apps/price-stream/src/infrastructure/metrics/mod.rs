//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Fetches**: Price source reads by outcome, and their latency
//! - **Pollers**: Pollers started and currently running
//! - **Delivery**: Events delivered and subscribers dropped on failure
//! - **Sessions**: Open streaming sessions and idle heartbeats
//! - **Removal**: Administrative ticker removals by result
//! - **gRPC**: Requests by method and status code
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::FetchError;
use crate::domain::price::PriceSample;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns `BuildError` if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Fetches
    describe_counter!(
        "price_stream_fetches_total",
        "Total price source reads by outcome"
    );
    describe_histogram!(
        "price_stream_fetch_duration_seconds",
        "Time spent reading one price from the source"
    );

    // Pollers
    describe_counter!(
        "price_stream_pollers_started_total",
        "Total per-symbol pollers started"
    );
    describe_gauge!(
        "price_stream_pollers_active",
        "Number of per-symbol pollers currently running"
    );

    // Delivery
    describe_counter!(
        "price_stream_events_delivered_total",
        "Total price events handed to subscribers"
    );
    describe_counter!(
        "price_stream_delivery_failures_total",
        "Total subscribers dropped because delivery failed"
    );
    describe_counter!(
        "price_stream_events_dropped_total",
        "Total events evicted from full session mailboxes"
    );

    // Sessions
    describe_gauge!(
        "price_stream_sessions_active",
        "Number of open streaming sessions"
    );
    describe_counter!(
        "price_stream_heartbeats_total",
        "Total idle heartbeats produced by sessions"
    );

    // Removal
    describe_counter!(
        "price_stream_removals_total",
        "Total administrative ticker removals by result"
    );

    // gRPC
    describe_counter!(
        "price_stream_grpc_requests_total",
        "Total gRPC requests by method and status code"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for a price fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A price was read.
    Ok,
    /// The symbol does not exist upstream.
    NotFound,
    /// The read failed but may succeed later.
    Transient,
}

impl FetchOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotFound => "not_found",
            Self::Transient => "transient",
        }
    }

    /// Classify a fetch result.
    #[must_use]
    pub const fn of(result: &Result<PriceSample, FetchError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(FetchError::NotFound(_)) => Self::NotFound,
            Err(FetchError::Transient(_)) => Self::Transient,
        }
    }
}

/// Record one price fetch and its latency.
pub fn record_fetch(result: &Result<PriceSample, FetchError>, duration: Duration) {
    let outcome = FetchOutcome::of(result).as_str();
    counter!("price_stream_fetches_total", "outcome" => outcome).increment(1);
    histogram!("price_stream_fetch_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Record a poller start.
pub fn record_poller_started() {
    counter!("price_stream_pollers_started_total").increment(1);
    gauge!("price_stream_pollers_active").increment(1.0);
}

/// Record a poller stop.
pub fn record_poller_stopped() {
    gauge!("price_stream_pollers_active").decrement(1.0);
}

/// Record events handed to subscribers.
pub fn record_events_delivered(count: usize) {
    counter!("price_stream_events_delivered_total").increment(count as u64);
}

/// Record subscribers dropped after a failed delivery.
pub fn record_delivery_failures(count: usize) {
    counter!("price_stream_delivery_failures_total").increment(count as u64);
}

/// Record events evicted from a full session mailbox.
pub fn record_events_dropped(count: usize) {
    counter!("price_stream_events_dropped_total").increment(count as u64);
}

/// Record a session opening.
pub fn record_session_opened() {
    gauge!("price_stream_sessions_active").increment(1.0);
}

/// Record a session closing.
pub fn record_session_closed() {
    gauge!("price_stream_sessions_active").decrement(1.0);
}

/// Record an idle heartbeat.
pub fn record_heartbeat() {
    counter!("price_stream_heartbeats_total").increment(1);
}

/// Record an administrative ticker removal.
pub fn record_removal(success: bool) {
    let result = if success { "ok" } else { "error" };
    counter!("price_stream_removals_total", "result" => result).increment(1);
}

/// Record a gRPC request outcome.
pub fn record_grpc_request(method: &'static str, code: tonic::Code) {
    counter!(
        "price_stream_grpc_requests_total",
        "method" => method,
        "code" => format!("{code:?}")
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::price::Symbol;
    use rust_decimal::Decimal;

    #[test]
    fn fetch_outcome_labels() {
        let symbol = Symbol::parse("BTCUSD").unwrap();

        let ok = Ok(PriceSample::now(symbol.clone(), Decimal::ONE));
        let not_found = Err(FetchError::NotFound(symbol));
        let transient = Err(FetchError::Transient("timeout".to_string()));

        assert_eq!(FetchOutcome::of(&ok).as_str(), "ok");
        assert_eq!(FetchOutcome::of(&not_found).as_str(), "not_found");
        assert_eq!(FetchOutcome::of(&transient).as_str(), "transient");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_poller_started();
        record_poller_stopped();
        record_events_delivered(3);
        record_events_dropped(1);
        record_heartbeat();
        record_grpc_request("Subscribe", tonic::Code::Ok);
    }
}
