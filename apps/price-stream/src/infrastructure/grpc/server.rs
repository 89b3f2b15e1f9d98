//! gRPC Streaming Server Implementation
//!
//! Implements the `PriceService` gRPC service on top of the price registry.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request, Response, Status};

use super::proto::pluto::price::v1::{
    GetServiceStatusRequest, GetServiceStatusResponse, ListActiveTickersRequest,
    ListActiveTickersResponse, PriceUpdate, RemoveTickerRequest, RemoveTickerResponse,
    SubscribeRequest, price_service_server::PriceService,
};
use crate::application::services::{
    DEFAULT_IDLE_TIMEOUT, PriceRegistry, SessionError, StreamItem, StreamSession,
};
use crate::domain::price::{PriceSample, Symbol};
use crate::infrastructure::metrics;

// =============================================================================
// Type Aliases
// =============================================================================

type RpcResult<T> = Result<Response<T>, Status>;
type BoxedStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Per-client buffer between the session pump and the response stream.
const STREAM_BUFFER: usize = 64;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the gRPC price server.
#[derive(Debug, Clone)]
pub struct PriceStreamServerConfig {
    /// Service version string.
    pub version: String,
    /// Idle time before a session produces a heartbeat.
    pub idle_timeout: Duration,
}

impl Default for PriceStreamServerConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

/// gRPC server fanning registry prices out to streaming clients.
#[derive(Debug)]
pub struct PriceStreamServer {
    config: PriceStreamServerConfig,
    registry: PriceRegistry,
    shutdown: CancellationToken,
    started_at: DateTime<Utc>,
    active_sessions: Arc<AtomicUsize>,
}

impl PriceStreamServer {
    /// Create a new gRPC price server.
    ///
    /// Cancelling `shutdown` ends every open stream.
    #[must_use]
    pub fn new(
        config: PriceStreamServerConfig,
        registry: PriceRegistry,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
            started_at: Utc::now(),
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of streams currently being served.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Registry backing this server.
    #[must_use]
    pub const fn registry(&self) -> &PriceRegistry {
        &self.registry
    }
}

/// Decrements the session gauge when the pump task ends.
struct SessionSlot(Arc<AtomicUsize>);

impl SessionSlot {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Forward session items to the client until either side goes away.
async fn pump(
    mut session: StreamSession,
    tx: mpsc::Sender<Result<PriceUpdate, Status>>,
    shutdown: CancellationToken,
    _slot: SessionSlot,
) {
    loop {
        let item = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::debug!(symbol = %session.symbol(), "Server shutting down, ending stream");
                break;
            }
            () = tx.closed() => {
                tracing::debug!(symbol = %session.symbol(), "Client disconnected");
                break;
            }
            item = session.next_item() => item,
        };

        match item {
            Some(StreamItem::Price(sample)) => {
                if tx.send(Ok(price_update(&sample))).await.is_err() {
                    break;
                }
            }
            Some(StreamItem::Heartbeat(_)) => {}
            None => {
                tracing::debug!(symbol = %session.symbol(), "Session ended");
                break;
            }
        }
    }

    session.close();
}

#[tonic::async_trait]
impl PriceService for PriceStreamServer {
    type SubscribeStream = BoxedStream<PriceUpdate>;

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> RpcResult<Self::SubscribeStream> {
        let symbol = parse_ticker(&request.into_inner().ticker).inspect_err(|status| {
            metrics::record_grpc_request("Subscribe", status.code());
        })?;

        let session = StreamSession::open(&self.registry, symbol, self.config.idle_timeout)
            .await
            .map_err(|e| {
                let status = session_error_to_status(&e);
                metrics::record_grpc_request("Subscribe", status.code());
                status
            })?;
        metrics::record_grpc_request("Subscribe", Code::Ok);

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let slot = SessionSlot::acquire(&self.active_sessions);
        tokio::spawn(pump(session, tx, self.shutdown.clone(), slot));

        Ok(Response::new(
            Box::pin(ReceiverStream::new(rx)) as Self::SubscribeStream
        ))
    }

    async fn remove_ticker(
        &self,
        request: Request<RemoveTickerRequest>,
    ) -> RpcResult<RemoveTickerResponse> {
        let symbol = parse_ticker(&request.into_inner().ticker).inspect_err(|status| {
            metrics::record_grpc_request("RemoveTicker", status.code());
        })?;

        let outcome = self.registry.remove_ticker(&symbol).await;
        metrics::record_grpc_request("RemoveTicker", Code::Ok);

        Ok(Response::new(RemoveTickerResponse {
            success: outcome.success,
            message: outcome.message,
        }))
    }

    async fn list_active_tickers(
        &self,
        _request: Request<ListActiveTickersRequest>,
    ) -> RpcResult<ListActiveTickersResponse> {
        let tickers = self
            .registry
            .list_active_symbols()
            .into_iter()
            .map(String::from)
            .collect();
        metrics::record_grpc_request("ListActiveTickers", Code::Ok);

        Ok(Response::new(ListActiveTickersResponse { tickers }))
    }

    async fn get_service_status(
        &self,
        _request: Request<GetServiceStatusRequest>,
    ) -> RpcResult<GetServiceStatusResponse> {
        let stats = self.registry.stats();
        metrics::record_grpc_request("GetServiceStatus", Code::Ok);

        Ok(Response::new(GetServiceStatusResponse {
            version: self.config.version.clone(),
            started_at: Some(datetime_to_timestamp(self.started_at)),
            current_time: Some(datetime_to_timestamp(Utc::now())),
            active_sessions: saturating_u32(self.active_sessions()),
            active_tickers: saturating_u32(stats.active_symbols),
            subscribers: saturating_u32(stats.subscribers),
            pollers_started: stats.pollers_started,
            pollers_running: saturating_u32(stats.pollers_running),
            source_ready: self.registry.is_ready(),
        }))
    }
}

// =============================================================================
// Conversion Functions
// =============================================================================

fn parse_ticker(raw: &str) -> Result<Symbol, Status> {
    Symbol::parse(raw).map_err(|e| Status::invalid_argument(format!("Invalid ticker {raw:?}: {e}")))
}

fn session_error_to_status(error: &SessionError) -> Status {
    match error {
        SessionError::NotFound(_) => Status::not_found(error.to_string()),
        SessionError::Internal { .. } => Status::internal(error.to_string()),
    }
}

fn price_update(sample: &PriceSample) -> PriceUpdate {
    PriceUpdate {
        ticker: sample.symbol.to_string(),
        price: decimal_to_f64(sample.price),
        observed_at: Some(datetime_to_timestamp(sample.observed_at)),
    }
}

fn datetime_to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: i32::try_from(dt.timestamp_subsec_nanos()).unwrap_or(i32::MAX),
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

// =============================================================================
// Tests
// =============================================================================
