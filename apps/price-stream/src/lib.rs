#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Pluto Price Stream - Live Price Fan-out
//!
//! A gRPC service that polls one price source at most once per symbol per
//! interval and fans every sample out to all clients streaming that symbol.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Core data types
//!   - `price`: Symbols, samples and the events pushed to subscribers
//!   - `subscription`: Subscribers, subscriber sets and per-symbol state
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The price source interface
//!   - `services`: Registry, pollers, stream sessions and removal
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `grpc`: gRPC streaming server implementation
//!   - `source`: Simulated random-walk price source
//!   - `config`: Environment configuration
//!   - `health`: Health check and admin HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                    +-------------+     +-------------+
//! Price source <---- |  Poller     |     |   Stream    |---> Client 1
//!   (one read per    |  (per       |---->|  Sessions   |---> Client 2
//!    symbol/tick)    |   symbol)   |     | (per client)|---> Client N
//!                    +-------------+     +-------------+
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core price and subscription types.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::price::{PriceEvent, PriceSample, SENTINEL_PRICE, Symbol, SymbolError};
pub use domain::subscription::{RegistryStats, SampleSink, Subscriber, SubscriberId};

// Ports
pub use application::ports::{FetchError, PriceSource, SourceError};

// Services
pub use application::services::{
    PriceRegistry, RegistrySettings, RemovalOutcome, SessionError, StreamItem, StreamSession,
    SubscriptionError,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServerSettings, ServiceConfig, StreamSettings};

// Price source
pub use infrastructure::source::{SimulatedPriceSource, SourceSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// gRPC server (for integration tests)
pub use infrastructure::grpc::{
    proto::pluto::price::v1 as proto,
    server::{PriceStreamServer, PriceStreamServerConfig},
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
