//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the transports that expose the
//! application services.

/// gRPC streaming server implementation.
pub mod grpc;

/// Configuration loading.
pub mod config;

/// Health check and admin HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Price source adapters.
pub mod source;

/// OpenTelemetry tracing integration.
pub mod telemetry;
