//! Domain Layer - Core price feed types.
//!
//! This layer contains the core domain types for the price feed with no
//! runtime dependencies. All types here are plain Rust data.

/// Symbols, price samples and the reserved sentinel.
pub mod price;

/// Subscribers, subscriber sets and per-symbol state.
pub mod subscription;
