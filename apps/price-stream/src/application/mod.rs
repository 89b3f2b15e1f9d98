//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with the price source.

/// Port interfaces for external systems (price source).
pub mod ports;

/// Application services for subscriptions, polling and streaming sessions.
pub mod services;
