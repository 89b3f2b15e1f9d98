//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceSource`: reads one fresh price for a symbol and manages the
//!   per-symbol resources needed to do so

use async_trait::async_trait;

use crate::domain::price::{PriceSample, Symbol};

// =============================================================================
// Errors
// =============================================================================

/// Failure to read a price.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The symbol cannot be resolved by the source. Permanent.
    #[error("ticker {0} not found")]
    NotFound(Symbol),
    /// Any other failure. The next poll may succeed.
    #[error("transient fetch failure: {0}")]
    Transient(String),
}

impl FetchError {
    /// Whether the error means the symbol will never resolve.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Source lifecycle failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// One-time initialization failed.
    #[error("price source initialization failed: {0}")]
    Init(String),
    /// Releasing per-symbol resources failed.
    #[error("failed to release resources for {symbol}: {reason}")]
    Release {
        /// Symbol whose resources could not be released.
        symbol: Symbol,
        /// Underlying cause.
        reason: String,
    },
}

// =============================================================================
// Price Source
// =============================================================================

/// The single external data source prices are read from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync + 'static {
    /// Lazy one-time initialization. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Init` if the source cannot be brought up.
    async fn ensure_ready(&self) -> Result<(), SourceError>;

    /// Read one fresh sample for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::NotFound` for unresolvable symbols and
    /// `FetchError::Transient` for anything else.
    async fn fetch_price(&self, symbol: &Symbol) -> Result<PriceSample, FetchError>;

    /// Best-effort release of resources held for `symbol`.
    ///
    /// Releasing a symbol that holds nothing succeeds.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Release` on failure; callers only log it.
    async fn release_symbol(&self, symbol: &Symbol) -> Result<(), SourceError>;

    /// Release everything. Called once at shutdown.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if teardown fails.
    async fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }
}
