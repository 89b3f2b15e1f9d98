//! Price Types
//!
//! Symbols, price samples, and the events pushed to subscribers.
//!
//! # Sentinel
//!
//! The price `-404` is reserved. It never represents a market price; it
//! marks either a terminal "symbol unresolvable" condition pushed by a poller
//! or a locally synthesized idle heartbeat. The two are kept apart by type
//! ([`PriceEvent::Unresolvable`] vs. a session heartbeat), not by value.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Reserved price marking a sentinel sample.
pub const SENTINEL_PRICE: Decimal = Decimal::from_parts(404, 0, 0, true, 0);

/// Minimum symbol length.
pub const SYMBOL_MIN_LEN: usize = 3;

/// Maximum symbol length.
pub const SYMBOL_MAX_LEN: usize = 10;

// =============================================================================
// Symbol
// =============================================================================

/// A normalized ticker symbol: 3-10 upper-case ASCII alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a raw ticker string.
    ///
    /// Surrounding whitespace is trimmed and the result is upper-cased.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError` if the normalized value is not 3-10
    /// alphanumeric characters.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let normalized = raw.trim().to_ascii_uppercase();

        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }

        let len = normalized.chars().count();
        if !(SYMBOL_MIN_LEN..=SYMBOL_MAX_LEN).contains(&len) {
            return Err(SymbolError::Length(len));
        }

        if let Some(c) = normalized.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(SymbolError::InvalidCharacter(c));
        }

        Ok(Self(normalized))
    }

    /// The symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

/// Symbol validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// The symbol was empty after trimming.
    #[error("ticker symbol is required")]
    Empty,
    /// The symbol length is out of range.
    #[error("ticker must be {SYMBOL_MIN_LEN}-{SYMBOL_MAX_LEN} characters, got {0}")]
    Length(usize),
    /// The symbol contains a non-alphanumeric character.
    #[error("ticker contains invalid character {0:?}")]
    InvalidCharacter(char),
}

// =============================================================================
// Price Sample
// =============================================================================

/// One price observation for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    /// Symbol the price belongs to.
    pub symbol: Symbol,
    /// Observed price.
    pub price: Decimal,
    /// When the price was observed.
    pub observed_at: DateTime<Utc>,
}

impl PriceSample {
    /// Create a sample observed now.
    #[must_use]
    pub fn now(symbol: Symbol, price: Decimal) -> Self {
        Self {
            symbol,
            price,
            observed_at: Utc::now(),
        }
    }

    /// Build the reserved sentinel sample for a symbol.
    #[must_use]
    pub fn sentinel(symbol: Symbol) -> Self {
        Self::now(symbol, SENTINEL_PRICE)
    }

    /// Whether this sample carries the reserved sentinel price.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.price == SENTINEL_PRICE
    }
}

// =============================================================================
// Price Event
// =============================================================================

/// An event pushed from the registry to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceEvent {
    /// A fresh (or cached) price sample.
    Price(PriceSample),
    /// The symbol became permanently unresolvable; carries the sentinel.
    Unresolvable(PriceSample),
}

impl PriceEvent {
    /// Terminal event for a symbol.
    #[must_use]
    pub fn unresolvable(symbol: Symbol) -> Self {
        Self::Unresolvable(PriceSample::sentinel(symbol))
    }

    /// The sample carried by this event.
    #[must_use]
    pub const fn sample(&self) -> &PriceSample {
        match self {
            Self::Price(sample) | Self::Unresolvable(sample) => sample,
        }
    }

    /// Whether this event ends the stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Unresolvable(_))
    }
}

// =============================================================================
// Tests
// =============================================================================
