//! Simulated Price Source
//!
//! A self-contained `PriceSource` that serves a fixed universe of listed
//! symbols. Each symbol's price follows a multiplicative random walk
//! quantised to cents, starting from its seed price the first time it is
//! read after being released.
//!
//! Unlisted symbols fail with `FetchError::NotFound`. A configurable
//! fraction of reads fail with `FetchError::Transient`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::application::ports::{FetchError, PriceSource, SourceError};
use crate::domain::price::{PriceSample, Symbol};

/// Built-in listed symbols and their seed prices in cents.
pub const DEFAULT_UNIVERSE: [(&str, i64); 10] = [
    ("BTCUSD", 5_000_000),
    ("ETHUSD", 300_000),
    ("SOLUSD", 15_000),
    ("AAPL", 19_000),
    ("MSFT", 42_000),
    ("TSLA", 25_000),
    ("NVDA", 90_000),
    ("GOOGL", 17_000),
    ("AMZN", 18_000),
    ("SPY", 52_000),
];

const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Simulated source configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    /// Listed symbols and their seed prices.
    pub universe: BTreeMap<Symbol, Decimal>,
    /// Maximum relative move per read, in `[0, 1)`.
    pub volatility: f64,
    /// Probability in `[0, 1]` that a read fails transiently.
    pub transient_failure_rate: f64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        let universe = DEFAULT_UNIVERSE
            .iter()
            .filter_map(|(raw, cents)| {
                Symbol::parse(raw)
                    .ok()
                    .map(|symbol| (symbol, Decimal::new(*cents, 2)))
            })
            .collect();

        Self {
            universe,
            volatility: 0.001,
            transient_failure_rate: 0.0,
        }
    }
}

/// Random-walk price source.
#[derive(Debug)]
pub struct SimulatedPriceSource {
    settings: SourceSettings,
    ready: AtomicBool,
    open: Mutex<HashMap<Symbol, Decimal>>,
}

impl SimulatedPriceSource {
    /// Create a source over `settings.universe`.
    #[must_use]
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            settings,
            ready: AtomicBool::new(false),
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `symbol` is listed.
    #[must_use]
    pub fn is_listed(&self, symbol: &Symbol) -> bool {
        self.settings.universe.contains_key(symbol)
    }

    /// Symbols currently holding walk state, sorted.
    #[must_use]
    pub fn open_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.open.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    fn step(&self, price: Decimal) -> Decimal {
        let volatility = self.settings.volatility;
        if volatility <= 0.0 {
            return price;
        }

        let drift = rand::rng().random_range(-volatility..=volatility);
        let factor = Decimal::from_f64(1.0 + drift).unwrap_or(Decimal::ONE);
        (price * factor).round_dp(2).max(MIN_PRICE)
    }

    fn should_fail(&self) -> bool {
        let rate = self.settings.transient_failure_rate;
        rate > 0.0 && rand::rng().random_bool(rate.min(1.0))
    }
}

#[async_trait]
impl PriceSource for SimulatedPriceSource {
    async fn ensure_ready(&self) -> Result<(), SourceError> {
        if !self.ready.swap(true, Ordering::AcqRel) {
            tracing::info!(
                listed = self.settings.universe.len(),
                volatility = self.settings.volatility,
                transient_failure_rate = self.settings.transient_failure_rate,
                "Simulated price source ready"
            );
        }
        Ok(())
    }

    async fn fetch_price(&self, symbol: &Symbol) -> Result<PriceSample, FetchError> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(FetchError::Transient("price source not initialized".to_string()));
        }

        let Some(seed) = self.settings.universe.get(symbol).copied() else {
            tracing::debug!(symbol = %symbol, "Symbol not listed");
            return Err(FetchError::NotFound(symbol.clone()));
        };

        if self.should_fail() {
            return Err(FetchError::Transient(format!("simulated read failure for {symbol}")));
        }

        let price = {
            let mut open = self.open.lock();
            let current = open.entry(symbol.clone()).or_insert(seed);
            let observed = *current;
            *current = self.step(observed);
            observed
        };

        tracing::trace!(symbol = %symbol, price = %price, "Read simulated price");
        Ok(PriceSample::now(symbol.clone(), price))
    }

    async fn release_symbol(&self, symbol: &Symbol) -> Result<(), SourceError> {
        if self.open.lock().remove(symbol).is_some() {
            tracing::debug!(symbol = %symbol, "Released simulated symbol");
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        let released = {
            let mut open = self.open.lock();
            let count = open.len();
            open.clear();
            count
        };
        self.ready.store(false, Ordering::Release);
        tracing::info!(released, "Simulated price source closed");
        Ok(())
    }
}
