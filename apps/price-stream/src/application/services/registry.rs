//! Subscription Registry
//!
//! Maps each symbol to its subscribers, its single poller and its cached
//! last sample. Pollers are created when a symbol gains its first
//! subscriber and stopped when it loses its last one.
//!
//! # Locking
//!
//! - The symbol table lock is only held for map lookups and edits.
//! - Each symbol has its own state lock; subscribe, unsubscribe, poll
//!   results and removal for that symbol are serialized on it.
//! - The two are never held together, and no lock is held across a call
//!   into the price source.
//! - Poller start-up is guarded by a per-symbol `OnceCell`, so concurrent
//!   first subscribers share a single start-up fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use super::poller::{self, PollerHandle};
use crate::application::ports::{FetchError, PriceSource, SourceError};
use crate::domain::price::{PriceEvent, PriceSample, Symbol};
use crate::domain::subscription::{ActiveSymbolState, RegistryStats, Subscriber, SubscriberId};
use crate::infrastructure::metrics;

/// Reference poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

// =============================================================================
// Settings
// =============================================================================

/// Registry tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    /// Delay between polls of one symbol.
    pub poll_interval: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failure to register a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The price source could not be initialized.
    #[error("price source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),
    /// The symbol's poller could not be started.
    #[error("failed to start polling {symbol}: {cause}")]
    Startup {
        /// Symbol being subscribed.
        symbol: Symbol,
        /// Underlying fetch failure.
        #[source]
        cause: FetchError,
    },
    /// The registry has been shut down.
    #[error("price registry is shutting down")]
    ShuttingDown,
}

impl SubscriptionError {
    /// Whether the failure means the symbol does not exist upstream.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Startup {
                cause: FetchError::NotFound(_),
                ..
            }
        )
    }
}

// =============================================================================
// Symbol Entry
// =============================================================================

/// Per-symbol slot in the symbol table.
pub(super) struct SymbolEntry {
    symbol: Symbol,
    startup: OnceCell<Result<(), SubscriptionError>>,
    state: Mutex<ActiveSymbolState<PollerHandle>>,
    retired: AtomicBool,
}

impl SymbolEntry {
    fn new(symbol: Symbol) -> Self {
        Self {
            startup: OnceCell::new(),
            state: Mutex::new(ActiveSymbolState::new(symbol.clone())),
            retired: AtomicBool::new(false),
            symbol,
        }
    }

    pub(super) const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Whether the entry has been torn down. Retired entries never revive.
    pub(super) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Tear down while holding the state lock.
    ///
    /// Stops the poller and returns the subscribers that were attached.
    fn retire_locked(&self, state: &mut ActiveSymbolState<PollerHandle>) -> Vec<Subscriber> {
        self.retired.store(true, Ordering::Release);
        if let Some(poller) = state.take_poller() {
            poller.stop();
            metrics::record_poller_stopped();
        }
        state.subscribers_mut().drain()
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// State shared between the registry handle and its pollers.
pub(super) struct Shared {
    pub(super) source: Arc<dyn PriceSource>,
    settings: RegistrySettings,
    symbols: Mutex<HashMap<Symbol, Arc<SymbolEntry>>>,
    ready: OnceCell<()>,
    closed: AtomicBool,
    pollers_started: AtomicU64,
}

impl Shared {
    /// Live entry for `symbol`, creating one if needed.
    fn entry_for(&self, symbol: &Symbol) -> Arc<SymbolEntry> {
        let mut symbols = self.symbols.lock();
        if let Some(entry) = symbols.get(symbol)
            && !entry.is_retired()
        {
            return Arc::clone(entry);
        }

        let entry = Arc::new(SymbolEntry::new(symbol.clone()));
        symbols.insert(symbol.clone(), Arc::clone(&entry));
        entry
    }

    fn lookup(&self, symbol: &Symbol) -> Option<Arc<SymbolEntry>> {
        self.symbols.lock().get(symbol).cloned()
    }

    /// Remove `entry` from the table if it is still the current one.
    fn forget(&self, entry: &Arc<SymbolEntry>) {
        let mut symbols = self.symbols.lock();
        if symbols
            .get(entry.symbol())
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            symbols.remove(entry.symbol());
        }
    }

    /// Take every entry out of the table.
    pub(super) fn drain_entries(&self) -> Vec<Arc<SymbolEntry>> {
        self.symbols.lock().drain().map(|(_, entry)| entry).collect()
    }

    /// Take one entry out of the table.
    pub(super) fn take_entry(&self, symbol: &Symbol) -> Option<Arc<SymbolEntry>> {
        self.symbols.lock().remove(symbol)
    }

    /// Retire an entry that has already left the table.
    ///
    /// Returns the number of subscribers dropped.
    pub(super) fn discard(entry: &SymbolEntry) -> usize {
        let mut state = entry.state.lock();
        entry.retire_locked(&mut state).len()
    }

    /// Fetch one sample, recording latency and outcome.
    pub(super) async fn fetch(&self, symbol: &Symbol) -> Result<PriceSample, FetchError> {
        let started = Instant::now();
        let result = self.source.fetch_price(symbol).await;
        metrics::record_fetch(&result, started.elapsed());
        result
    }

    /// First fetch plus poller spawn for a newly created entry.
    async fn start_poller(self: &Arc<Self>, entry: &Arc<SymbolEntry>) -> Result<(), SubscriptionError> {
        let symbol = entry.symbol().clone();
        tracing::info!(symbol = %symbol, "Starting poller");

        let first = match self.fetch(&symbol).await {
            Ok(sample) => Some(sample),
            Err(cause) if cause.is_terminal() => {
                tracing::warn!(symbol = %symbol, "Symbol not found on start-up fetch");
                self.terminate(entry).await;
                return Err(SubscriptionError::Startup { symbol, cause });
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Start-up fetch failed, polling anyway");
                None
            }
        };

        let mut state = entry.state.lock();
        if entry.is_retired() {
            tracing::debug!(symbol = %symbol, "Symbol removed during start-up");
            return Ok(());
        }

        if let Some(sample) = first {
            state.record_sample(sample);
        }

        let handle = poller::spawn(
            Arc::downgrade(self),
            Arc::clone(entry),
            self.settings.poll_interval,
        );
        state.set_poller(handle);
        drop(state);

        self.pollers_started.fetch_add(1, Ordering::Relaxed);
        metrics::record_poller_started();
        Ok(())
    }

    /// Add a subscriber to a started entry.
    ///
    /// Hands the subscriber back if the entry was retired in the meantime.
    fn attach(&self, entry: &Arc<SymbolEntry>, subscriber: Subscriber) -> Result<(), Subscriber> {
        let mut state = entry.state.lock();
        if entry.is_retired() {
            return Err(subscriber);
        }

        let id = subscriber.id();
        let cached = state.last_sample().cloned();
        state.subscribers_mut().insert(subscriber.clone());
        let total = state.subscribers().len();

        tracing::info!(symbol = %entry.symbol(), subscriber = %id, total, "Added subscriber");

        if let Some(sample) = cached
            && let Err(e) = subscriber.deliver(PriceEvent::Price(sample))
        {
            tracing::warn!(
                symbol = %entry.symbol(),
                subscriber = %id,
                error = %e,
                "Initial delivery failed, dropping subscriber"
            );
            metrics::record_delivery_failures(1);
            state.subscribers_mut().remove(id);
            if state.subscribers().is_empty() {
                entry.retire_locked(&mut state);
                drop(state);
                self.forget(entry);
            }
        }

        Ok(())
    }

    /// Record and fan out a polled sample.
    pub(super) fn publish(&self, entry: &Arc<SymbolEntry>, sample: PriceSample) {
        let mut state = entry.state.lock();
        if entry.is_retired() {
            return;
        }

        state.record_sample(sample.clone());
        let recipients = state.subscribers().len();
        let failed = state
            .subscribers_mut()
            .deliver_all(&PriceEvent::Price(sample));

        tracing::debug!(
            symbol = %entry.symbol(),
            recipients,
            failed = failed.len(),
            "Broadcast price update"
        );
        metrics::record_events_delivered(recipients - failed.len());

        if failed.is_empty() {
            return;
        }

        metrics::record_delivery_failures(failed.len());
        for id in &failed {
            tracing::warn!(symbol = %entry.symbol(), subscriber = %id, "Delivery failed, dropping subscriber");
        }

        if state.subscribers().is_empty() {
            entry.retire_locked(&mut state);
            drop(state);
            self.forget(entry);
            tracing::info!(symbol = %entry.symbol(), "Stopped polling - no more subscribers");
        }
    }

    /// Terminal teardown after the source reported the symbol unresolvable.
    ///
    /// Stops the poller, drops the state, releases source resources and
    /// pushes the sentinel to every subscriber attached at that moment.
    pub(super) async fn terminate(&self, entry: &Arc<SymbolEntry>) {
        let subscribers = {
            let mut state = entry.state.lock();
            if entry.is_retired() {
                return;
            }
            entry.retire_locked(&mut state)
        };
        self.forget(entry);

        let symbol = entry.symbol();
        tracing::error!(symbol = %symbol, subscribers = subscribers.len(), "Symbol not found, stopping polling");

        if let Err(e) = self.source.release_symbol(symbol).await {
            tracing::warn!(symbol = %symbol, error = %e, "Failed to release source resources");
        }

        let event = PriceEvent::unresolvable(symbol.clone());
        for subscriber in subscribers {
            if let Err(e) = subscriber.deliver(event.clone()) {
                tracing::debug!(symbol = %symbol, subscriber = %subscriber.id(), error = %e, "Subscriber gone before terminal notice");
            }
        }
    }
}

// =============================================================================
// Price Registry
// =============================================================================

/// Process-scoped subscription registry.
///
/// Cloning is cheap; clones share the same symbol table.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use pluto_price_stream::{PriceRegistry, RegistrySettings, SimulatedPriceSource, SourceSettings};
///
/// let source = Arc::new(SimulatedPriceSource::new(SourceSettings::default()));
/// let registry = PriceRegistry::new(source, RegistrySettings::default());
/// assert!(registry.list_active_symbols().is_empty());
/// ```
#[derive(Clone)]
pub struct PriceRegistry {
    pub(super) shared: Arc<Shared>,
}

impl PriceRegistry {
    /// Create a registry reading from `source`.
    #[must_use]
    pub fn new(source: Arc<dyn PriceSource>, settings: RegistrySettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                settings,
                symbols: Mutex::new(HashMap::new()),
                ready: OnceCell::new(),
                closed: AtomicBool::new(false),
                pollers_started: AtomicU64::new(0),
            }),
        }
    }

    /// Registry settings.
    #[must_use]
    pub fn settings(&self) -> RegistrySettings {
        self.shared.settings
    }

    /// Initialize the price source once.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::SourceUnavailable` if initialization
    /// fails. A later call retries.
    pub async fn ensure_ready(&self) -> Result<(), SubscriptionError> {
        self.shared
            .ready
            .get_or_try_init(|| async {
                tracing::info!("Initializing price source");
                self.shared.source.ensure_ready().await?;
                tracing::info!("Price source initialized");
                Ok::<(), SourceError>(())
            })
            .await
            .map(|_| ())
            .map_err(SubscriptionError::SourceUnavailable)
    }

    /// Whether the price source has been initialized.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.ready.initialized()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Register a subscriber for its symbol.
    ///
    /// Starts the symbol's poller if this is its first subscriber, then
    /// replays the cached sample (if any) to the new subscriber.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError` if the source cannot be initialized or
    /// the poller's start-up fetch fails terminally.
    pub async fn subscribe(&self, subscriber: Subscriber) -> Result<(), SubscriptionError> {
        let symbol = subscriber.symbol().clone();
        tracing::debug!(symbol = %symbol, subscriber = %subscriber.id(), "Subscribing");

        self.ensure_ready().await?;

        let mut pending = subscriber;
        loop {
            if self.is_closed() {
                return Err(SubscriptionError::ShuttingDown);
            }

            let entry = self.shared.entry_for(&symbol);
            if let Err(e) = entry
                .startup
                .get_or_init(|| self.shared.start_poller(&entry))
                .await
            {
                tracing::error!(symbol = %symbol, error = %e, "Failed to subscribe");
                return Err(e.clone());
            }

            match self.shared.attach(&entry, pending) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    tracing::debug!(symbol = %symbol, "Symbol state retired during subscribe, retrying");
                    pending = returned;
                }
            }
        }
    }

    /// Remove a subscriber. Safe to call redundantly.
    ///
    /// Stops the poller and discards the symbol's state when the last
    /// subscriber leaves. Returns whether the subscriber was present.
    pub fn unsubscribe(&self, symbol: &Symbol, id: SubscriberId) -> bool {
        let Some(entry) = self.shared.lookup(symbol) else {
            tracing::debug!(symbol = %symbol, subscriber = %id, "Unsubscribe for inactive symbol");
            return false;
        };

        let emptied = {
            let mut state = entry.state.lock();
            if !state.subscribers_mut().remove(id) {
                tracing::debug!(symbol = %symbol, subscriber = %id, "Subscriber not found during unsubscribe");
                return false;
            }

            let remaining = state.subscribers().len();
            tracing::info!(symbol = %symbol, subscriber = %id, remaining, "Removed subscriber");

            if remaining == 0 {
                entry.retire_locked(&mut state);
                true
            } else {
                false
            }
        };

        if emptied {
            self.shared.forget(&entry);
            tracing::info!(symbol = %symbol, "Stopped polling - no more subscribers");
        }

        true
    }

    /// Symbols with at least one subscriber, sorted.
    #[must_use]
    pub fn list_active_symbols(&self) -> Vec<Symbol> {
        let entries: Vec<Arc<SymbolEntry>> = self.shared.symbols.lock().values().cloned().collect();

        let mut symbols: Vec<Symbol> = entries
            .iter()
            .filter(|entry| !entry.is_retired() && !entry.state.lock().subscribers().is_empty())
            .map(|entry| entry.symbol().clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Number of subscribers for a symbol.
    #[must_use]
    pub fn subscriber_count(&self, symbol: &Symbol) -> usize {
        self.shared
            .lookup(symbol)
            .filter(|entry| !entry.is_retired())
            .map_or(0, |entry| entry.state.lock().subscribers().len())
    }

    /// Registry-wide statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let entries: Vec<Arc<SymbolEntry>> = self.shared.symbols.lock().values().cloned().collect();

        let mut stats = RegistryStats {
            pollers_started: self.shared.pollers_started.load(Ordering::Relaxed),
            ..RegistryStats::default()
        };

        for entry in entries.iter().filter(|e| !e.is_retired()) {
            let state = entry.state.lock();
            let subscribers = state.subscribers().len();
            if subscribers > 0 {
                stats.active_symbols += 1;
                stats.subscribers += subscribers;
            }
            if state.has_poller() {
                stats.pollers_running += 1;
            }
        }

        stats
    }

    /// Stop every poller, drop all state and release the source.
    ///
    /// Subsequent subscribes fail with `SubscriptionError::ShuttingDown`.
    /// Calling this more than once is a no-op.
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let entries = self.shared.drain_entries();
        tracing::info!(symbols = entries.len(), "Shutting down price registry");

        for entry in entries {
            Shared::discard(&entry);
            if let Err(e) = self.shared.source.release_symbol(entry.symbol()).await {
                tracing::warn!(symbol = %entry.symbol(), error = %e, "Failed to release source resources");
            }
        }

        if let Err(e) = self.shared.source.close().await {
            tracing::warn!(error = %e, "Failed to close price source");
        }

        tracing::info!("Price registry shutdown complete");
    }
}

impl std::fmt::Debug for PriceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceRegistry")
            .field("settings", &self.shared.settings)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::testing::{RecordingSink, ScriptedSource, symbol};
    use rust_decimal::Decimal;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn registry(source: &Arc<ScriptedSource>) -> PriceRegistry {
        PriceRegistry::new(
            Arc::clone(source) as Arc<dyn PriceSource>,
            RegistrySettings {
                poll_interval: INTERVAL,
            },
        )
    }

    fn subscriber(sym: &str) -> (Subscriber, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (Subscriber::new(symbol(sym), sink.clone()), sink)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_subscribes_start_one_poller() {
        let source = Arc::new(ScriptedSource::new());
        source.script("BTCUSD", [Ok(Decimal::new(5_000_000, 2))]);
        let registry = registry(&source);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let (sub, _sink) = subscriber("BTCUSD");
                registry.subscribe(sub).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stats = registry.stats();
        assert_eq!(stats.pollers_started, 1);
        assert_eq!(stats.pollers_running, 1);
        assert_eq!(stats.subscribers, 8);
        assert_eq!(source.fetch_count("BTCUSD"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn source_is_initialized_once() {
        let source = Arc::new(ScriptedSource::new());
        source.script("BTCUSD", [Ok(Decimal::ONE)]);
        source.script("ETHUSD", [Ok(Decimal::TWO)]);
        let registry = registry(&source);

        assert!(!registry.is_ready());
        registry.subscribe(subscriber("BTCUSD").0).await.unwrap();
        registry.subscribe(subscriber("ETHUSD").0).await.unwrap();

        assert!(registry.is_ready());
        assert_eq!(source.ready_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initialization_fails_subscribe() {
        let source = Arc::new(ScriptedSource::new());
        source.fail_ready(true);
        let registry = registry(&source);

        let err = registry.subscribe(subscriber("BTCUSD").0).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::SourceUnavailable(_)));
        assert!(!err.is_not_found());
        assert!(registry.list_active_symbols().is_empty());

        source.fail_ready(false);
        registry.subscribe(subscriber("BTCUSD").0).await.unwrap_err();
        assert_eq!(source.ready_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn late_subscriber_receives_cached_sample_first() {
        let source = Arc::new(ScriptedSource::new());
        source.script(
            "BTCUSD",
            [Ok(Decimal::new(5_000_000, 2)), Ok(Decimal::new(5_012_550, 2))],
        );
        let registry = registry(&source);

        let (first, _) = subscriber("BTCUSD");
        registry.subscribe(first).await.unwrap();

        let (late, late_sink) = subscriber("BTCUSD");
        registry.subscribe(late).await.unwrap();
        assert_eq!(late_sink.prices(), vec![Decimal::new(5_000_000, 2)]);

        tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;
        assert_eq!(
            late_sink.prices(),
            vec![Decimal::new(5_000_000, 2), Decimal::new(5_012_550, 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn polled_samples_reach_every_subscriber() {
        let source = Arc::new(ScriptedSource::new());
        source.script("ETHUSD", [Ok(Decimal::new(300_000, 2)), Ok(Decimal::new(300_100, 2))]);
        let registry = registry(&source);

        let (a, sink_a) = subscriber("ETHUSD");
        let (b, sink_b) = subscriber("ETHUSD");
        registry.subscribe(a).await.unwrap();
        registry.subscribe(b).await.unwrap();

        tokio::time::sleep(INTERVAL * 3 + Duration::from_millis(10)).await;

        assert!(sink_a.prices().len() >= 3);
        assert_eq!(sink_a.prices().last(), Some(&Decimal::new(300_100, 2)));
        assert_eq!(sink_b.prices().last(), Some(&Decimal::new(300_100, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn last_unsubscribe_stops_poller() {
        let source = Arc::new(ScriptedSource::new());
        source.script("BTCUSD", [Ok(Decimal::ONE)]);
        let registry = registry(&source);

        let (a, _) = subscriber("BTCUSD");
        let (b, _) = subscriber("BTCUSD");
        let (a_id, b_id) = (a.id(), b.id());
        registry.subscribe(a).await.unwrap();
        registry.subscribe(b).await.unwrap();

        assert!(registry.unsubscribe(&symbol("BTCUSD"), a_id));
        assert_eq!(registry.list_active_symbols(), vec![symbol("BTCUSD")]);

        assert!(registry.unsubscribe(&symbol("BTCUSD"), b_id));
        assert!(registry.list_active_symbols().is_empty());
        assert_eq!(registry.stats().pollers_running, 0);

        let fetches = source.fetch_count("BTCUSD");
        tokio::time::sleep(INTERVAL * 10).await;
        assert_eq!(source.fetch_count("BTCUSD"), fetches);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_is_idempotent() {
        let source = Arc::new(ScriptedSource::new());
        source.script("BTCUSD", [Ok(Decimal::ONE)]);
        let registry = registry(&source);

        let (sub, _) = subscriber("BTCUSD");
        let id = sub.id();
        registry.subscribe(sub).await.unwrap();

        assert!(registry.unsubscribe(&symbol("BTCUSD"), id));
        assert!(!registry.unsubscribe(&symbol("BTCUSD"), id));
        assert!(!registry.unsubscribe(&symbol("NOPE1"), id));
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_starts_fresh_poller() {
        let source = Arc::new(ScriptedSource::new());
        source.script("BTCUSD", [Ok(Decimal::ONE)]);
        let registry = registry(&source);

        let (sub, _) = subscriber("BTCUSD");
        let id = sub.id();
        registry.subscribe(sub).await.unwrap();
        registry.unsubscribe(&symbol("BTCUSD"), id);

        registry.subscribe(subscriber("BTCUSD").0).await.unwrap();

        assert_eq!(registry.stats().pollers_started, 2);
        assert_eq!(registry.stats().pollers_running, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_on_startup_fails_subscribe() {
        let source = Arc::new(ScriptedSource::new());
        let registry = registry(&source);

        let err = registry.subscribe(subscriber("FAKE999").0).await.unwrap_err();

        assert!(err.is_not_found());
        assert!(registry.list_active_symbols().is_empty());
        assert_eq!(registry.stats().pollers_started, 0);
        assert_eq!(source.released(), vec![symbol("FAKE999")]);

        tokio::time::sleep(INTERVAL * 5).await;
        assert_eq!(source.fetch_count("FAKE999"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_startup_failure_still_polls() {
        let source = Arc::new(ScriptedSource::new());
        source.script(
            "BTCUSD",
            [
                Err(FetchError::Transient("page loading".to_string())),
                Ok(Decimal::new(4_200_000, 2)),
            ],
        );
        let registry = registry(&source);

        let (sub, sink) = subscriber("BTCUSD");
        registry.subscribe(sub).await.unwrap();
        assert!(sink.events().is_empty());

        tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;
        assert_eq!(sink.prices(), vec![Decimal::new(4_200_000, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_not_broadcast() {
        let source = Arc::new(ScriptedSource::new());
        source.script(
            "BTCUSD",
            [
                Ok(Decimal::ONE),
                Err(FetchError::Transient("timeout".to_string())),
                Err(FetchError::Transient("timeout".to_string())),
                Ok(Decimal::TWO),
            ],
        );
        let registry = registry(&source);

        let (sub, sink) = subscriber("BTCUSD");
        registry.subscribe(sub).await.unwrap();

        tokio::time::sleep(INTERVAL * 3 + Duration::from_millis(10)).await;

        assert_eq!(sink.prices()[..2], [Decimal::ONE, Decimal::TWO]);
        assert_eq!(registry.stats().pollers_running, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_broadcasts_sentinel_once_and_tears_down() {
        let source = Arc::new(ScriptedSource::new());
        source.script(
            "BTCUSD",
            [
                Ok(Decimal::ONE),
                Err(FetchError::NotFound(symbol("BTCUSD"))),
            ],
        );
        let registry = registry(&source);

        let (a, sink_a) = subscriber("BTCUSD");
        let (b, sink_b) = subscriber("BTCUSD");
        registry.subscribe(a).await.unwrap();
        registry.subscribe(b).await.unwrap();

        tokio::time::sleep(INTERVAL * 5).await;

        for sink in [&sink_a, &sink_b] {
            let events = sink.events();
            let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
            assert_eq!(terminal.len(), 1);
            assert!(terminal[0].sample().is_sentinel());
            assert!(events.last().unwrap().is_terminal());
        }

        assert!(registry.list_active_symbols().is_empty());
        assert_eq!(source.released(), vec![symbol("BTCUSD")]);
        assert_eq!(source.fetch_count("BTCUSD"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_subscriber_is_dropped_without_affecting_others() {
        let source = Arc::new(ScriptedSource::new());
        source.script("BTCUSD", [Ok(Decimal::ONE), Ok(Decimal::TWO)]);
        let registry = registry(&source);

        let (good, good_sink) = subscriber("BTCUSD");
        let (bad, bad_sink) = subscriber("BTCUSD");
        registry.subscribe(good).await.unwrap();
        registry.subscribe(bad).await.unwrap();
        assert_eq!(registry.subscriber_count(&symbol("BTCUSD")), 2);

        bad_sink.close();
        tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;

        assert_eq!(registry.subscriber_count(&symbol("BTCUSD")), 1);
        assert_eq!(good_sink.prices(), vec![Decimal::ONE, Decimal::TWO]);
        assert_eq!(registry.stats().pollers_running, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_delivery_drops_subscriber_and_poller() {
        let source = Arc::new(ScriptedSource::new());
        source.script("BTCUSD", [Ok(Decimal::ONE)]);
        let registry = registry(&source);

        let (sub, sink) = subscriber("BTCUSD");
        sink.close();

        registry.subscribe(sub).await.unwrap();

        assert_eq!(registry.subscriber_count(&symbol("BTCUSD")), 0);
        assert!(registry.list_active_symbols().is_empty());
        assert_eq!(registry.stats().pollers_running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn active_symbols_are_sorted() {
        let source = Arc::new(ScriptedSource::new());
        for sym in ["SOLUSD", "AAPL", "ETHUSD"] {
            source.script(sym, [Ok(Decimal::ONE)]);
        }
        let registry = registry(&source);

        for sym in ["SOLUSD", "AAPL", "ETHUSD"] {
            registry.subscribe(subscriber(sym).0).await.unwrap();
        }

        assert_eq!(
            registry.list_active_symbols(),
            vec![symbol("AAPL"), symbol("ETHUSD"), symbol("SOLUSD")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let source = Arc::new(ScriptedSource::new());
        source.script("BTCUSD", [Ok(Decimal::ONE)]);
        source.script("ETHUSD", [Ok(Decimal::ONE)]);
        let registry = registry(&source);

        registry.subscribe(subscriber("BTCUSD").0).await.unwrap();
        registry.subscribe(subscriber("ETHUSD").0).await.unwrap();

        registry.shutdown().await;
        registry.shutdown().await;

        assert!(registry.is_closed());
        assert!(registry.list_active_symbols().is_empty());
        assert_eq!(source.close_calls(), 1);
        let mut released = source.released();
        released.sort();
        assert_eq!(released, vec![symbol("BTCUSD"), symbol("ETHUSD")]);

        let fetches = source.fetch_count("BTCUSD");
        tokio::time::sleep(INTERVAL * 10).await;
        assert_eq!(source.fetch_count("BTCUSD"), fetches);

        let err = registry.subscribe(subscriber("BTCUSD").0).await.unwrap_err();
        assert_eq!(err, SubscriptionError::ShuttingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_start_up_does_not_block_other_symbols() {
        let source = Arc::new(ScriptedSource::new());
        source.script("SLOW", [Ok(Decimal::ONE)]);
        source.script("FAST", [Ok(Decimal::TWO)]);
        source.delay("SLOW", Duration::from_secs(60));
        let registry = registry(&source);

        let slow = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.subscribe(subscriber("SLOW").0).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.fetch_count("SLOW"), 1);

        let (fast, fast_sink) = subscriber("FAST");
        let fast_id = fast.id();
        tokio::time::timeout(Duration::from_secs(1), registry.subscribe(fast))
            .await
            .expect("subscribe blocked by another symbol's fetch")
            .unwrap();
        assert_eq!(fast_sink.prices(), vec![Decimal::TWO]);

        assert!(registry.unsubscribe(&symbol("FAST"), fast_id));
        assert!(!slow.is_finished());

        slow.await.unwrap().unwrap();
        assert_eq!(registry.subscriber_count(&symbol("SLOW")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_during_in_flight_fetch_discards_result() {
        let source = Arc::new(ScriptedSource::new());
        source.script("BTCUSD", [Ok(Decimal::ONE), Ok(Decimal::TWO)]);
        let registry = registry(&source);

        let (sub, sink) = subscriber("BTCUSD");
        let id = sub.id();
        registry.subscribe(sub).await.unwrap();
        assert_eq!(sink.events().len(), 1);

        source.delay("BTCUSD", Duration::from_secs(10));
        tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;
        assert_eq!(source.fetch_count("BTCUSD"), 2);

        assert!(registry.unsubscribe(&symbol("BTCUSD"), id));
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(sink.events().len(), 1);
        assert_eq!(source.fetch_count("BTCUSD"), 2);
        assert_eq!(registry.stats().pollers_running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn removal_during_in_flight_fetch_discards_result() {
        let source = Arc::new(ScriptedSource::new());
        source.script("ETHUSD", [Ok(Decimal::ONE), Ok(Decimal::TWO)]);
        let registry = registry(&source);

        let (sub, sink) = subscriber("ETHUSD");
        registry.subscribe(sub).await.unwrap();

        source.delay("ETHUSD", Duration::from_secs(10));
        tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;
        assert_eq!(source.fetch_count("ETHUSD"), 2);

        registry.remove_symbol(&symbol("ETHUSD")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(sink.prices(), vec![Decimal::ONE]);
        assert_eq!(registry.subscriber_count(&symbol("ETHUSD")), 0);
        assert!(registry.list_active_symbols().is_empty());
    }
}
