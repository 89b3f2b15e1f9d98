//! Subscription Types
//!
//! Domain types for tracking who is listening to which symbol.
//!
//! # Design
//!
//! Each active symbol owns one [`ActiveSymbolState`]:
//! - the set of subscribers currently receiving its samples
//! - a handle to the one poller feeding it (if any)
//! - the last sample seen, replayed to late joiners
//!
//! Many subscribers share a symbol while the symbol keeps exactly one
//! upstream poller. The poller handle type is generic so that this layer
//! stays free of runtime types.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::price::{PriceEvent, PriceSample, Symbol};

// =============================================================================
// Subscriber
// =============================================================================

/// Opaque identity of a subscriber, used for set membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().as_u64_pair().0)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Error returned by a sink that can no longer accept events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The receiving side has gone away.
    #[error("subscriber is closed")]
    Closed,
}

/// Receiving end of a subscription.
///
/// Sinks are invoked while the symbol's state is locked; they must not
/// block and must not call back into the registry.
pub trait SampleSink: Send + Sync {
    /// Hand an event to the subscriber.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` if the subscriber can no longer receive.
    fn deliver(&self, event: PriceEvent) -> Result<(), DeliveryError>;
}

/// A registered listener for one symbol.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    symbol: Symbol,
    sink: Arc<dyn SampleSink>,
}

impl Subscriber {
    /// Create a subscriber with a fresh identity.
    #[must_use]
    pub fn new(symbol: Symbol, sink: Arc<dyn SampleSink>) -> Self {
        Self {
            id: SubscriberId::new(),
            symbol,
            sink,
        }
    }

    /// Subscriber identity.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Symbol this subscriber listens to.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Deliver an event through the subscriber's sink.
    ///
    /// # Errors
    ///
    /// Propagates the sink's `DeliveryError`.
    pub fn deliver(&self, event: PriceEvent) -> Result<(), DeliveryError> {
        self.sink.deliver(event)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("symbol", &self.symbol)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Subscriber Set
// =============================================================================

/// Unordered set of subscribers keyed by identity.
#[derive(Debug, Default)]
pub struct SubscriberSet {
    members: HashMap<SubscriberId, Subscriber>,
}

impl SubscriberSet {
    /// Add a subscriber. Returns `false` if it was already present.
    pub fn insert(&mut self, subscriber: Subscriber) -> bool {
        self.members.insert(subscriber.id(), subscriber).is_none()
    }

    /// Remove a subscriber. Returns `false` if it was not present.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        self.members.remove(&id).is_some()
    }

    /// Whether the subscriber is present.
    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.members.contains_key(&id)
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Remove and return every subscriber.
    pub fn drain(&mut self) -> Vec<Subscriber> {
        self.members.drain().map(|(_, s)| s).collect()
    }

    /// Deliver an event to every subscriber.
    ///
    /// Subscribers whose delivery fails are removed and their ids returned.
    pub fn deliver_all(&mut self, event: &PriceEvent) -> Vec<SubscriberId> {
        let failed: Vec<SubscriberId> = self
            .members
            .values()
            .filter(|s| s.deliver(event.clone()).is_err())
            .map(Subscriber::id)
            .collect();

        for id in &failed {
            self.members.remove(id);
        }

        failed
    }
}

// =============================================================================
// Active Symbol State
// =============================================================================

/// Everything tracked for one symbol with live interest.
#[derive(Debug)]
pub struct ActiveSymbolState<P> {
    symbol: Symbol,
    subscribers: SubscriberSet,
    poller: Option<P>,
    last_sample: Option<PriceSample>,
}

impl<P> ActiveSymbolState<P> {
    /// Create empty state for a symbol.
    #[must_use]
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            subscribers: SubscriberSet::default(),
            poller: None,
            last_sample: None,
        }
    }

    /// The symbol.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Subscribers of this symbol.
    #[must_use]
    pub const fn subscribers(&self) -> &SubscriberSet {
        &self.subscribers
    }

    /// Mutable access to the subscribers.
    pub const fn subscribers_mut(&mut self) -> &mut SubscriberSet {
        &mut self.subscribers
    }

    /// The last recorded sample.
    #[must_use]
    pub const fn last_sample(&self) -> Option<&PriceSample> {
        self.last_sample.as_ref()
    }

    /// Replace the cached sample. The cache never reverts to empty.
    pub fn record_sample(&mut self, sample: PriceSample) {
        self.last_sample = Some(sample);
    }

    /// Whether a poller is attached.
    #[must_use]
    pub const fn has_poller(&self) -> bool {
        self.poller.is_some()
    }

    /// Attach the poller feeding this symbol.
    pub fn set_poller(&mut self, poller: P) {
        self.poller = Some(poller);
    }

    /// Detach and return the poller.
    pub const fn take_poller(&mut self) -> Option<P> {
        self.poller.take()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry-wide statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Symbols with at least one subscriber.
    pub active_symbols: usize,
    /// Total subscribers across all symbols.
    pub subscribers: usize,
    /// Pollers started since the registry was created.
    pub pollers_started: u64,
    /// Pollers currently running.
    pub pollers_running: usize,
}

// =============================================================================
// Tests
// =============================================================================
