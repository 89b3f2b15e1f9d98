//! Streaming Session
//!
//! Turns a registry subscription into a pull-based sequence of items for
//! one consumer. Each pull waits up to the idle timeout; when nothing
//! arrives in time a heartbeat carrying the sentinel price is produced so
//! the consumer's connection never sits silent.
//!
//! A session ends when the symbol becomes unresolvable, when it is closed
//! explicitly, or when it is dropped. Ending always unsubscribes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;

use super::registry::{PriceRegistry, SubscriptionError};
use super::rendezvous::{Rendezvous, Take};
use crate::domain::price::{PriceEvent, PriceSample, Symbol};
use crate::domain::subscription::{DeliveryError, SampleSink, Subscriber, SubscriberId};
use crate::infrastructure::metrics;

/// Reference idle timeout before a heartbeat is produced.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// One item yielded by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// A real price sample.
    Price(PriceSample),
    /// Idle keep-alive carrying the sentinel price.
    Heartbeat(PriceSample),
}

impl StreamItem {
    /// The sample carried by this item.
    #[must_use]
    pub const fn sample(&self) -> &PriceSample {
        match self {
            Self::Price(sample) | Self::Heartbeat(sample) => sample,
        }
    }

    /// Whether this is a heartbeat.
    #[must_use]
    pub const fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat(_))
    }
}

/// Failure to open a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The symbol does not exist upstream.
    #[error("Ticker {0} not found")]
    NotFound(Symbol),
    /// Anything else.
    #[error("Failed to subscribe to {symbol}: {reason}")]
    Internal {
        /// Symbol being opened.
        symbol: Symbol,
        /// Underlying cause.
        reason: String,
    },
}

impl SessionError {
    fn from_subscription(symbol: Symbol, error: &SubscriptionError) -> Self {
        if error.is_not_found() {
            Self::NotFound(symbol)
        } else {
            Self::Internal {
                symbol,
                reason: error.to_string(),
            }
        }
    }
}

/// Events a session buffers for a reader that is not keeping up.
pub const MAILBOX_CAPACITY: usize = 256;

/// Sink side of a session.
#[derive(Debug)]
struct Mailbox {
    symbol: Symbol,
    events: Rendezvous<PriceEvent>,
}

impl Mailbox {
    fn new(symbol: Symbol, capacity: usize) -> Self {
        Self {
            symbol,
            events: Rendezvous::with_capacity(capacity),
        }
    }
}

impl SampleSink for Mailbox {
    fn deliver(&self, event: PriceEvent) -> Result<(), DeliveryError> {
        match self.events.offer(event) {
            Ok(None) => Ok(()),
            Ok(Some(_)) => {
                tracing::debug!(symbol = %self.symbol, "Session mailbox full, dropped oldest event");
                metrics::record_events_dropped(1);
                Ok(())
            }
            Err(_) => Err(DeliveryError::Closed),
        }
    }
}

/// A live subscription consumed one item at a time.
pub struct StreamSession {
    symbol: Symbol,
    subscriber_id: SubscriberId,
    registry: PriceRegistry,
    mailbox: Arc<Mailbox>,
    idle_timeout: Duration,
    active: AtomicBool,
}

impl StreamSession {
    /// Subscribe to `symbol` and open a session.
    ///
    /// If the symbol already has a cached sample it is the first item
    /// yielded.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for unresolvable symbols and
    /// `SessionError::Internal` for any other subscription failure.
    pub async fn open(
        registry: &PriceRegistry,
        symbol: Symbol,
        idle_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let mailbox = Arc::new(Mailbox::new(symbol.clone(), MAILBOX_CAPACITY));
        let subscriber = Subscriber::new(symbol.clone(), Arc::clone(&mailbox) as Arc<dyn SampleSink>);
        let subscriber_id = subscriber.id();

        if let Err(e) = registry.subscribe(subscriber).await {
            mailbox.events.close();
            return Err(SessionError::from_subscription(symbol, &e));
        }

        tracing::info!(symbol = %symbol, subscriber = %subscriber_id, "Session opened");
        metrics::record_session_opened();

        Ok(Self {
            symbol,
            subscriber_id,
            registry: registry.clone(),
            mailbox,
            idle_timeout,
            active: AtomicBool::new(true),
        })
    }

    /// Symbol this session streams.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Registry identity of this session's subscriber.
    #[must_use]
    pub const fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    /// Whether the session can still yield items.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once the session has ended. Events delivered while
    /// no pull was pending are yielded in arrival order.
    pub async fn next_item(&mut self) -> Option<StreamItem> {
        if !self.is_active() {
            return None;
        }

        match self.mailbox.events.take(self.idle_timeout).await {
            Take::Item(PriceEvent::Price(sample)) => Some(StreamItem::Price(sample)),
            Take::Item(PriceEvent::Unresolvable(_)) => {
                tracing::info!(symbol = %self.symbol, subscriber = %self.subscriber_id, "Symbol unresolvable, ending session");
                self.close();
                None
            }
            Take::TimedOut => {
                tracing::trace!(symbol = %self.symbol, "Idle timeout, emitting heartbeat");
                metrics::record_heartbeat();
                Some(StreamItem::Heartbeat(PriceSample::sentinel(self.symbol.clone())))
            }
            Take::Closed => {
                self.close();
                None
            }
        }
    }

    /// End the session and unsubscribe. Idempotent.
    pub fn close(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        self.mailbox.events.close();
        self.registry.unsubscribe(&self.symbol, self.subscriber_id);
        metrics::record_session_closed();
        tracing::info!(symbol = %self.symbol, subscriber = %self.subscriber_id, "Session closed");
    }

    /// Consume the session as a stream of items.
    ///
    /// Dropping the stream closes the session.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, StreamItem> {
        futures::stream::unfold(self, |mut session| async move {
            let item = session.next_item().await?;
            Some((item, session))
        })
        .boxed()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("symbol", &self.symbol)
            .field("subscriber_id", &self.subscriber_id)
            .field("idle_timeout", &self.idle_timeout)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{FetchError, PriceSource};
    use crate::application::services::RegistrySettings;
    use crate::application::services::testing::{ScriptedSource, symbol};
    use rust_decimal::Decimal;

    const INTERVAL: Duration = Duration::from_secs(2);
    const IDLE: Duration = Duration::from_secs(5);

    fn registry(source: &Arc<ScriptedSource>) -> PriceRegistry {
        PriceRegistry::new(
            Arc::clone(source) as Arc<dyn PriceSource>,
            RegistrySettings {
                poll_interval: INTERVAL,
            },
        )
    }

    fn price(item: Option<StreamItem>) -> Decimal {
        match item {
            Some(StreamItem::Price(sample)) => sample.price,
            other => panic!("expected price, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn yields_cached_then_polled_prices() {
        let source = Arc::new(ScriptedSource::new());
        source.script(
            "BTCUSD",
            [Ok(Decimal::new(5_000_000, 2)), Ok(Decimal::new(5_012_550, 2))],
        );
        let registry = registry(&source);

        let mut session = StreamSession::open(&registry, symbol("BTCUSD"), IDLE).await.unwrap();

        assert_eq!(price(session.next_item().await), Decimal::new(5_000_000, 2));
        assert_eq!(price(session.next_item().await), Decimal::new(5_012_550, 2));

        session.close();
        assert!(registry.list_active_symbols().is_empty());

        let fetches = source.fetch_count("BTCUSD");
        tokio::time::sleep(INTERVAL * 5).await;
        assert_eq!(source.fetch_count("BTCUSD"), fetches);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_yields_heartbeat_and_stays_open() {
        let source = Arc::new(ScriptedSource::new());
        source.script(
            "BTCUSD",
            [Err(FetchError::Transient("page loading".to_string()))],
        );
        let registry = registry(&source);

        let mut session = StreamSession::open(&registry, symbol("BTCUSD"), IDLE).await.unwrap();

        let item = session.next_item().await.unwrap();
        assert!(item.is_heartbeat());
        assert!(item.sample().is_sentinel());
        assert_eq!(item.sample().symbol, symbol("BTCUSD"));

        assert!(session.is_active());
        assert!(session.next_item().await.unwrap().is_heartbeat());
        assert_eq!(registry.subscriber_count(&symbol("BTCUSD")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_symbol_ends_session() {
        let source = Arc::new(ScriptedSource::new());
        source.script(
            "BTCUSD",
            [Ok(Decimal::ONE), Err(FetchError::NotFound(symbol("BTCUSD")))],
        );
        let registry = registry(&source);

        let mut session = StreamSession::open(&registry, symbol("BTCUSD"), IDLE).await.unwrap();

        assert_eq!(price(session.next_item().await), Decimal::ONE);
        assert_eq!(session.next_item().await, None);
        assert!(!session.is_active());
        assert_eq!(session.next_item().await, None);
        assert!(registry.list_active_symbols().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn open_maps_not_found() {
        let source = Arc::new(ScriptedSource::new());
        let registry = registry(&source);

        let err = StreamSession::open(&registry, symbol("FAKE999"), IDLE).await.unwrap_err();

        assert_eq!(err, SessionError::NotFound(symbol("FAKE999")));
        assert_eq!(err.to_string(), "Ticker FAKE999 not found");
    }

    #[tokio::test(start_paused = true)]
    async fn open_maps_other_failures_to_internal() {
        let source = Arc::new(ScriptedSource::new());
        source.fail_ready(true);
        let registry = registry(&source);

        let err = StreamSession::open(&registry, symbol("BTCUSD"), IDLE).await.unwrap_err();

        assert!(matches!(err, SessionError::Internal { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_session_unsubscribes() {
        let source = Arc::new(ScriptedSource::new());
        source.script("ETHUSD", [Ok(Decimal::ONE)]);
        let registry = registry(&source);

        let first = StreamSession::open(&registry, symbol("ETHUSD"), IDLE).await.unwrap();
        let second = StreamSession::open(&registry, symbol("ETHUSD"), IDLE).await.unwrap();
        assert_eq!(registry.subscriber_count(&symbol("ETHUSD")), 2);

        drop(first);
        assert_eq!(registry.subscriber_count(&symbol("ETHUSD")), 1);

        second.close();
        second.close();
        drop(second);
        assert_eq!(registry.subscriber_count(&symbol("ETHUSD")), 0);
        assert_eq!(registry.stats().pollers_running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_adapter_yields_items_until_terminal() {
        let source = Arc::new(ScriptedSource::new());
        source.script(
            "SOLUSD",
            [
                Ok(Decimal::new(15_000, 2)),
                Ok(Decimal::new(15_100, 2)),
                Err(FetchError::NotFound(symbol("SOLUSD"))),
            ],
        );
        let registry = registry(&source);

        let session = StreamSession::open(&registry, symbol("SOLUSD"), IDLE).await.unwrap();
        let items: Vec<StreamItem> = session.into_stream().collect().await;

        let prices: Vec<Decimal> = items.iter().map(|item| item.sample().price).collect();
        assert_eq!(prices, vec![Decimal::new(15_000, 2), Decimal::new(15_100, 2)]);
        assert!(registry.list_active_symbols().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_mailbox_drops_oldest_prices() {
        let mailbox = Mailbox::new(symbol("BTCUSD"), 2);
        for cents in [100, 200, 300] {
            let sample = PriceSample::now(symbol("BTCUSD"), Decimal::new(cents, 2));
            mailbox.deliver(PriceEvent::Price(sample)).unwrap();
        }

        for expected in [200, 300] {
            match mailbox.events.take(IDLE).await {
                Take::Item(PriceEvent::Price(sample)) => {
                    assert_eq!(sample.price, Decimal::new(expected, 2));
                }
                other => panic!("expected price, got {other:?}"),
            }
        }

        mailbox.events.close();
        let sample = PriceSample::now(symbol("BTCUSD"), Decimal::ONE);
        assert_eq!(
            mailbox.deliver(PriceEvent::Price(sample)),
            Err(DeliveryError::Closed)
        );
    }
}
