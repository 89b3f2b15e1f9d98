//! Test doubles shared by the service tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::application::ports::{FetchError, PriceSource, SourceError};
use crate::domain::price::{PriceEvent, PriceSample, Symbol};
use crate::domain::subscription::{DeliveryError, SampleSink};

pub fn symbol(raw: &str) -> Symbol {
    Symbol::parse(raw).unwrap()
}

/// Price source that replays scripted responses per symbol.
///
/// Responses are consumed in order; the last one repeats forever.
/// Unscripted symbols resolve to `FetchError::NotFound`.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<Symbol, VecDeque<Result<Decimal, FetchError>>>>,
    fetches: Mutex<HashMap<Symbol, usize>>,
    delays: Mutex<HashMap<Symbol, Duration>>,
    released: Mutex<Vec<Symbol>>,
    ready_calls: AtomicUsize,
    close_calls: AtomicUsize,
    fail_ready: AtomicBool,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script<I>(&self, raw: &str, responses: I)
    where
        I: IntoIterator<Item = Result<Decimal, FetchError>>,
    {
        self.scripts
            .lock()
            .insert(symbol(raw), responses.into_iter().collect());
    }

    /// Make every later fetch of `raw` take `delay` before answering.
    pub fn delay(&self, raw: &str, delay: Duration) {
        self.delays.lock().insert(symbol(raw), delay);
    }

    pub fn fail_ready(&self, fail: bool) {
        self.fail_ready.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self, raw: &str) -> usize {
        self.fetches.lock().get(&symbol(raw)).copied().unwrap_or(0)
    }

    pub fn released(&self) -> Vec<Symbol> {
        self.released.lock().clone()
    }

    pub fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    async fn ensure_ready(&self) -> Result<(), SourceError> {
        self.ready_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ready.load(Ordering::SeqCst) {
            return Err(SourceError::Init("browser failed to launch".to_string()));
        }
        Ok(())
    }

    async fn fetch_price(&self, symbol: &Symbol) -> Result<PriceSample, FetchError> {
        *self.fetches.lock().entry(symbol.clone()).or_default() += 1;

        let delay = self.delays.lock().get(symbol).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(symbol) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match response {
            Some(Ok(price)) => Ok(PriceSample::now(symbol.clone(), price)),
            Some(Err(e)) => Err(e),
            None => Err(FetchError::NotFound(symbol.clone())),
        }
    }

    async fn release_symbol(&self, symbol: &Symbol) -> Result<(), SourceError> {
        self.released.lock().push(symbol.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that records every event until closed.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PriceEvent>>,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<PriceEvent> {
        self.events.lock().clone()
    }

    /// Prices of the non-terminal events received so far.
    pub fn prices(&self) -> Vec<Decimal> {
        self.events
            .lock()
            .iter()
            .filter(|e| !e.is_terminal())
            .map(|e| e.sample().price)
            .collect()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl SampleSink for RecordingSink {
    fn deliver(&self, event: PriceEvent) -> Result<(), DeliveryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeliveryError::Closed);
        }
        self.events.lock().push(event);
        Ok(())
    }
}
