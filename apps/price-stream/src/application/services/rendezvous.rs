//! Push-to-pull handoff between the registry and one reader.
//!
//! The registry pushes events synchronously while holding a symbol lock;
//! the session pulls them asynchronously with an idle timeout. A parked
//! reader is handed the next event directly. Otherwise events queue in
//! arrival order until the reader comes back. The queue is bounded; once a
//! reader falls that far behind, the oldest queued item is evicted.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Default bound on queued items.
pub const DEFAULT_CAPACITY: usize = 256;

/// Result of a [`Rendezvous::take`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Take<T> {
    /// An item arrived in time.
    Item(T),
    /// Nothing arrived within the timeout.
    TimedOut,
    /// The rendezvous has been closed.
    Closed,
}

#[derive(Debug)]
struct Slot<T> {
    pending: VecDeque<T>,
    waiter: Option<oneshot::Sender<T>>,
    open: bool,
}

/// Single-reader handoff point.
#[derive(Debug)]
pub struct Rendezvous<T> {
    slot: Mutex<Slot<T>>,
    capacity: usize,
}

impl<T> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<T> Rendezvous<T> {
    /// Create an open rendezvous with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an open rendezvous queueing at most `capacity` items.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slot: Mutex::new(Slot {
                pending: VecDeque::new(),
                waiter: None,
                open: true,
            }),
            capacity,
        }
    }

    /// Push an item. Never blocks.
    ///
    /// Returns the evicted oldest item when the queue was already full.
    ///
    /// # Errors
    ///
    /// Returns the item back if the rendezvous is closed.
    pub fn offer(&self, item: T) -> Result<Option<T>, T> {
        let mut slot = self.slot.lock();
        if !slot.open {
            return Err(item);
        }

        let item = match slot.waiter.take() {
            Some(waiter) => match waiter.send(item) {
                Ok(()) => return Ok(None),
                // Reader gave up; keep the item for its next pull.
                Err(item) => item,
            },
            None => item,
        };

        let evicted = if slot.pending.len() >= self.capacity {
            slot.pending.pop_front()
        } else {
            None
        };
        slot.pending.push_back(item);
        Ok(evicted)
    }

    /// Wait up to `timeout` for the next item.
    pub async fn take(&self, timeout: Duration) -> Take<T> {
        let mut receiver = {
            let mut slot = self.slot.lock();
            if let Some(item) = slot.pending.pop_front() {
                return Take::Item(item);
            }
            if !slot.open {
                return Take::Closed;
            }

            let (sender, receiver) = oneshot::channel();
            slot.waiter = Some(sender);
            receiver
        };

        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(item)) => Take::Item(item),
            Ok(Err(_)) => Take::Closed,
            Err(_) => {
                let open = {
                    let mut slot = self.slot.lock();
                    slot.waiter = None;
                    slot.open
                };

                // An item may have been handed over just as the timer fired.
                match receiver.try_recv() {
                    Ok(item) => Take::Item(item),
                    Err(_) if open => Take::TimedOut,
                    Err(_) => Take::Closed,
                }
            }
        }
    }

    /// Close the rendezvous, discarding queued items and waking the reader.
    pub fn close(&self) {
        let mut slot = self.slot.lock();
        slot.open = false;
        slot.waiter = None;
        slot.pending.clear();
    }
}
