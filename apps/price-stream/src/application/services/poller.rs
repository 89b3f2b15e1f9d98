//! Per-symbol polling task.
//!
//! One poller runs per active symbol. It waits one interval, fetches a
//! sample, and hands the outcome back to the registry. Cancellation wins
//! over both the timer and an in-flight fetch, so once a poller has been
//! stopped it never publishes again.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::registry::{Shared, SymbolEntry};

/// Handle to a running poller.
#[derive(Debug)]
pub(super) struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal the poller to stop. Returns the task for callers that want
    /// to wait for it.
    pub(super) fn stop(self) -> JoinHandle<()> {
        self.cancel.cancel();
        self.task
    }
}

/// Spawn the poller for `entry`.
pub(super) fn spawn(
    registry: Weak<Shared>,
    entry: Arc<SymbolEntry>,
    interval: Duration,
) -> PollerHandle {
    let cancel = CancellationToken::new();
    let poller = SymbolPoller {
        registry,
        entry,
        interval,
        cancel: cancel.clone(),
    };

    PollerHandle {
        cancel,
        task: tokio::spawn(poller.run()),
    }
}

struct SymbolPoller {
    registry: Weak<Shared>,
    entry: Arc<SymbolEntry>,
    interval: Duration,
    cancel: CancellationToken,
}

impl SymbolPoller {
    async fn run(self) {
        let symbol = self.entry.symbol().clone();
        tracing::debug!(symbol = %symbol, interval = ?self.interval, "Poller running");

        // First tick one interval out; the start-up fetch already happened.
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(registry) = self.registry.upgrade() else {
                break;
            };

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = registry.fetch(&symbol) => result,
            };

            match result {
                Ok(sample) => registry.publish(&self.entry, sample),
                Err(e) if e.is_terminal() => {
                    registry.terminate(&self.entry).await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Poll failed, retrying next interval");
                }
            }
        }

        tracing::debug!(symbol = %symbol, "Poller stopped");
    }
}
