//! Administrative symbol removal.

use serde::Serialize;

use super::registry::{PriceRegistry, Shared};
use crate::application::ports::SourceError;
use crate::domain::price::Symbol;
use crate::infrastructure::metrics;

/// Result of an administrative ticker removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalOutcome {
    /// Whether the removal went through.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
}

impl PriceRegistry {
    /// Forcibly drop all state for `symbol` and release source resources.
    ///
    /// Attached subscribers are detached silently; their sessions stay
    /// open and fall back to heartbeats. Source resources are released
    /// even when the symbol has no state.
    ///
    /// # Errors
    ///
    /// Returns the `SourceError` from releasing source resources.
    pub async fn remove_symbol(&self, symbol: &Symbol) -> Result<(), SourceError> {
        if let Some(entry) = self.shared.take_entry(symbol) {
            let dropped = Shared::discard(&entry);
            tracing::info!(symbol = %symbol, dropped, "Removed symbol state");
        }

        self.shared.source.release_symbol(symbol).await.inspect_err(|e| {
            tracing::warn!(symbol = %symbol, error = %e, "Failed to release source resources");
        })
    }

    /// Remove a ticker on behalf of an operator.
    ///
    /// Never fails; the outcome says what happened.
    pub async fn remove_ticker(&self, symbol: &Symbol) -> RemovalOutcome {
        match self.remove_symbol(symbol).await {
            Ok(()) => {
                metrics::record_removal(true);
                RemovalOutcome {
                    success: true,
                    message: format!("Successfully removed {symbol} and released source resources"),
                }
            }
            Err(e) => {
                metrics::record_removal(false);
                RemovalOutcome {
                    success: false,
                    message: format!("Failed to remove {symbol}: {e}"),
                }
            }
        }
    }
}
