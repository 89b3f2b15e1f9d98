//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `PriceRegistry`: Subscriber bookkeeping, one poller per symbol,
//!   last-sample cache and symbol removal
//! - `StreamSession`: Pull-based stream of samples for one subscriber,
//!   with idle heartbeats

mod poller;
mod registry;
mod removal;
mod rendezvous;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use registry::{DEFAULT_POLL_INTERVAL, PriceRegistry, RegistrySettings, SubscriptionError};
pub use removal::RemovalOutcome;
pub use rendezvous::{Rendezvous, Take};
pub use session::{DEFAULT_IDLE_TIMEOUT, SessionError, StreamItem, StreamSession};
