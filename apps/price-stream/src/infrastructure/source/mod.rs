//! Price Source Adapters
//!
//! Concrete implementations of the `PriceSource` port.

mod simulated;

pub use simulated::{DEFAULT_UNIVERSE, SimulatedPriceSource, SourceSettings};
