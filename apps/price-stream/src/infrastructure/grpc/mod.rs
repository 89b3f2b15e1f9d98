//! gRPC Streaming Server
//!
//! Implements the `PriceService` gRPC service that exposes per-ticker price
//! streams to downstream clients.
//!
//! # Architecture
//!
//! Each `Subscribe` call opens one `StreamSession` against the shared
//! registry and pumps its items into the response stream:
//!
//! 1. Validates the requested ticker
//! 2. Opens a session (starting the ticker's poller if it is the first)
//! 3. Forwards real prices, swallowing idle heartbeats
//! 4. Ends cleanly when the ticker becomes unresolvable
//! 5. Closes the session on client disconnect or server shutdown
//!
//! Protobuf messages and service stubs are checked in under `proto/`.

pub mod server;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    pub mod pluto {
        pub mod price {
            pub mod v1 {
                include!("proto/pluto.price.v1.rs");
            }
        }
    }
}

pub use server::{PriceStreamServer, PriceStreamServerConfig};
