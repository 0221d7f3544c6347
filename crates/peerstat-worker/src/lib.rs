//! peerstat worker library entry.
//!
//! Wires the runtime snapshot provider, the peer socket transport, the
//! aggregator, and the HTTP scrape surface around the core metric model.
//! Consumed by the binary (`main.rs`) and by integration tests.

pub mod aggregate;
pub mod app_state;
pub mod config;
pub mod ops;
pub mod peer;
pub mod router;
pub mod snapshot;
pub mod store;
