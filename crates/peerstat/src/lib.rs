//! Top-level facade crate for peerstat.
//!
//! Re-exports the metric model and the worker runtime so users can depend on a single crate.

pub mod core {
    pub use peerstat_core::*;
}

pub mod worker {
    pub use peerstat_worker::*;
}
