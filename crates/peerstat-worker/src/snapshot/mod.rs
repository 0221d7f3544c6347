//! Per-process snapshot providers.
//!
//! A provider answers "what does this process look like right now" with a
//! freshly built `MetricSet`. It is called synchronously at scrape time, both
//! by the local scrape path and by the peer socket server.

pub mod runtime;

use peerstat_core::MetricSet;

pub use runtime::RuntimeProvider;

pub trait ProcessSnapshotProvider: Send + Sync {
    /// Pure read of current state. Must not fail; unreadable values become 0.
    fn snapshot(&self) -> MetricSet;
}

impl<F> ProcessSnapshotProvider for F
where
    F: Fn() -> MetricSet + Send + Sync,
{
    fn snapshot(&self) -> MetricSet {
        self()
    }
}
