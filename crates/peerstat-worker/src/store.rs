//! Application-wide metrics read from the relational store.
//!
//! These are not per-process: the same counts would come back from every
//! worker, so they are queried once per instance-wide scrape and merged
//! after the peer fold rather than travelling over the peer sockets.

use async_trait::async_trait;

use peerstat_core::error::{PeerstatError, Result};
use peerstat_core::MetricSet;

#[async_trait]
pub trait StoreSource: Send + Sync {
    /// Run the aggregate queries and return their results as a fresh set.
    async fn collect(&self) -> Result<MetricSet>;
}

/// Query the store. Every failure is reported as `StoreQueryFailure`.
pub async fn collect_application_wide(store: &dyn StoreSource) -> Result<MetricSet> {
    store.collect().await.map_err(|e| match e {
        PeerstatError::StoreQueryFailure(_) => e,
        other => PeerstatError::StoreQueryFailure(other.to_string()),
    })
}
