//! Instance-wide aggregation across sibling workers.
//!
//! Fetches run concurrently, one future per peer. Each fetch gets
//! `min(fetch_timeout, time left until the scrape deadline)`, so the whole
//! collection is bounded by the deadline and no single peer can stall it.
//! Unreachable peers are logged and left out of the result.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;

use peerstat_core::MetricSet;

use crate::peer::PeerRegistry;
use crate::snapshot::ProcessSnapshotProvider;

/// This process, answered in-process instead of through its own socket.
pub struct LocalPeer {
    pub id: u32,
    pub provider: Arc<dyn ProcessSnapshotProvider>,
}

pub struct Aggregator {
    registry: Arc<PeerRegistry>,
    local: Option<LocalPeer>,
    deadline: Duration,
}

impl Aggregator {
    pub fn new(registry: Arc<PeerRegistry>, deadline: Duration) -> Self {
        Self {
            registry,
            local: None,
            deadline,
        }
    }

    pub fn with_local(mut self, local: LocalPeer) -> Self {
        self.local = Some(local);
        self
    }

    /// Merge of every reachable worker's snapshot. Never fails: with no
    /// reachable peers the result is empty (or just the local snapshot).
    pub async fn collect_instance_wide(&self) -> MetricSet {
        let started = Instant::now();
        let deadline = started + self.deadline;
        let local_id = self.local.as_ref().map(|l| l.id);

        let peers: Vec<_> = self
            .registry
            .discover()
            .await
            .into_iter()
            .filter(|p| Some(p.id) != local_id)
            .collect();

        let fetches = peers.iter().map(|peer| async move {
            let left = deadline.saturating_duration_since(Instant::now());
            let budget = self.registry.fetch_timeout().min(left);
            (peer, self.registry.fetch_within(peer, budget).await)
        });
        let results = join_all(fetches).await;

        let acc = MetricSet::new();
        let mut merged = 0usize;
        if let Some(local) = &self.local {
            match acc.absorb(&local.provider.snapshot()) {
                Ok(()) => merged += 1,
                Err(e) => tracing::error!(worker = local.id, error = %e, "local snapshot rejected"),
            }
        }
        for (peer, res) in results {
            match res {
                Ok(set) => match acc.absorb(&set) {
                    Ok(()) => merged += 1,
                    Err(e) => {
                        tracing::warn!(worker = peer.id, error = %e, "peer snapshot dropped: schema conflict")
                    }
                },
                Err(e) if e.is_routine() => {
                    tracing::debug!(worker = peer.id, error = %e, "peer dropped from aggregate")
                }
                Err(e) => tracing::warn!(worker = peer.id, error = %e, "peer dropped from aggregate"),
            }
        }

        tracing::debug!(
            peers = peers.len(),
            merged,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "instance-wide collection done"
        );
        acc
    }
}
