//! Shared application state for the peerstat worker.
//!
//! The composition root: owns the application `MetricSet` (request handlers
//! record into it through `metrics()`), the runtime snapshot provider, the
//! peer registry, and the aggregator. Nothing here is a global.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use peerstat_core::error::{PeerstatError, Result};
use peerstat_core::{render_text, MetricSet};

use crate::aggregate::{Aggregator, LocalPeer};
use crate::config::WorkerConfig;
use crate::peer::{self, PeerRegistry};
use crate::snapshot::{ProcessSnapshotProvider, RuntimeProvider};
use crate::store::{self, StoreSource};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: WorkerConfig,
    app_metrics: Arc<MetricSet>,
    provider: Arc<RuntimeProvider>,
    aggregator: Aggregator,
    store: Option<Arc<dyn StoreSource>>,
    scrapes: Arc<AtomicU64>,
}

impl AppState {
    /// Build application state. Fails fast on `SchemaConflict`.
    pub fn new(cfg: WorkerConfig, store: Option<Arc<dyn StoreSource>>) -> Result<Self> {
        // 1) Declared application schema
        let app_metrics = Arc::new(MetricSet::with_schema(cfg.descriptors())?);

        // 2) Runtime provider; its series must not collide with declared ones
        let scrapes = Arc::new(AtomicU64::new(0));
        let provider = Arc::new(RuntimeProvider::new(
            cfg.worker.id,
            Arc::clone(&app_metrics),
            Arc::clone(&scrapes),
        ));
        if let Some(d) = provider.schema().iter().find(|d| app_metrics.contains(&d.name)) {
            return Err(PeerstatError::SchemaConflict {
                name: d.name.clone(),
                reason: "name is reserved for runtime metrics".into(),
            });
        }

        // 3) Peers
        let registry = Arc::new(PeerRegistry::new(
            cfg.worker.socket_dir.clone(),
            cfg.worker.socket_prefix.clone(),
            cfg.scrape.fetch_timeout(),
            cfg.scrape.max_frame_bytes,
        ));
        let local_provider: Arc<dyn ProcessSnapshotProvider> = provider.clone();
        let aggregator = Aggregator::new(registry, cfg.scrape.deadline()).with_local(LocalPeer {
            id: cfg.worker.id,
            provider: local_provider,
        });

        tracing::info!(
            worker = cfg.worker.id,
            declared = app_metrics.len(),
            socket_dir = %cfg.worker.socket_dir.display(),
            "worker state ready"
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                app_metrics,
                provider,
                aggregator,
                store,
                scrapes,
            }),
        })
    }

    pub fn cfg(&self) -> &WorkerConfig {
        &self.inner.cfg
    }

    /// The application registry request handlers record into.
    pub fn metrics(&self) -> Arc<MetricSet> {
        Arc::clone(&self.inner.app_metrics)
    }

    pub fn provider(&self) -> Arc<dyn ProcessSnapshotProvider> {
        self.inner.provider.clone()
    }

    pub fn socket_path(&self) -> PathBuf {
        let w = &self.inner.cfg.worker;
        peer::socket_path(&w.socket_dir, &w.socket_prefix, w.id)
    }

    fn record_scrape(&self) {
        self.inner.scrapes.fetch_add(1, Ordering::Relaxed);
    }

    /// This process only; no sockets involved.
    pub fn local_text(&self) -> String {
        self.record_scrape();
        render_text(&self.inner.provider.snapshot())
    }

    /// Every reachable worker plus application-wide store metrics.
    pub async fn instance_wide_text(&self) -> Result<String> {
        self.record_scrape();
        let combined = self.inner.aggregator.collect_instance_wide().await;
        if let Some(source) = &self.inner.store {
            let app_wide = store::collect_application_wide(source.as_ref()).await?;
            combined.absorb(&app_wide)?;
        }
        Ok(render_text(&combined))
    }
}
