//! Runtime snapshot: the application registry plus process introspection.
//!
//! Introspection reads `/proc/self`. Anything unreadable (non-Linux hosts,
//! restricted procfs) is reported as 0 for that one series.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use peerstat_core::{Descriptor, LabelSet, MetricSet};

pub const PROCESS_ID: &str = "peerstat_process_id";
pub const PROCESS_THREADS: &str = "peerstat_process_threads";
pub const PROCESS_OPEN_FDS: &str = "peerstat_process_open_fds";
pub const PROCESS_UPTIME: &str = "peerstat_process_uptime_seconds";
pub const SCRAPES_TOTAL: &str = "peerstat_scrapes_total";

fn runtime_schema() -> Vec<Descriptor> {
    [
        Descriptor::gauge(PROCESS_ID, "OS process id of the worker."),
        Descriptor::gauge(PROCESS_THREADS, "Threads in the worker process."),
        Descriptor::gauge(PROCESS_OPEN_FDS, "Open file descriptors in the worker process."),
        Descriptor::gauge(PROCESS_UPTIME, "Seconds since the worker started."),
        Descriptor::counter(SCRAPES_TOTAL, "Scrape requests answered by the worker."),
    ]
    .into_iter()
    .map(|d| d.with_labels(["worker"]))
    .collect()
}

pub struct RuntimeProvider {
    worker: String,
    app: Arc<MetricSet>,
    scrapes: Arc<AtomicU64>,
    started: Instant,
    schema: OnceLock<Vec<Descriptor>>,
}

impl RuntimeProvider {
    pub fn new(worker_id: u32, app: Arc<MetricSet>, scrapes: Arc<AtomicU64>) -> Self {
        Self {
            worker: worker_id.to_string(),
            app,
            scrapes,
            started: Instant::now(),
            schema: OnceLock::new(),
        }
    }

    /// Runtime descriptors, built on first use and kept for the process lifetime.
    pub fn schema(&self) -> &[Descriptor] {
        self.schema.get_or_init(runtime_schema)
    }

    fn labels(&self) -> LabelSet {
        LabelSet::from([("worker", self.worker.as_str())])
    }

    fn record(&self, set: &MetricSet, name: &str, value: f64) {
        if let Err(e) = set.set_gauge(name, self.labels(), value) {
            tracing::debug!(metric = name, error = %e, "runtime series skipped");
        }
    }
}

impl super::ProcessSnapshotProvider for RuntimeProvider {
    fn snapshot(&self) -> MetricSet {
        let out = self.app.snapshot();
        for d in self.schema() {
            if let Err(e) = out.register_descriptor(d.clone()) {
                tracing::warn!(error = %e, "runtime metric shadowed by application schema");
            }
        }

        self.record(&out, PROCESS_ID, f64::from(std::process::id()));
        self.record(&out, PROCESS_THREADS, thread_count().unwrap_or(0) as f64);
        self.record(&out, PROCESS_OPEN_FDS, open_fds().unwrap_or(0) as f64);
        self.record(&out, PROCESS_UPTIME, self.started.elapsed().as_secs_f64());
        let scrapes = self.scrapes.load(Ordering::Relaxed);
        if let Err(e) = out.set_counter(SCRAPES_TOTAL, self.labels(), scrapes) {
            tracing::debug!(metric = SCRAPES_TOTAL, error = %e, "runtime series skipped");
        }
        out
    }
}

fn thread_count() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|l| l.strip_prefix("Threads:"))
        .and_then(|v| v.trim().parse().ok())
}

fn open_fds() -> Option<u64> {
    std::fs::read_dir("/proc/self/fd")
        .ok()
        .map(|d| d.filter_map(|e| e.ok()).count() as u64)
}
