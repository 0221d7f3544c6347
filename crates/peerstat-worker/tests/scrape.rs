//! Scrape paths through `AppState`: local, instance-wide, and the store tier.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use peerstat_core::error::{PeerstatError, Result};
use peerstat_core::{LabelSet, MetricKind, MetricSet};
use peerstat_worker::app_state::AppState;
use peerstat_worker::config;
use peerstat_worker::peer::PeerServer;
use peerstat_worker::store::StoreSource;

fn cfg(dir: &Path, id: u32) -> peerstat_worker::config::WorkerConfig {
    config::load_from_str(&format!(
        r#"
version: 1
worker:
  id: {id}
  socket_dir: "{}"
scrape:
  fetch_timeout_ms: 500
  deadline_ms: 2000
metrics:
  - name: requests_total
    kind: counter
    help: "Requests served."
    labels: [worker]
  - name: threads_active
    kind: gauge
    help: "Active threads."
    labels: [worker]
"#,
        dir.display()
    ))
    .unwrap()
}

fn record(state: &AppState, worker: &str, requests: u64, threads: f64) {
    let m = state.metrics();
    m.set_counter("requests_total", [("worker", worker)], requests).unwrap();
    m.set_gauge("threads_active", [("worker", worker)], threads).unwrap();
}

async fn serve(state: &AppState) -> watch::Sender<bool> {
    let server = PeerServer::bind(&state.socket_path(), state.cfg().scrape.max_frame_bytes)
        .await
        .unwrap();
    let (tx, rx) = watch::channel(false);
    tokio::spawn(server.run(state.provider(), rx));
    tx
}

struct Rows(f64);

#[async_trait]
impl StoreSource for Rows {
    async fn collect(&self) -> Result<MetricSet> {
        let set = MetricSet::new();
        set.register("users_total", MetricKind::Gauge, "Registered users.")?;
        set.set_gauge("users_total", LabelSet::empty(), self.0)?;
        Ok(set)
    }
}

struct Broken;

#[async_trait]
impl StoreSource for Broken {
    async fn collect(&self) -> Result<MetricSet> {
        Err(PeerstatError::Internal("connection reset".into()))
    }
}

#[test]
fn local_scrape_includes_declared_and_runtime_series() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(cfg(dir.path(), 0), None).unwrap();
    record(&state, "0", 12, 4.0);

    let text = state.local_text();
    assert!(text.contains("requests_total{worker=\"0\"} 12\n"));
    assert!(text.contains("threads_active{worker=\"0\"} 4\n"));
    assert!(text.contains(&format!(
        "peerstat_process_id{{worker=\"0\"}} {}\n",
        std::process::id()
    )));
    assert!(text.contains("# TYPE peerstat_process_threads gauge\n"));
    assert!(text.contains("# TYPE peerstat_scrapes_total counter\n"));
}

#[test]
fn scrape_counter_is_copied_into_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(cfg(dir.path(), 2), None).unwrap();
    state.local_text();
    state.local_text();
    let text = state.local_text();
    assert!(text.contains("peerstat_scrapes_total{worker=\"2\"} 3\n"));
}

#[test]
fn runtime_names_are_reserved() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = cfg(dir.path(), 0);
    c.metrics = config::load_from_str(
        "version: 1\nmetrics:\n  - { name: peerstat_process_threads, kind: gauge, help: x }\n",
    )
    .unwrap()
    .metrics;
    let err = AppState::new(c, None).err().expect("must fail");
    assert_eq!(err.code().as_str(), "SCHEMA_CONFLICT");
}

#[tokio::test]
async fn instance_wide_scrape_spans_workers() {
    let dir = tempfile::tempdir().unwrap();
    let a = AppState::new(cfg(dir.path(), 0), None).unwrap();
    let b = AppState::new(cfg(dir.path(), 1), None).unwrap();
    record(&a, "0", 10, 3.0);
    record(&b, "1", 7, 2.0);
    let _sa = serve(&a).await;
    let _sb = serve(&b).await;

    let text = a.instance_wide_text().await.unwrap();
    for line in [
        "requests_total{worker=\"0\"} 10",
        "requests_total{worker=\"1\"} 7",
        "threads_active{worker=\"0\"} 3",
        "threads_active{worker=\"1\"} 2",
    ] {
        assert!(text.lines().any(|l| l == line), "missing {line} in\n{text}");
    }
    assert_eq!(text.matches("# TYPE requests_total counter").count(), 1);
    assert_eq!(text.matches("peerstat_process_id{").count(), 2);
}

#[tokio::test]
async fn store_metrics_are_merged_once() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(cfg(dir.path(), 0), Some(Arc::new(Rows(42.0)))).unwrap();
    record(&state, "0", 1, 1.0);

    let text = state.instance_wide_text().await.unwrap();
    assert!(text.contains("users_total 42\n"));
}

#[tokio::test]
async fn store_failure_fails_the_scrape() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(cfg(dir.path(), 0), Some(Arc::new(Broken))).unwrap();

    let err = state.instance_wide_text().await.unwrap_err();
    assert_eq!(err.code().as_str(), "STORE_QUERY_FAILURE");
    assert!(err.to_string().contains("connection reset"));

    // The per-process tier is unaffected.
    assert!(state.local_text().contains("peerstat_process_id"));
}
