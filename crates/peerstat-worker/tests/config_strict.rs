#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use peerstat_core::{MergePolicy, MetricKind};
use peerstat_worker::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
scrape:
  fetch_timout_ms: 500 # typo should fail
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "INVALID_CONFIG");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.worker.id, 0);
    assert_eq!(cfg.worker.socket_prefix, "worker-");
    assert_eq!(cfg.scrape.fetch_timeout_ms, 1000);
    assert_eq!(cfg.scrape.deadline_ms, 3000);
    assert!(cfg.metrics.is_empty());
}

#[test]
fn declared_metrics_become_descriptors() {
    let ok = r#"
version: 1
worker:
  id: 3
  socket_dir: /run/app/metrics
metrics:
  - name: requests_total
    kind: counter
    help: "Requests served."
    labels: [worker, route]
  - name: schema_version
    kind: gauge
    help: "Applied migration."
    merge: max
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    let d = cfg.descriptors();
    assert_eq!(d.len(), 2);
    assert_eq!(d[0].kind, MetricKind::Counter);
    assert_eq!(
        d[0].label_keys.as_deref(),
        Some(&["route".to_string(), "worker".to_string()][..])
    );
    assert_eq!(d[1].merge, MergePolicy::Max);
    assert_eq!(d[1].label_keys, None);
}

#[test]
fn rejects_bad_version_and_ranges() {
    for bad in [
        "version: 2\n",
        "version: 1\nscrape:\n  fetch_timeout_ms: 10\n",
        "version: 1\nscrape:\n  fetch_timeout_ms: 2000\n  deadline_ms: 1000\n",
        "version: 1\nscrape:\n  deadline_ms: 60000\n",
        "version: 1\nworker:\n  socket_prefix: \"a/b\"\n",
    ] {
        let err = config::load_from_str(bad).expect_err(bad);
        assert_eq!(err.code().as_str(), "INVALID_CONFIG", "{bad}");
    }
}

#[test]
fn rejects_bad_metric_declarations() {
    for bad in [
        "version: 1\nmetrics:\n  - { name: \"bad-name\", kind: gauge, help: x }\n",
        "version: 1\nmetrics:\n  - { name: ok, kind: gauge, help: x, labels: [\"1k\"] }\n",
        "version: 1\nmetrics:\n  - { name: ok, kind: counter, help: x, merge: max }\n",
        "version: 1\nmetrics:\n  - { name: ok, kind: gauge, help: x }\n  - { name: ok, kind: gauge, help: x }\n",
        "version: 1\nmetrics:\n  - { name: ok, kind: histogram, help: x }\n",
    ] {
        let err = config::load_from_str(bad).expect_err(bad);
        assert_eq!(err.code().as_str(), "INVALID_CONFIG", "{bad}");
    }
}
