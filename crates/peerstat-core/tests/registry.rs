//! Registration, set, and label identity.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use peerstat_core::{Descriptor, LabelSet, MetricKind, MetricSet, Value};

#[test]
fn register_same_definition_twice_is_noop() {
    let set = MetricSet::new();
    set.register("requests_total", MetricKind::Counter, "Requests served.").unwrap();
    set.set_counter("requests_total", [("worker", "a")], 4).unwrap();

    set.register("requests_total", MetricKind::Counter, "Requests served.").unwrap();

    assert_eq!(set.len(), 1);
    let m = set.get("requests_total").unwrap();
    assert_eq!(m.value(&LabelSet::from([("worker", "a")])), Some(4.0));
}

#[test]
fn register_with_different_kind_or_help_conflicts() {
    let set = MetricSet::new();
    set.register("requests_total", MetricKind::Counter, "Requests served.").unwrap();

    let err = set
        .register("requests_total", MetricKind::Gauge, "Requests served.")
        .expect_err("kind differs");
    assert_eq!(err.code().as_str(), "SCHEMA_CONFLICT");

    let err = set
        .register("requests_total", MetricKind::Counter, "Something else.")
        .expect_err("help differs");
    assert_eq!(err.code().as_str(), "SCHEMA_CONFLICT");

    assert_eq!(set.get("requests_total").unwrap().kind(), MetricKind::Counter);
}

#[test]
fn counter_with_non_sum_policy_is_rejected() {
    let set = MetricSet::new();
    let err = set
        .register_descriptor(
            Descriptor::counter("jobs_total", "Jobs.").with_merge(peerstat_core::MergePolicy::Max),
        )
        .expect_err("must fail");
    assert_eq!(err.code().as_str(), "SCHEMA_CONFLICT");
    assert!(set.is_empty());
}

#[test]
fn invalid_metric_name_is_rejected() {
    let set = MetricSet::new();
    assert!(set.register("1bad", MetricKind::Gauge, "x").is_err());
    assert!(set.register("has-dash", MetricKind::Gauge, "x").is_err());
    assert!(set.register("ns:ok_name", MetricKind::Gauge, "x").is_ok());
}

#[test]
fn set_unknown_metric_fails_and_leaves_set_unchanged() {
    let set = MetricSet::new();
    set.register("threads_active", MetricKind::Gauge, "Threads.").unwrap();
    set.set_gauge("threads_active", [("worker", "a")], 3.0).unwrap();
    let before = set.snapshot();

    let err = set.set("nope", [("worker", "a")], 1.0).expect_err("unknown");
    assert_eq!(err.code().as_str(), "UNKNOWN_METRIC");
    assert!(set.get("nope").is_err());
    assert_eq!(set, before);
}

#[test]
fn typed_setters_validate_kind() {
    let set = MetricSet::new();
    set.register("threads_active", MetricKind::Gauge, "Threads.").unwrap();

    let err = set
        .set_counter("threads_active", LabelSet::empty(), 1)
        .expect_err("gauge is not a counter");
    assert_eq!(err.code().as_str(), "TYPE_MISMATCH");
    assert!(set.get("threads_active").unwrap().is_empty());

    // The kind-agnostic form accepts either.
    set.set("threads_active", LabelSet::empty(), 2.0).unwrap();
}

#[test]
fn counter_rejects_negative_fractional_and_non_finite() {
    let set = MetricSet::new();
    set.register("requests_total", MetricKind::Counter, "Requests.").unwrap();
    for bad in [-1.0, 1.5, f64::NAN, f64::INFINITY, 1e20] {
        let err = set.set("requests_total", LabelSet::empty(), bad).unwrap_err();
        assert_eq!(err.code().as_str(), "INVALID_VALUE", "value={bad}");
    }
    assert!(set.get("requests_total").unwrap().is_empty());

    set.set("requests_total", LabelSet::empty(), 12.0).unwrap();
    assert_eq!(
        set.get("requests_total").unwrap().reading(&LabelSet::empty()),
        Some(Value::Count(12))
    );
}

#[test]
fn counter_keeps_exact_counts_past_f64_precision() {
    let set = MetricSet::new();
    set.register("bytes_total", MetricKind::Counter, "Bytes.").unwrap();
    let big = (1u64 << 53) + 1;
    set.set_counter("bytes_total", LabelSet::empty(), big).unwrap();

    let m = set.get("bytes_total").unwrap();
    assert_eq!(m.reading(&LabelSet::empty()), Some(Value::Count(big)));
}

#[test]
fn nan_gauge_compares_equal_to_its_snapshot() {
    let set = MetricSet::new();
    set.register("ratio", MetricKind::Gauge, "Hit ratio.").unwrap();
    set.set_gauge("ratio", LabelSet::empty(), f64::NAN).unwrap();
    assert_eq!(set.snapshot(), set);
}

#[test]
fn gauge_set_replaces_value() {
    let set = MetricSet::new();
    set.register("queue_depth", MetricKind::Gauge, "Queue depth.").unwrap();
    set.set_gauge("queue_depth", [("queue", "mail")], 5.0).unwrap();
    set.set_gauge("queue_depth", [("queue", "mail")], 2.0).unwrap();

    let m = set.get("queue_depth").unwrap();
    assert_eq!(m.len(), 1);
    assert_eq!(m.value(&LabelSet::from([("queue", "mail")])), Some(2.0));
}

#[test]
fn label_order_does_not_change_identity() {
    let set = MetricSet::new();
    set.register("http_requests_total", MetricKind::Counter, "HTTP requests.").unwrap();

    set.set_counter("http_requests_total", [("method", "GET"), ("code", "200")], 1).unwrap();
    set.set_counter("http_requests_total", [("code", "200"), ("method", "GET")], 9).unwrap();

    let m = set.get("http_requests_total").unwrap();
    assert_eq!(m.len(), 1);
    assert_eq!(m.series()[0].1, 9.0);
    assert_eq!(
        LabelSet::from([("a", "1"), ("b", "2")]),
        LabelSet::from([("b", "2"), ("a", "1")])
    );
}

#[test]
fn duplicate_label_keys_keep_last_value() {
    let labels = LabelSet::from([("worker", "a"), ("worker", "b")]);
    assert_eq!(labels.len(), 1);
    assert_eq!(labels.get("worker"), Some("b"));
}

#[test]
fn declared_label_keys_are_enforced() {
    let set = MetricSet::new();
    set.register_descriptor(
        Descriptor::gauge("threads_active", "Threads.").with_labels(["worker"]),
    )
    .unwrap();

    let err = set
        .set_gauge("threads_active", [("wroker", "a")], 1.0)
        .expect_err("typo in key");
    assert_eq!(err.code().as_str(), "INVALID_LABELS");

    let err = set
        .set_gauge("threads_active", LabelSet::empty(), 1.0)
        .expect_err("missing key");
    assert_eq!(err.code().as_str(), "INVALID_LABELS");

    set.set_gauge("threads_active", [("worker", "a")], 1.0).unwrap();
    assert_eq!(set.get("threads_active").unwrap().len(), 1);
}

#[test]
fn set_many_is_all_or_nothing() {
    let set = MetricSet::new();
    set.register_descriptor(
        Descriptor::counter("rows_total", "Rows.").with_labels(["table"]),
    )
    .unwrap();

    let err = set
        .set_many(
            "rows_total",
            vec![
                (LabelSet::from([("table", "users")]), 10.0),
                (LabelSet::from([("tabel", "posts")]), 3.0),
            ],
        )
        .expect_err("second row invalid");
    assert_eq!(err.code().as_str(), "INVALID_LABELS");
    assert!(set.get("rows_total").unwrap().is_empty());

    set.set_many(
        "rows_total",
        vec![
            (LabelSet::from([("table", "users")]), 10.0),
            (LabelSet::from([("table", "posts")]), 3.0),
        ],
    )
    .unwrap();
    assert_eq!(set.get("rows_total").unwrap().len(), 2);
}

#[test]
fn render_follows_registration_then_encounter_order() {
    let set = MetricSet::with_schema([
        Descriptor::gauge("zeta", "Registered first."),
        Descriptor::counter("alpha_total", "Registered second."),
    ])
    .unwrap();
    set.set("alpha_total", [("k", "x")], 1.0).unwrap();
    set.set("zeta", [("k", "b")], 2.0).unwrap();
    set.set("zeta", [("k", "a")], 3.0).unwrap();

    let rows: Vec<(String, Option<String>)> = set
        .render()
        .into_iter()
        .map(|s| (s.name, s.labels.get("k").map(str::to_string)))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("zeta".to_string(), Some("b".to_string())),
            ("zeta".to_string(), Some("a".to_string())),
            ("alpha_total".to_string(), Some("x".to_string())),
        ]
    );
}

#[test]
fn snapshot_is_independent_of_source() {
    let set = MetricSet::new();
    set.register("threads_active", MetricKind::Gauge, "Threads.").unwrap();
    set.set_gauge("threads_active", LabelSet::empty(), 3.0).unwrap();

    let snap = set.snapshot();
    set.set_gauge("threads_active", LabelSet::empty(), 8.0).unwrap();

    assert_eq!(
        snap.get("threads_active").unwrap().value(&LabelSet::empty()),
        Some(3.0)
    );
}

#[test]
fn concurrent_sets_from_many_threads() {
    const THREADS: u64 = 8;
    const ROUNDS: u64 = 200;

    let set = MetricSet::with_schema([
        Descriptor::counter("requests_total", "Requests.").with_labels(["worker"]),
        Descriptor::gauge("queue_depth", "Queue depth.").with_labels(["queue"]),
    ])
    .unwrap();

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let set = &set;
            s.spawn(move || {
                let worker = format!("w{t}");
                for i in 1..=ROUNDS {
                    // Own series per thread.
                    set.set_counter("requests_total", [("worker", worker.as_str())], i)
                        .unwrap();
                    // Shared series, written by every thread.
                    set.set_gauge("queue_depth", [("queue", "shared")], 7.0).unwrap();
                    let parity = if i % 2 == 0 { "even" } else { "odd" };
                    set.set_gauge("queue_depth", [("queue", parity)], 1.0).unwrap();
                }
            });
        }
    });

    let req = set.get("requests_total").unwrap();
    assert_eq!(req.len(), THREADS as usize);
    for t in 0..THREADS {
        let labels = LabelSet::from([("worker", format!("w{t}").as_str())]);
        assert_eq!(req.reading(&labels), Some(Value::Count(ROUNDS)));
    }

    let depth = set.get("queue_depth").unwrap();
    assert_eq!(depth.len(), 3);
    assert_eq!(depth.value(&LabelSet::from([("queue", "shared")])), Some(7.0));

    let order = |set: &MetricSet| -> Vec<(String, LabelSet)> {
        set.render().into_iter().map(|s| (s.name, s.labels)).collect()
    };
    let first = order(&set);
    assert_eq!(first.len(), THREADS as usize + 3);
    assert!(first[..THREADS as usize].iter().all(|(n, _)| n == "requests_total"));
    set.set_gauge("queue_depth", [("queue", "shared")], 9.0).unwrap();
    set.set_counter("requests_total", [("worker", "w0")], ROUNDS + 1).unwrap();
    assert_eq!(order(&set), first);
    assert_eq!(order(&set.snapshot()), first);
}
