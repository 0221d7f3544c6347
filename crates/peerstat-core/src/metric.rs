//! Typed, label-indexed metric registry.
//!
//! A `MetricSet` maps metric names to `Metric`s; each `Metric` maps label
//! sets to values. Both maps are `DashMap`s so request threads can set
//! values concurrently without a registry-wide lock. Every metric and every
//! series is stamped with a sequence number on first insertion, which is how
//! rendering recovers registration / encounter order from the unordered maps.
//!
//! Every series value lives in an `AtomicU64`, so replacing the value of an
//! existing series only takes a shard read lock. Counters hold whole counts
//! and merge by exact integer addition; gauges hold `f64` bits.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{PeerstatError, Result};
use crate::labels::{is_valid_label_key, is_valid_metric_name, LabelSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic; merged by summing partial counts.
    Counter,
    /// Point-in-time value; merged per `MergePolicy`.
    Gauge,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// How two values for the same label set combine when snapshots merge.
///
/// All policies are commutative. `Max` and `Min` are associative; `Sum` of
/// fractional gauges is `f64` addition, so regrouping can move the last bit.
/// Counters always use `Sum`, over exact integer counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    #[default]
    Sum,
    Max,
    Min,
}

impl MergePolicy {
    pub fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            MergePolicy::Sum => a + b,
            MergePolicy::Max => a.max(b),
            MergePolicy::Min => a.min(b),
        }
    }
}

/// Largest `f64` strictly below 2^64; anything above does not fit a count.
const MAX_WHOLE_COUNT: f64 = 18_446_744_073_709_549_568.0;

/// A finite, non-negative, integral `f64` as a count.
pub(crate) fn whole_count(v: f64) -> Option<u64> {
    if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= MAX_WHOLE_COUNT {
        Some(v as u64)
    } else {
        None
    }
}

/// One series value, typed by the metric's kind.
///
/// Equality treats every `NaN` as equal to every other `NaN`, so a set that
/// holds a `NaN` gauge still compares equal to its own snapshot.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    Count(u64),
    Gauge(f64),
}

impl Value {
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Count(n) => n as f64,
            Value::Gauge(v) => v,
        }
    }

    pub fn kind(self) -> MetricKind {
        match self {
            Value::Count(_) => MetricKind::Counter,
            Value::Gauge(_) => MetricKind::Gauge,
        }
    }

    fn to_bits(self) -> u64 {
        match self {
            Value::Count(n) => n,
            Value::Gauge(v) => v.to_bits(),
        }
    }

    fn from_bits(kind: MetricKind, bits: u64) -> Self {
        match kind {
            MetricKind::Counter => Value::Count(bits),
            MetricKind::Gauge => Value::Gauge(f64::from_bits(bits)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (*self, *other) {
            (Value::Count(a), Value::Count(b)) => a == b,
            (Value::Gauge(a), Value::Gauge(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => false,
        }
    }
}

/// Exposition form: counts as integers, `NaN` / `+Inf` / `-Inf` spelled out.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::Count(n) => write!(f, "{n}"),
            Value::Gauge(v) if v.is_nan() => f.write_str("NaN"),
            Value::Gauge(v) if v == f64::INFINITY => f.write_str("+Inf"),
            Value::Gauge(v) if v == f64::NEG_INFINITY => f.write_str("-Inf"),
            // f64 Display prints integral values without a fraction ("10", not "10.0").
            Value::Gauge(v) => write!(f, "{v}"),
        }
    }
}

/// Static definition of a metric: everything except its values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    pub kind: MetricKind,
    pub help: String,
    /// Declared label keys (sorted). `None` accepts any keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_keys: Option<Vec<String>>,
    #[serde(default)]
    pub merge: MergePolicy,
}

impl Descriptor {
    pub fn new(name: impl Into<String>, kind: MetricKind, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            help: help.into(),
            label_keys: None,
            merge: MergePolicy::Sum,
        }
    }

    pub fn counter(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Counter, help)
    }

    pub fn gauge(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Gauge, help)
    }

    /// Declare the label keys every series of this metric must carry.
    pub fn with_labels<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();
        self.label_keys = Some(keys);
        self
    }

    pub fn with_merge(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_metric_name(&self.name) {
            return Err(PeerstatError::SchemaConflict {
                name: self.name.clone(),
                reason: "invalid metric name".into(),
            });
        }
        if let Some(keys) = &self.label_keys {
            if let Some(bad) = keys.iter().find(|k| !is_valid_label_key(k)) {
                return Err(PeerstatError::SchemaConflict {
                    name: self.name.clone(),
                    reason: format!("invalid label key: {bad}"),
                });
            }
        }
        if self.kind == MetricKind::Counter && self.merge != MergePolicy::Sum {
            return Err(PeerstatError::SchemaConflict {
                name: self.name.clone(),
                reason: "counters only merge by sum".into(),
            });
        }
        Ok(())
    }

    fn conflict_with(&self, other: &Descriptor) -> Option<String> {
        if self.kind != other.kind {
            return Some(format!(
                "kind {} vs {}",
                self.kind.as_str(),
                other.kind.as_str()
            ));
        }
        if self.help != other.help {
            return Some("help text differs".into());
        }
        if self.label_keys != other.label_keys {
            return Some("declared label keys differ".into());
        }
        if self.merge != other.merge {
            return Some("merge policy differs".into());
        }
        None
    }
}

#[derive(Debug)]
struct Series {
    seq: u64,
    bits: AtomicU64,
}

/// One named measurement and its label-keyed values.
#[derive(Debug)]
pub struct Metric {
    desc: Descriptor,
    seq: u64,
    series: DashMap<LabelSet, Series>,
    next_series: AtomicU64,
}

impl Metric {
    fn new(desc: Descriptor, seq: u64) -> Self {
        Self {
            desc,
            seq,
            series: DashMap::new(),
            next_series: AtomicU64::new(0),
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn kind(&self) -> MetricKind {
        self.desc.kind
    }

    pub fn help(&self) -> &str {
        &self.desc.help
    }

    /// Current value for a label set, if that series exists.
    pub fn value(&self, labels: &LabelSet) -> Option<f64> {
        self.reading(labels).map(Value::as_f64)
    }

    /// Typed form of `value`. Counters come back as exact counts.
    pub fn reading(&self, labels: &LabelSet) -> Option<Value> {
        self.series
            .get(labels)
            .map(|s| Value::from_bits(self.desc.kind, s.bits.load(Ordering::Relaxed)))
    }

    /// All series in encounter order.
    pub fn series(&self) -> Vec<(LabelSet, f64)> {
        self.values()
            .into_iter()
            .map(|(l, v)| (l, v.as_f64()))
            .collect()
    }

    /// Typed form of `series`.
    pub fn values(&self) -> Vec<(LabelSet, Value)> {
        let mut rows: Vec<(u64, LabelSet, Value)> = self
            .series
            .iter()
            .map(|r| {
                let s = r.value();
                (
                    s.seq,
                    r.key().clone(),
                    Value::from_bits(self.desc.kind, s.bits.load(Ordering::Relaxed)),
                )
            })
            .collect();
        rows.sort_by_key(|(seq, _, _)| *seq);
        rows.into_iter().map(|(_, l, v)| (l, v)).collect()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    fn check_labels(&self, labels: &LabelSet) -> Result<()> {
        if let Some(keys) = &self.desc.label_keys {
            if !labels.has_keys(keys) {
                return Err(PeerstatError::InvalidLabels {
                    name: self.desc.name.clone(),
                    reason: format!(
                        "expected keys [{}], got [{}]",
                        keys.join(","),
                        labels.keys().collect::<Vec<_>>().join(",")
                    ),
                });
            }
        }
        Ok(())
    }

    /// Type a raw reading. Counters only take whole, non-negative numbers.
    fn typed(&self, value: f64) -> Result<Value> {
        match self.desc.kind {
            MetricKind::Gauge => Ok(Value::Gauge(value)),
            MetricKind::Counter => whole_count(value).map(Value::Count).ok_or_else(|| {
                PeerstatError::InvalidValue {
                    name: self.desc.name.clone(),
                    value,
                }
            }),
        }
    }

    fn check(&self, labels: &LabelSet, value: Value) -> Result<()> {
        if value.kind() != self.desc.kind {
            return Err(PeerstatError::TypeMismatch {
                name: self.desc.name.clone(),
                expected: value.kind().as_str(),
                actual: self.desc.kind.as_str(),
            });
        }
        self.check_labels(labels)
    }

    fn store(&self, labels: LabelSet, value: Value) {
        let bits = value.to_bits();
        if let Some(s) = self.series.get(&labels) {
            s.bits.store(bits, Ordering::Relaxed);
            return;
        }
        let s = self.series.entry(labels).or_insert_with(|| Series {
            seq: self.next_series.fetch_add(1, Ordering::Relaxed),
            bits: AtomicU64::new(0),
        });
        s.bits.store(bits, Ordering::Relaxed);
    }

    /// Fold `value` into the series: counters add exactly, gauges follow
    /// this metric's merge policy.
    fn combine(&self, labels: LabelSet, value: Value) {
        match self.series.entry(labels) {
            Entry::Occupied(e) => {
                let cur = Value::from_bits(self.desc.kind, e.get().bits.load(Ordering::Relaxed));
                let next = match (cur, value) {
                    (Value::Count(a), Value::Count(b)) => Value::Count(a.saturating_add(b)),
                    (Value::Gauge(a), Value::Gauge(b)) => {
                        Value::Gauge(self.desc.merge.combine(a, b))
                    }
                    // Kinds are checked before folding; keep the current value.
                    (cur, _) => cur,
                };
                e.get().bits.store(next.to_bits(), Ordering::Relaxed);
            }
            Entry::Vacant(e) => {
                e.insert(Series {
                    seq: self.next_series.fetch_add(1, Ordering::Relaxed),
                    bits: AtomicU64::new(value.to_bits()),
                });
            }
        }
    }

    fn copy_with_seq(&self, seq: u64) -> Metric {
        let out = Metric::new(self.desc.clone(), seq);
        for (labels, value) in self.values() {
            out.store(labels, value);
        }
        out
    }

    fn same_as(&self, other: &Metric) -> bool {
        self.desc == other.desc
            && self.series.len() == other.series.len()
            && self
                .values()
                .iter()
                .all(|(labels, v)| other.reading(labels) == Some(*v))
    }
}

/// One flattened row of `MetricSet::render`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: LabelSet,
    pub value: Value,
    pub help: String,
    pub kind: MetricKind,
}

/// Registry owning `name -> Metric`.
///
/// Constructed explicitly by the composition root and shared by `Arc`.
#[derive(Debug, Default)]
pub struct MetricSet {
    metrics: DashMap<String, Arc<Metric>>,
    next_seq: AtomicU64,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set pre-seeded with a declared schema.
    pub fn with_schema<I>(descriptors: I) -> Result<Self>
    where
        I: IntoIterator<Item = Descriptor>,
    {
        let set = Self::new();
        for d in descriptors {
            set.register_descriptor(d)?;
        }
        Ok(set)
    }

    /// Register with no label-key restriction and `Sum` merging.
    pub fn register(&self, name: &str, kind: MetricKind, help: &str) -> Result<()> {
        self.register_descriptor(Descriptor::new(name, kind, help))
    }

    /// No-op when an identical definition exists; `SchemaConflict` when it differs.
    pub fn register_descriptor(&self, desc: Descriptor) -> Result<()> {
        desc.validate()?;
        match self.metrics.entry(desc.name.clone()) {
            Entry::Occupied(e) => match e.get().desc.conflict_with(&desc) {
                Some(reason) => Err(PeerstatError::SchemaConflict {
                    name: desc.name,
                    reason,
                }),
                None => Ok(()),
            },
            Entry::Vacant(e) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(metric = %desc.name, kind = desc.kind.as_str(), "registered");
                e.insert(Arc::new(Metric::new(desc, seq)));
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<Metric>> {
        self.metrics
            .get(name)
            .map(|m| Arc::clone(m.value()))
            .ok_or_else(|| PeerstatError::UnknownMetric(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    /// Kind-agnostic set: replaces the value for that label set.
    pub fn set(&self, name: &str, labels: impl Into<LabelSet>, value: f64) -> Result<()> {
        let metric = self.get(name)?;
        let labels = labels.into();
        let value = metric.typed(value)?;
        metric.check(&labels, value)?;
        metric.store(labels, value);
        Ok(())
    }

    /// Copy in an already-monotonic counter reading.
    pub fn set_counter(&self, name: &str, labels: impl Into<LabelSet>, value: u64) -> Result<()> {
        self.set_value(name, labels.into(), Value::Count(value))
    }

    pub fn set_gauge(&self, name: &str, labels: impl Into<LabelSet>, value: f64) -> Result<()> {
        self.set_value(name, labels.into(), Value::Gauge(value))
    }

    /// Bulk set. Every row is validated before any is written.
    pub fn set_many<I, L>(&self, name: &str, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = (L, f64)>,
        L: Into<LabelSet>,
    {
        let metric = self.get(name)?;
        let rows = rows
            .into_iter()
            .map(|(l, v)| Ok((l.into(), metric.typed(v)?)))
            .collect::<Result<Vec<(LabelSet, Value)>>>()?;
        Self::store_all(&metric, rows)
    }

    /// Typed bulk set, all or nothing like `set_many`.
    pub fn set_values<I>(&self, name: &str, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = (LabelSet, Value)>,
    {
        let metric = self.get(name)?;
        Self::store_all(&metric, rows.into_iter().collect())
    }

    fn store_all(metric: &Metric, rows: Vec<(LabelSet, Value)>) -> Result<()> {
        for (labels, value) in &rows {
            metric.check(labels, *value)?;
        }
        for (labels, value) in rows {
            metric.store(labels, value);
        }
        Ok(())
    }

    fn set_value(&self, name: &str, labels: LabelSet, value: Value) -> Result<()> {
        let metric = self.get(name)?;
        metric.check(&labels, value)?;
        metric.store(labels, value);
        Ok(())
    }

    /// Metrics in registration order.
    pub fn metrics(&self) -> Vec<Arc<Metric>> {
        let mut all: Vec<Arc<Metric>> = self.metrics.iter().map(|r| Arc::clone(r.value())).collect();
        all.sort_by_key(|m| m.seq);
        all
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Deep value copy. The result shares no storage with `self`.
    pub fn snapshot(&self) -> MetricSet {
        let out = MetricSet::new();
        for m in self.metrics() {
            out.adopt(&m);
        }
        out
    }

    /// Union of both sets. Shared label sets combine per merge policy.
    ///
    /// Fails with `SchemaConflict` when the same name carries different
    /// definitions on each side.
    pub fn merge(&self, other: &MetricSet) -> Result<MetricSet> {
        let out = self.snapshot();
        out.absorb(other)?;
        Ok(out)
    }

    /// In-place form of `merge`, used when folding many snapshots.
    /// Definitions are checked before any value is folded, so on error
    /// `self` is unchanged.
    pub fn absorb(&self, other: &MetricSet) -> Result<()> {
        for theirs in other.metrics() {
            if let Some(ours) = self.metrics.get(theirs.name()).map(|m| Arc::clone(m.value())) {
                if let Some(reason) = ours.desc.conflict_with(&theirs.desc) {
                    tracing::warn!(metric = %theirs.name(), %reason, "merge rejected: conflicting definitions");
                    return Err(PeerstatError::SchemaConflict {
                        name: theirs.name().to_string(),
                        reason,
                    });
                }
            }
        }
        for theirs in other.metrics() {
            let ours = self.metrics.get(theirs.name()).map(|m| Arc::clone(m.value()));
            match ours {
                Some(ours) => {
                    for (labels, value) in theirs.values() {
                        ours.combine(labels, value);
                    }
                }
                None => self.adopt(&theirs),
            }
        }
        Ok(())
    }

    fn adopt(&self, metric: &Metric) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .insert(metric.name().to_string(), Arc::new(metric.copy_with_seq(seq)));
    }

    /// Flattened (name, labels, value, help, kind) rows: metric registration
    /// order, then series encounter order.
    pub fn render(&self) -> Vec<Sample> {
        let mut out = Vec::new();
        for m in self.metrics() {
            for (labels, value) in m.values() {
                out.push(Sample {
                    name: m.name().to_string(),
                    labels,
                    value,
                    help: m.help().to_string(),
                    kind: m.kind(),
                });
            }
        }
        out
    }
}

impl Clone for MetricSet {
    fn clone(&self) -> Self {
        self.snapshot()
    }
}

/// Order-insensitive: same definitions and same series values.
impl PartialEq for MetricSet {
    fn eq(&self, other: &Self) -> bool {
        let ours = self.metrics();
        ours.len() == other.len()
            && ours.iter().all(|m| {
                other
                    .get(m.name())
                    .map(|o| m.same_as(&o))
                    .unwrap_or(false)
            })
    }
}
