use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use peerstat_core::error::{PeerstatError, Result};
use peerstat_core::labels::{is_valid_label_key, is_valid_metric_name};
use peerstat_core::wire::DEFAULT_MAX_FRAME_BYTES;
use peerstat_core::{Descriptor, MergePolicy, MetricKind};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    pub version: u32,

    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub scrape: ScrapeSection,

    #[serde(default)]
    pub metrics: Vec<MetricDecl>,
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(PeerstatError::InvalidConfig(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.worker.validate()?;
        self.scrape.validate()?;

        let mut seen = std::collections::HashSet::new();
        for m in &self.metrics {
            m.validate()?;
            if !seen.insert(m.name.as_str()) {
                return Err(PeerstatError::InvalidConfig(format!(
                    "metric {} declared twice",
                    m.name
                )));
            }
        }
        Ok(())
    }

    /// Declared application schema, in config order.
    pub fn descriptors(&self) -> Vec<Descriptor> {
        self.metrics.iter().map(MetricDecl::descriptor).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSection {
    /// Stable slot identity, retained across restarts of the slot.
    #[serde(default)]
    pub id: u32,

    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    #[serde(default = "default_socket_prefix")]
    pub socket_prefix: String,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            id: 0,
            socket_dir: default_socket_dir(),
            socket_prefix: default_socket_prefix(),
        }
    }
}

impl WorkerSection {
    pub fn validate(&self) -> Result<()> {
        if self.socket_prefix.is_empty() || self.socket_prefix.contains('/') {
            return Err(PeerstatError::InvalidConfig(
                "worker.socket_prefix must be non-empty and must not contain '/'".into(),
            ));
        }
        if self.socket_dir.as_os_str().is_empty() {
            return Err(PeerstatError::InvalidConfig(
                "worker.socket_dir must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_socket_dir() -> PathBuf {
    std::env::temp_dir().join("peerstat")
}
fn default_socket_prefix() -> String {
    "worker-".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScrapeSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ScrapeSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            deadline_ms: default_deadline_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ScrapeSection {
    pub fn validate(&self) -> Result<()> {
        if !(50..=10_000).contains(&self.fetch_timeout_ms) {
            return Err(PeerstatError::InvalidConfig(
                "scrape.fetch_timeout_ms must be between 50 and 10000".into(),
            ));
        }
        if self.deadline_ms < self.fetch_timeout_ms || self.deadline_ms > 30_000 {
            return Err(PeerstatError::InvalidConfig(
                "scrape.deadline_ms must be >= fetch_timeout_ms and <= 30000".into(),
            ));
        }
        if !(1024..=256 * 1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(PeerstatError::InvalidConfig(
                "scrape.max_frame_bytes must be between 1KiB and 256MiB".into(),
            ));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

fn default_listen() -> String {
    "127.0.0.1:9394".into()
}
fn default_fetch_timeout_ms() -> u64 {
    1000
}
fn default_deadline_ms() -> u64 {
    3000
}
fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricDecl {
    pub name: String,
    pub kind: MetricKind,
    pub help: String,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub merge: Option<MergePolicy>,
}

impl MetricDecl {
    pub fn validate(&self) -> Result<()> {
        if !is_valid_metric_name(&self.name) {
            return Err(PeerstatError::InvalidConfig(format!(
                "invalid metric name: {}",
                self.name
            )));
        }
        if let Some(bad) = self
            .labels
            .iter()
            .flatten()
            .find(|k| !is_valid_label_key(k))
        {
            return Err(PeerstatError::InvalidConfig(format!(
                "metric {}: invalid label key {bad}",
                self.name
            )));
        }
        if self.kind == MetricKind::Counter && matches!(self.merge, Some(p) if p != MergePolicy::Sum) {
            return Err(PeerstatError::InvalidConfig(format!(
                "metric {}: counters only merge by sum",
                self.name
            )));
        }
        Ok(())
    }

    pub fn descriptor(&self) -> Descriptor {
        let mut d = Descriptor::new(self.name.clone(), self.kind, self.help.clone())
            .with_merge(self.merge.unwrap_or_default());
        if let Some(keys) = &self.labels {
            d = d.with_labels(keys.iter().cloned());
        }
        d
    }
}
