//! Worker config loader (strict parsing).

pub mod schema;

use std::fs;

use peerstat_core::error::{PeerstatError, Result};

pub use schema::{MetricDecl, ScrapeSection, WorkerConfig, WorkerSection};

pub fn load_from_file(path: &str) -> Result<WorkerConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| PeerstatError::InvalidConfig(format!("read {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<WorkerConfig> {
    let cfg: WorkerConfig = serde_yaml::from_str(s)
        .map_err(|e| PeerstatError::InvalidConfig(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
