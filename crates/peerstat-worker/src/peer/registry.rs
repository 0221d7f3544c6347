//! Peer discovery and snapshot fetch.

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use peerstat_core::error::{PeerstatError, Result};
use peerstat_core::wire::{self, RESPONSE_HEADER_LEN};
use peerstat_core::MetricSet;

use super::parse_worker_id;

/// Last observed state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Seen on disk, never fetched.
    Unknown,
    Alive,
    /// Last fetch failed. Still retried on the next scrape; slots restart.
    Dead,
}

#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub id: u32,
    pub path: PathBuf,
    pub liveness: Liveness,
}

pub struct PeerRegistry {
    dir: PathBuf,
    prefix: String,
    fetch_timeout: Duration,
    max_frame_bytes: usize,
    liveness: DashMap<u32, Liveness>,
}

impl PeerRegistry {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        fetch_timeout: Duration,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            fetch_timeout,
            max_frame_bytes,
            liveness: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Scan the socket directory. A missing directory means no peers.
    /// Handles are sorted by worker id.
    pub async fn discover(&self) -> Vec<PeerHandle> {
        let mut rd = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) => {
                tracing::debug!(dir = %self.dir.display(), error = %e, "peer directory unreadable");
                return Vec::new();
            }
        };

        let mut peers = Vec::new();
        loop {
            let entry = match rd.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(dir = %self.dir.display(), error = %e, "peer scan interrupted");
                    break;
                }
            };
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| parse_worker_id(n, &self.prefix)) else {
                continue;
            };
            match entry.file_type().await {
                Ok(t) if t.is_socket() => {}
                _ => continue,
            }
            let liveness = self
                .liveness
                .get(&id)
                .map(|l| *l.value())
                .unwrap_or(Liveness::Unknown);
            peers.push(PeerHandle {
                id,
                path: entry.path(),
                liveness,
            });
        }

        // Forget ids whose socket is gone.
        self.liveness
            .retain(|id, _| peers.iter().any(|p| p.id == *id));
        peers.sort_by_key(|p| p.id);
        peers
    }

    /// Fetch a peer's snapshot within the configured per-peer timeout.
    pub async fn fetch(&self, peer: &PeerHandle) -> Result<MetricSet> {
        self.fetch_within(peer, self.fetch_timeout).await
    }

    /// Fetch with an explicit budget. Every failure is `PeerUnreachable`;
    /// a timed-out request is dropped, which closes the connection.
    pub async fn fetch_within(&self, peer: &PeerHandle, budget: Duration) -> Result<MetricSet> {
        let res = tokio::time::timeout(budget, request_snapshot(&peer.path, self.max_frame_bytes)).await;
        let res = match res {
            Ok(Ok(set)) => Ok(set),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}ms", budget.as_millis())),
        };

        match res {
            Ok(set) => {
                self.liveness.insert(peer.id, Liveness::Alive);
                Ok(set)
            }
            Err(reason) => {
                self.liveness.insert(peer.id, Liveness::Dead);
                Err(PeerstatError::PeerUnreachable {
                    peer: peer.path.display().to_string(),
                    reason,
                })
            }
        }
    }
}

fn io_err(stage: &'static str) -> impl Fn(std::io::Error) -> PeerstatError {
    move |e| PeerstatError::Internal(format!("{stage}: {e}"))
}

async fn request_snapshot(path: &Path, max_frame_bytes: usize) -> Result<MetricSet> {
    let mut stream = UnixStream::connect(path).await.map_err(io_err("connect"))?;
    stream
        .write_all(&wire::encode_request())
        .await
        .map_err(io_err("write request"))?;

    let mut header = [0u8; RESPONSE_HEADER_LEN];
    stream
        .read_exact(&mut header)
        .await
        .map_err(io_err("read header"))?;
    let header = wire::decode_response_header(&header, max_frame_bytes)?;

    let mut payload = BytesMut::zeroed(header.len);
    stream
        .read_exact(&mut payload)
        .await
        .map_err(io_err("read payload"))?;
    wire::decode_response(header, payload.freeze())
}
