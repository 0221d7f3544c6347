//! Snapshot socket server: answers sibling workers' fetches.
//!
//! One request per connection. Each connection is handled on its own task
//! and keeps no state once the response is written.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use peerstat_core::error::{PeerstatError, Result};
use peerstat_core::wire::{self, REQUEST_LEN};

use crate::snapshot::ProcessSnapshotProvider;

/// A client that connects but never sends its request is cut off after this.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Default cut-off for a client that stops reading mid-response.
pub const RESPONSE_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause after a failed `accept` (e.g. EMFILE) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Removes the socket file when dropped.
struct SocketGuard(PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.0.display(), error = %e, "socket cleanup failed");
            }
        }
    }
}

pub struct PeerServer {
    listener: UnixListener,
    guard: SocketGuard,
    max_frame_bytes: usize,
    write_timeout: Duration,
}

impl PeerServer {
    /// Bind this worker's socket. A leftover file for the same slot (a
    /// previous incarnation that died without cleanup) is replaced.
    pub async fn bind(path: &Path, max_frame_bytes: usize) -> Result<Self> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                PeerstatError::Internal(format!("create {} failed: {e}", dir.display()))
            })?;
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::info!(path = %path.display(), "replaced stale peer socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PeerstatError::Internal(format!(
                    "remove stale socket {} failed: {e}",
                    path.display()
                )))
            }
        }
        let listener = UnixListener::bind(path).map_err(|e| {
            PeerstatError::Internal(format!("bind {} failed: {e}", path.display()))
        })?;
        Ok(Self {
            listener,
            guard: SocketGuard(path.to_path_buf()),
            max_frame_bytes,
            write_timeout: RESPONSE_WRITE_TIMEOUT,
        })
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.guard.0
    }

    /// Accept loop. Returns when `shutdown` flips (or its sender drops); the
    /// socket file is removed on return.
    pub async fn run(
        self,
        provider: Arc<dyn ProcessSnapshotProvider>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(path = %self.path().display(), "peer socket serving");
        loop {
            tokio::select! {
                res = self.listener.accept() => match res {
                    Ok((stream, _)) => {
                        let provider = Arc::clone(&provider);
                        let max = self.max_frame_bytes;
                        let write_timeout = self.write_timeout;
                        tokio::spawn(async move {
                            if let Err(e) = handle(stream, provider, max, write_timeout).await {
                                tracing::debug!(error = %e, "peer request failed");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "peer socket accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(path = %self.path().display(), "peer socket closed");
    }
}

async fn handle(
    mut stream: UnixStream,
    provider: Arc<dyn ProcessSnapshotProvider>,
    max_frame_bytes: usize,
    write_timeout: Duration,
) -> Result<()> {
    let mut req = [0u8; REQUEST_LEN];
    tokio::time::timeout(REQUEST_READ_TIMEOUT, stream.read_exact(&mut req))
        .await
        .map_err(|_| PeerstatError::BadFrame("request not received in time".into()))?
        .map_err(|e| PeerstatError::BadFrame(format!("read request: {e}")))?;

    let frame = match wire::decode_request(&req) {
        Ok(_) => {
            let set = provider.snapshot();
            wire::encode_snapshot(&set, max_frame_bytes).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "snapshot not encodable");
                wire::encode_error(&e.to_string())
            })
        }
        Err(e) => wire::encode_error(&e.to_string()),
    };

    tokio::time::timeout(write_timeout, stream.write_all(&frame))
        .await
        .map_err(|_| PeerstatError::Internal("response not taken in time".into()))?
        .map_err(|e| PeerstatError::Internal(format!("write response: {e}")))?;
    let _ = stream.shutdown().await;
    Ok(())
}
