//! Sibling worker discovery and the snapshot socket transport.
//!
//! Each worker binds `<socket_dir>/<prefix><id>.sock`. Discovery is a scan
//! of that directory; there is no coordinator.

pub mod registry;
pub mod server;

use std::path::{Path, PathBuf};

pub use registry::{Liveness, PeerHandle, PeerRegistry};
pub use server::PeerServer;

const SOCKET_SUFFIX: &str = ".sock";

pub fn socket_path(dir: &Path, prefix: &str, id: u32) -> PathBuf {
    dir.join(format!("{prefix}{id}{SOCKET_SUFFIX}"))
}

/// Worker id encoded in a socket file name, if it follows the convention.
pub fn parse_worker_id(file_name: &str, prefix: &str) -> Option<u32> {
    file_name
        .strip_prefix(prefix)?
        .strip_suffix(SOCKET_SUFFIX)?
        .parse()
        .ok()
}
