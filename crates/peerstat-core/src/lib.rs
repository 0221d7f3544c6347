//! peerstat core: metric data model, merge, exposition, and the snapshot
//! wire codec.
//!
//! This crate carries no transport or runtime dependencies. The worker crate
//! adds sockets, aggregation, and the HTTP scrape surface on top of it.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here.
//! All fallible paths surface as `PeerstatError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod exposition;
pub mod labels;
pub mod metric;
pub mod wire;

pub use error::{ErrorCode, PeerstatError, Result};
pub use exposition::render_text;
pub use labels::LabelSet;
pub use metric::{Descriptor, MergePolicy, Metric, MetricKind, MetricSet, Sample, Value};
