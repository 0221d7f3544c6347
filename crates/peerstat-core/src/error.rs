//! Shared error type across peerstat crates.

use thiserror::Error;

/// Stable error codes (logs, HTTP error bodies, tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Metric registered twice with incompatible definitions.
    SchemaConflict,
    /// Value set for a name that was never registered.
    UnknownMetric,
    /// Call site expected a different metric kind.
    TypeMismatch,
    /// Label keys do not match the declared keys.
    InvalidLabels,
    /// Value not acceptable for the metric kind.
    InvalidValue,
    /// Peer socket missing, refused, or timed out.
    PeerUnreachable,
    /// Application-wide store query failed.
    StoreQueryFailure,
    /// Malformed frame on the peer socket.
    BadFrame,
    /// Unsupported wire protocol version.
    UnsupportedVersion,
    /// Frame length above the configured limit.
    FrameTooLarge,
    /// Invalid configuration.
    InvalidConfig,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::SchemaConflict => "SCHEMA_CONFLICT",
            ErrorCode::UnknownMetric => "UNKNOWN_METRIC",
            ErrorCode::TypeMismatch => "TYPE_MISMATCH",
            ErrorCode::InvalidLabels => "INVALID_LABELS",
            ErrorCode::InvalidValue => "INVALID_VALUE",
            ErrorCode::PeerUnreachable => "PEER_UNREACHABLE",
            ErrorCode::StoreQueryFailure => "STORE_QUERY_FAILURE",
            ErrorCode::BadFrame => "BAD_FRAME",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::FrameTooLarge => "FRAME_TOO_LARGE",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, PeerstatError>;

/// Unified error type used by core and worker.
#[derive(Debug, Error)]
pub enum PeerstatError {
    #[error("schema conflict for {name}: {reason}")]
    SchemaConflict { name: String, reason: String },
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
    #[error("type mismatch for {name}: expected {expected}, found {actual}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("invalid labels for {name}: {reason}")]
    InvalidLabels { name: String, reason: String },
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: f64 },
    #[error("peer unreachable ({peer}): {reason}")]
    PeerUnreachable { peer: String, reason: String },
    #[error("store query failed: {0}")]
    StoreQueryFailure(String),
    #[error("bad frame: {0}")]
    BadFrame(String),
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl PeerstatError {
    /// Map an error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            PeerstatError::SchemaConflict { .. } => ErrorCode::SchemaConflict,
            PeerstatError::UnknownMetric(_) => ErrorCode::UnknownMetric,
            PeerstatError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            PeerstatError::InvalidLabels { .. } => ErrorCode::InvalidLabels,
            PeerstatError::InvalidValue { .. } => ErrorCode::InvalidValue,
            PeerstatError::PeerUnreachable { .. } => ErrorCode::PeerUnreachable,
            PeerstatError::StoreQueryFailure(_) => ErrorCode::StoreQueryFailure,
            PeerstatError::BadFrame(_) => ErrorCode::BadFrame,
            PeerstatError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            PeerstatError::FrameTooLarge { .. } => ErrorCode::FrameTooLarge,
            PeerstatError::InvalidConfig(_) => ErrorCode::InvalidConfig,
            PeerstatError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Routine failures that callers drop instead of escalating.
    pub fn is_routine(&self) -> bool {
        matches!(self, PeerstatError::PeerUnreachable { .. })
    }
}
