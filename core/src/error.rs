//! Error types for Vellum

use thiserror::Error;

/// Result type for Vellum operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// How a failure should be treated by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// State is corrupt or an invariant is broken; abort, never retry
    Structural,
    /// A single transferred unit failed verification; discard and re-request
    Integrity,
    /// Two snapshots disagree, or the request does not match what we hold
    Protocol,
    /// The caller-level retry budget is spent
    Exhaustion,
    /// Storage, encoding, configuration or provider failures
    Internal,
}

/// Main error type for Vellum
#[derive(Error, Debug)]
pub enum SnapshotError {
    // ============ Tree Errors ============
    #[error("Tree export incomplete: expected {expected} nodes, exported {exported}")]
    ExportIncomplete { expected: usize, exported: usize },

    #[error("No payload supplied for leaf {key}")]
    MissingPayload { key: String },

    #[error("Tree import commit failed: {reason}")]
    ImportCommitFailed { reason: String },

    #[error("Malformed tree import: {reason}")]
    MalformedImport { reason: String },

    #[error("Import target tree is not empty")]
    TreeNotEmpty,

    #[error("Tree version {0} not found")]
    VersionNotFound(i64),

    // ============ Structural Errors ============
    #[error("Snapshot has no app state node")]
    MissingAppStateNode,

    #[error("Unknown payload kind: {tag}")]
    UnknownPayloadKind { tag: u16 },

    #[error("Unknown snapshot namespace: {0}")]
    UnknownNamespaceName(String),

    #[error("No state provider registered for {tree_key}")]
    UnknownNamespace { tree_key: String },

    #[error("Provider returned payload for {actual}, expected {expected}")]
    ProviderKeyMismatch { expected: String, actual: String },

    // ============ Integrity Errors ============
    #[error("Chunk {index} out of range (expected {total} chunks)")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("Chunk {index} hash mismatch: expected {expected}, got {actual}")]
    ChunkHashMismatch {
        index: u32,
        expected: String,
        actual: String,
    },

    #[error("Snapshot is missing chunks {missing:?}")]
    MissingChunks { missing: Vec<u32> },

    #[error("Snapshot node {key} hash mismatch")]
    NodeHashMismatch { key: String },

    // ============ Protocol Errors ============
    #[error("Snapshot metadata mismatch: {reason}")]
    SnapshotMetaMismatch { reason: String },

    #[error("Snapshot hash mismatch: expected {expected}, got {actual}")]
    SnapshotHashMismatch { expected: String, actual: String },

    #[error("Snapshot format mismatch")]
    SnapshotFormatMismatch,

    #[error("Unknown snapshot format: {0}")]
    UnknownSnapshotFormat(u32),

    #[error("Unknown snapshot")]
    UnknownSnapshot,

    #[error("No snapshot for height {0}")]
    UnknownSnapshotHeight(u64),

    #[error("Snapshot was rejected: {0}")]
    SnapshotRejected(String),

    // ============ Exhaustion Errors ============
    #[error("Snapshot retry limit of {limit} reached")]
    SnapshotRetryLimit { limit: u32 },

    // ============ Provider Errors ============
    #[error("State provider {namespace} failed: {message}")]
    Provider { namespace: String, message: String },

    // ============ General Errors ============
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SnapshotError {
    /// Classify the error per the snapshot failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        use SnapshotError::*;
        match self {
            ExportIncomplete { .. }
            | MissingPayload { .. }
            | ImportCommitFailed { .. }
            | MalformedImport { .. }
            | TreeNotEmpty
            | VersionNotFound(_)
            | MissingAppStateNode
            | UnknownPayloadKind { .. }
            | UnknownNamespaceName(_)
            | UnknownNamespace { .. }
            | ProviderKeyMismatch { .. } => ErrorKind::Structural,

            ChunkOutOfRange { .. }
            | ChunkHashMismatch { .. }
            | MissingChunks { .. }
            | NodeHashMismatch { .. } => ErrorKind::Integrity,

            SnapshotMetaMismatch { .. }
            | SnapshotHashMismatch { .. }
            | SnapshotFormatMismatch
            | UnknownSnapshotFormat(_)
            | UnknownSnapshot
            | UnknownSnapshotHeight(_)
            | SnapshotRejected(_) => ErrorKind::Protocol,

            SnapshotRetryLimit { .. } => ErrorKind::Exhaustion,

            Provider { .. } | Storage(_) | Serialization(_) | Config(_) | Internal(_) | Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether the caller may discard the offending unit and try again
    /// without abandoning the snapshot
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Integrity
    }
}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::Storage(err.to_string())
    }
}

impl From<sled::Error> for SnapshotError {
    fn from(err: sled::Error) -> Self {
        SnapshotError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for SnapshotError {
    fn from(err: bincode::Error) -> Self {
        SnapshotError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_errors_are_retryable() {
        let err = SnapshotError::ChunkHashMismatch {
            index: 2,
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(err.is_retryable());
        assert!(SnapshotError::MissingChunks { missing: vec![1] }.is_retryable());
    }

    #[test]
    fn test_structural_errors_are_fatal() {
        assert_eq!(SnapshotError::MissingAppStateNode.kind(), ErrorKind::Structural);
        assert!(!SnapshotError::UnknownPayloadKind { tag: 999 }.is_retryable());
    }

    #[test]
    fn test_retry_limit_is_exhaustion() {
        let err = SnapshotError::SnapshotRetryLimit { limit: 3 };
        assert_eq!(err.kind(), ErrorKind::Exhaustion);
        assert_eq!(err.to_string(), "Snapshot retry limit of 3 reached");
    }
}
