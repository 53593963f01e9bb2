//! Error types for vfsync core.

use std::io;
use thiserror::Error;
use vfsync_protocol::ChangeId;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in document, history and repository operations.
///
/// A missing path is not an error: lookups return `Option`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] vfsync_storage::StorageError),

    /// Encoding or decoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] vfsync_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A change references parents this replica has never seen.
    ///
    /// Not fatal: the caller is expected to resynchronize the full history.
    #[error("causal gap: {} parent change(s) missing", missing.len())]
    ConflictRejected {
        /// Parent ids absent from the local history.
        missing: Vec<ChangeId>,
    },

    /// A heads value or lookup named a change that is not in the history.
    #[error("unknown change {id}")]
    UnknownChange {
        /// The unknown id.
        id: ChangeId,
    },

    /// A path could not be used as a file key.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// Offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The persisted history failed verification.
    #[error("history corrupted at offset {offset}: {message}")]
    HistoryCorrupted {
        /// Byte offset of the bad record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The dependency manifest could not be rendered.
    #[error("manifest error: {message}")]
    Manifest {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a conflict error for the given missing parents.
    #[must_use]
    pub fn conflict_rejected(missing: Vec<ChangeId>) -> Self {
        Self::ConflictRejected { missing }
    }

    /// Creates a history corruption error.
    pub fn history_corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::HistoryCorrupted {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller should answer with a full resync.
    #[must_use]
    pub const fn requires_resync(&self) -> bool {
        matches!(self, Self::ConflictRejected { .. })
    }
}
