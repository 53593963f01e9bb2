//! Error types for the sync engine.

use thiserror::Error;
use vfsync_core::CoreError;
use vfsync_protocol::ProtocolError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while talking to a provider.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The adapter could not be reached after every allowed attempt.
    #[error("connection failed after {attempts} attempt(s): {message}")]
    Connection {
        /// Attempts made.
        attempts: u32,
        /// Last error seen.
        message: String,
    },

    /// Network or channel failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// No response within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// No session is open.
    #[error("not connected to provider")]
    NotConnected,

    /// Malformed or unexpected message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The backend reported a failure for this request.
    #[error("backend error: {0}")]
    Backend(String),

    /// The watcher missed events; its next poll continues from `cursor`
    /// but everything before it must be rescanned.
    #[error("watcher overflowed, resuming at cursor {cursor}")]
    WatchOverflow {
        /// Cursor the watcher resumes from.
        cursor: u64,
    },

    /// Document error while folding changes in.
    #[error("document error: {0}")]
    Core(#[from] CoreError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::NotConnected | SyncError::Connection { .. } => true,
            _ => false,
        }
    }

    /// Whether the session should be considered lost.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. } | SyncError::Timeout | SyncError::NotConnected
        )
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::transport_retryable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("bad address").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::Backend("exit 1".into()).is_retryable());
        assert!(!SyncError::Protocol("garbage".into()).is_retryable());
        assert!(!SyncError::WatchOverflow { cursor: 9 }.is_connection_loss());
    }

    #[test]
    fn io_timeouts_map_to_timeout() {
        let err: SyncError = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(err, SyncError::Timeout));
        let err: SyncError = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "rst").into();
        assert!(err.is_connection_loss());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Connection {
            attempts: 3,
            message: "refused".into(),
        };
        assert_eq!(err.to_string(), "connection failed after 3 attempt(s): refused");
        assert_eq!(SyncError::NotConnected.to_string(), "not connected to provider");
    }
}
