//! Error types for the backend server.

use thiserror::Error;
use vfsync_protocol::ProtocolError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the backend server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A request arrived before `Hello`.
    #[error("no session: send hello first")]
    NoSession,

    /// Protocol version mismatch.
    #[error("protocol version mismatch: server={server}, client={client}")]
    ProtocolMismatch {
        /// Version spoken by the server.
        server: u16,
        /// Version announced by the client.
        client: u16,
    },

    /// Frame encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if the client caused the error.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::NoSession
                | ServerError::ProtocolMismatch { .. }
                | ServerError::Protocol(_)
        )
    }

    /// Returns true if the server failed.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_) | ServerError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::NoSession.is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
    }

    #[test]
    fn error_display() {
        let err = ServerError::ProtocolMismatch {
            server: 1,
            client: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("server=1"));
        assert!(msg.contains("client=7"));
    }
}
