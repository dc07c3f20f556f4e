//! Error types for the engine client.
//!
//! Errors are categorized by where they surface:
//! - transport and handshake failures come out of session establishment
//! - [`DocklineError::Api`] comes out of ordinary request/response calls
//! - [`DocklineError::SessionClosed`] and [`DocklineError::Io`] come out of
//!   an established session's `send`
//!
//! Premature end of a log stream is never an error; the stream just ends.

use std::io;
use thiserror::Error;

/// Result alias used across the workspace.
pub type DocklineResult<T> = Result<T, DocklineError>;

/// Errors that can occur while talking to the engine.
///
/// ```ignore
/// match client.exec().start_interactive(&id, opts).await {
///     Err(DocklineError::Handshake { status }) => { /* engine refused, maybe retry */ }
///     Err(DocklineError::Connection(_)) => { /* engine not reachable */ }
///     _ => {}
/// }
/// ```
#[derive(Debug, Error)]
pub enum DocklineError {
    /// Transport could not be opened, or failed before a handshake attempt.
    #[error("connection error: {0}")]
    Connection(String),

    /// Engine answered the upgrade request with something other than 101/200.
    #[error("engine hijack failed: HTTP {status}")]
    Handshake { status: u16 },

    /// Malformed or truncated HTTP response head.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation on a session after `close()` or after the engine ended it.
    #[error("session closed")]
    SessionClosed,

    /// Engine returned a non-2xx status on an ordinary request.
    #[error("engine API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid client configuration.
    #[error("config: {0}")]
    Config(String),

    /// Caller input rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Read/write/flush failure on an established connection.
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// JSON body could not be encoded or decoded.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal invariant violated.
    #[error("internal: {0}")]
    Internal(String),
}

impl DocklineError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            DocklineError::Handshake { status } | DocklineError::Api { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// True for failures that happened before any byte reached the engine.
    pub fn is_connection(&self) -> bool {
        matches!(self, DocklineError::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_error_mentions_status() {
        let err = DocklineError::Handshake { status: 500 };
        assert!(err.to_string().contains("500"));
        assert_eq!(err.status(), Some(500));
    }

    #[test]
    fn test_api_error_carries_message() {
        let err = DocklineError::Api {
            status: 404,
            message: "No such container: abc".to_string(),
        };
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("No such container"));
    }

    #[test]
    fn test_io_error_has_no_status() {
        let err: DocklineError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(err.status().is_none());
        assert!(!err.is_connection());
    }
}
