//! Core error taxonomy

use thiserror::Error;

/// Errors produced by the transport layer, the engine client, and the store.
///
/// Every variant is classified as transient or permanent; the store only
/// retries transient failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Could not reach the engine (socket missing, connect refused, channel dropped)
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication was rejected (HTTP 401, or SSH key auth failure)
    #[error("unauthorized")]
    Unauthorized,

    /// The requested resource does not exist (HTTP 404)
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine refused the operation in its current state (HTTP 409)
    #[error("conflict: {0}")]
    Conflict(String),

    /// The engine reported an internal failure (HTTP 5xx)
    #[error("engine error: {0}")]
    ServerError(String),

    /// A host configuration is missing required fields or credentials
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The request exceeded its deadline
    #[error("request timed out")]
    Timeout,

    /// Malformed HTTP framing (status line, headers, chunk sizes)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A response body could not be decoded
    #[error("parse error: {0}")]
    ParseError(String),

    /// The operation was cancelled (host switch, shutdown)
    #[error("operation cancelled")]
    Cancelled,

    /// A declared but unavailable feature was requested
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The engine returned a status code outside the mapped set
    #[error("unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },
}

impl EngineError {
    /// Whether a retry of the same operation could plausibly succeed.
    ///
    /// Connection failures, timeouts, and engine-side 5xx responses are
    /// transient; everything else is not. `Cancelled` is deliberately not
    /// transient so cancellation never triggers a retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::ConnectionFailed(_) | EngineError::Timeout | EngineError::ServerError(_)
        )
    }

    /// Whether this error is a cancellation, which is neither a success nor
    /// a failure for failure-gate purposes.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Map an I/O error from a socket operation into the taxonomy with a
    /// readable message.
    pub(crate) fn from_io(err: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => {
                EngineError::ConnectionFailed(format!("{context}: no such socket"))
            }
            ErrorKind::PermissionDenied => {
                EngineError::ConnectionFailed(format!("{context}: permission denied"))
            }
            ErrorKind::ConnectionRefused => {
                EngineError::ConnectionFailed(format!("{context}: connection refused"))
            }
            ErrorKind::TimedOut => EngineError::Timeout,
            ErrorKind::UnexpectedEof => {
                EngineError::ProtocolError(format!("{context}: unexpected end of stream"))
            }
            _ => EngineError::ConnectionFailed(format!("{context}: {err}")),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::ParseError(err.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
