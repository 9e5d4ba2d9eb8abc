//! Error types for the change bus.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Errors that can occur on the change bus.
#[derive(Error, Debug)]
pub enum BusError {
    /// Network or connection failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] medsync_protocol::ProtocolError),

    /// A queue journal operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] medsync_storage::StorageError),

    /// The broker explicitly rejected a request.
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// Another process holds the broker data directory lock.
    #[error("broker data directory is locked: {0}")]
    Locked(PathBuf),

    /// A node identifier is unusable as a queue name.
    #[error("invalid node id: {0:?}")]
    InvalidNodeId(String),
}

impl BusError {
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

    /// Returns true if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BusError::Transport { retryable, .. } => *retryable,
            BusError::Storage(_) => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        // Socket-level failures are the canonical retryable case.
        Self::transport_retryable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(BusError::transport_retryable("connection reset").is_retryable());
        assert!(!BusError::transport_fatal("version mismatch").is_retryable());
        assert!(!BusError::Rejected("bad frame".into()).is_retryable());
        assert!(!BusError::InvalidNodeId("a/b".into()).is_retryable());
    }

    #[test]
    fn io_errors_are_retryable() {
        let err: BusError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(err.is_retryable());
    }
}
