//! Error types for protocol operations.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A wire event is malformed or missing fields required by its action.
    ///
    /// Consumers drop and log these; they are never fatal.
    #[error("invalid event: {0}")]
    Validation(String),

    /// A broker frame could not be encoded or decoded.
    #[error("frame error: {0}")]
    Frame(String),

    /// A frame's declared length exceeds the maximum allowed size.
    #[error("frame too large: {len} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Declared frame body length.
        len: usize,
        /// Maximum accepted body length.
        max: usize,
    },
}

impl ProtocolError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a frame error.
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::validation("upsert event missing id");
        assert_eq!(err.to_string(), "invalid event: upsert event missing id");

        let err = ProtocolError::FrameTooLarge { len: 2048, max: 1024 };
        assert!(err.to_string().contains("2048"));
        assert!(err.to_string().contains("1024"));
    }
}
