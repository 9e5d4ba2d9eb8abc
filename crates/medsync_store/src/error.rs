//! Error types for the patient store.

use crate::patient::PatientId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the patient store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] medsync_storage::StorageError),

    /// I/O failure outside the storage backend (directory, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another process holds the store directory lock.
    #[error("store directory is locked: {0}")]
    Locked(PathBuf),

    /// The journal replayed but its records could not be interpreted.
    #[error("store journal corrupt: {0}")]
    Corrupt(String),

    /// Insertion would violate the unique-id constraint.
    ///
    /// The enclosing transaction is rolled back; callers treat this as
    /// non-fatal.
    #[error("duplicate patient id {0}")]
    DuplicateId(PatientId),

    /// A record could not be encoded for the journal.
    #[error("codec error: {0}")]
    Codec(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::DuplicateId(PatientId(7));
        assert_eq!(err.to_string(), "duplicate patient id 7");
    }
}
