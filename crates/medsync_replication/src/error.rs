//! Error types for the replication layer.

use medsync_store::PatientId;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur in the replication layer.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// A wire event is malformed or incomplete.
    ///
    /// Contained in the consumer loop: the event is logged and dropped.
    #[error(transparent)]
    Validation(#[from] medsync_protocol::ProtocolError),

    /// The local store rejected or failed an operation.
    #[error("store error: {0}")]
    Store(#[from] medsync_store::StoreError),

    /// The bus is unreachable or a connection was lost.
    ///
    /// Triggers retry with backoff, never a process exit.
    #[error("bus error: {0}")]
    Bus(#[from] medsync_bus::BusError),

    /// A local mutation targeted an absent record.
    ///
    /// Remote `delete` events on absent records are a no-op instead.
    #[error("patient {0} not found")]
    NotFound(PatientId),
}

impl ReplicationError {
    /// Returns true if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplicationError::Bus(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if the error is permanent for this event, so the
    /// consumer should acknowledge and move on rather than force a
    /// redelivery that would fail the same way.
    pub fn is_discardable(&self) -> bool {
        matches!(
            self,
            ReplicationError::Validation(_)
                | ReplicationError::Store(medsync_store::StoreError::DuplicateId(_))
                | ReplicationError::NotFound(_)
        )
    }
}
