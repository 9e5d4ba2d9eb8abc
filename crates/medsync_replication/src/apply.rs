//! The apply engine: remote events onto the local store.

use crate::error::{ReplicationError, ReplicationResult};
use medsync_protocol::{ChangeEvent, EventAction, ProtocolError};
use medsync_store::{PatientId, PatientRecord, PatientStore};
use std::sync::Arc;

/// What applying an event did to local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// An `upsert` created the record.
    Created,
    /// An `upsert` replaced an older version of the record.
    Replaced,
    /// An `upsert` carried an equal or older timestamp; state unchanged.
    Stale,
    /// A `delete` removed the record.
    Deleted,
    /// A `delete` targeted an absent record; state unchanged.
    AbsentDelete,
    /// A `clear_all` removed this many records.
    Cleared(usize),
}

impl ApplyOutcome {
    /// Returns true if the event changed local state.
    pub fn mutated(&self) -> bool {
        !matches!(self, ApplyOutcome::Stale | ApplyOutcome::AbsentDelete)
            && !matches!(self, ApplyOutcome::Cleared(0))
    }
}

/// Applies remote change events to the local store, idempotently.
///
/// Every apply runs inside one store transaction, so the
/// read-compare-write below is atomic with respect to concurrent local
/// mutations.
///
/// State transitions per record id:
///
/// - `upsert` on an absent id creates the record
/// - `upsert` on a present id replaces it only if the event's
///   `last_update` is strictly newer (last-write-wins); equal or older
///   events are no-ops, which is what makes redelivery and cross-origin
///   reordering safe
/// - `delete` removes the record; deleting an absent id is a no-op
/// - `clear_all` unconditionally empties the store, with no timestamp
///   or origin check
pub struct ApplyEngine {
    store: Arc<PatientStore>,
}

impl ApplyEngine {
    /// Creates an engine over the node's store.
    pub fn new(store: Arc<PatientStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<PatientStore> {
        &self.store
    }

    /// Applies one validated event, returning what changed.
    pub fn apply(&self, event: &ChangeEvent) -> ReplicationResult<ApplyOutcome> {
        event.validate()?;

        let outcome = match event.action {
            EventAction::Upsert => self.apply_upsert(event)?,
            EventAction::Delete => self.apply_delete(event)?,
            EventAction::ClearAll => {
                let removed = self.store.transaction(|txn| Ok(txn.clear_all()))?;
                ApplyOutcome::Cleared(removed)
            }
        };

        tracing::debug!(
            action = %event.action,
            id = ?event.id,
            origin = %event.origin,
            ?outcome,
            "applied remote event"
        );
        Ok(outcome)
    }

    fn apply_upsert(&self, event: &ChangeEvent) -> ReplicationResult<ApplyOutcome> {
        let incoming = record_from_upsert(event)?;

        let outcome = self.store.transaction(|txn| {
            Ok(match txn.get(incoming.id) {
                None => {
                    txn.upsert(incoming.clone());
                    ApplyOutcome::Created
                }
                Some(existing) => {
                    // Last-write-wins: strictly newer timestamps only,
                    // so redelivered or reordered events cannot clobber
                    // newer local state with stale fields.
                    if incoming.last_update > existing.last_update {
                        txn.upsert(incoming.clone());
                        ApplyOutcome::Replaced
                    } else {
                        ApplyOutcome::Stale
                    }
                }
            })
        })?;

        Ok(outcome)
    }

    fn apply_delete(&self, event: &ChangeEvent) -> ReplicationResult<ApplyOutcome> {
        let id = required(event.id, "id")?;

        let existed = self
            .store
            .transaction(|txn| Ok(txn.delete(PatientId(id))))?;

        Ok(if existed {
            ApplyOutcome::Deleted
        } else {
            ApplyOutcome::AbsentDelete
        })
    }
}

fn record_from_upsert(event: &ChangeEvent) -> ReplicationResult<PatientRecord> {
    Ok(PatientRecord {
        id: PatientId(required(event.id, "id")?),
        name: required(event.name.clone(), "name")?,
        age: required(event.age, "age")?,
        diagnosis: required(event.diagnosis.clone(), "diagnosis")?,
        last_update: required(event.last_update, "last_update")?,
    })
}

fn required<T>(field: Option<T>, name: &str) -> ReplicationResult<T> {
    field.ok_or_else(|| {
        ReplicationError::Validation(ProtocolError::validation(format!(
            "upsert event missing {name}"
        )))
    })
}
