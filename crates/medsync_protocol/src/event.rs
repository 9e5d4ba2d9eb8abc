//! Replication events.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current replication protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Type of mutation carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// A record was created or updated.
    Upsert,
    /// A record was deleted.
    Delete,
    /// Every record was removed.
    ClearAll,
}

impl EventAction {
    /// Returns the wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Upsert => "upsert",
            EventAction::Delete => "delete",
            EventAction::ClearAll => "clear_all",
        }
    }
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A patient-record mutation broadcast between nodes.
///
/// `ChangeEvent` is the wire representation of a single committed local
/// mutation. Which fields must be present depends on `action`:
///
/// - `upsert`: `id`, `name`, `age`, `diagnosis`, `last_update`
/// - `delete`: `id`
/// - `clear_all`: none of the record fields
///
/// Every event carries a non-empty `origin` naming the node that produced
/// it; consumers use it to discard their own echoes. `last_update` is the
/// commit timestamp of the originating mutation and drives last-write-wins
/// conflict resolution on the receiving side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The kind of mutation.
    pub action: EventAction,
    /// Record identifier. Required for `upsert`/`delete`.
    #[serde(default)]
    pub id: Option<i64>,
    /// Patient name. Present for `upsert`.
    #[serde(default)]
    pub name: Option<String>,
    /// Patient age. Present for `upsert`.
    #[serde(default)]
    pub age: Option<u32>,
    /// Free-text diagnosis. Present for `upsert`.
    #[serde(default)]
    pub diagnosis: Option<String>,
    /// Commit timestamp of the originating mutation. Absent for `clear_all`.
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    /// Identifier of the node that produced this event.
    pub origin: String,
    /// Correlation id for tracing an event across nodes. Assigned on
    /// creation; a fresh one is generated when absent from the wire.
    #[serde(default = "Uuid::new_v4")]
    pub event_id: Uuid,
}

impl ChangeEvent {
    /// Creates an `upsert` event for a committed create or update.
    pub fn upsert(
        id: i64,
        name: impl Into<String>,
        age: u32,
        diagnosis: impl Into<String>,
        last_update: DateTime<Utc>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            action: EventAction::Upsert,
            id: Some(id),
            name: Some(name.into()),
            age: Some(age),
            diagnosis: Some(diagnosis.into()),
            last_update: Some(last_update),
            origin: origin.into(),
            event_id: Uuid::new_v4(),
        }
    }

    /// Creates a `delete` event for a committed removal.
    pub fn delete(id: i64, origin: impl Into<String>) -> Self {
        Self {
            action: EventAction::Delete,
            id: Some(id),
            name: None,
            age: None,
            diagnosis: None,
            last_update: None,
            origin: origin.into(),
            event_id: Uuid::new_v4(),
        }
    }

    /// Creates a `clear_all` event.
    pub fn clear_all(origin: impl Into<String>) -> Self {
        Self {
            action: EventAction::ClearAll,
            id: None,
            name: None,
            age: None,
            diagnosis: None,
            last_update: None,
            origin: origin.into(),
            event_id: Uuid::new_v4(),
        }
    }

    /// Encodes to JSON wire bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| ProtocolError::frame(format!("failed to encode event: {e}")))
    }

    /// Decodes from JSON wire bytes and validates per-action fields.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let event: ChangeEvent = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::validation(format!("malformed event JSON: {e}")))?;
        event.validate()?;
        Ok(event)
    }

    /// Checks that the fields required by `action` are present.
    ///
    /// `clear_all` requires none of the record fields. Extra fields are
    /// tolerated for every action.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.origin.is_empty() {
            return Err(ProtocolError::validation("event has empty origin"));
        }

        match self.action {
            EventAction::Upsert => {
                if self.id.is_none() {
                    return Err(ProtocolError::validation("upsert event missing id"));
                }
                if self.name.is_none() {
                    return Err(ProtocolError::validation("upsert event missing name"));
                }
                if self.age.is_none() {
                    return Err(ProtocolError::validation("upsert event missing age"));
                }
                if self.diagnosis.is_none() {
                    return Err(ProtocolError::validation("upsert event missing diagnosis"));
                }
                if self.last_update.is_none() {
                    return Err(ProtocolError::validation("upsert event missing last_update"));
                }
            }
            EventAction::Delete => {
                if self.id.is_none() {
                    return Err(ProtocolError::validation("delete event missing id"));
                }
            }
            EventAction::ClearAll => {}
        }

        Ok(())
    }

    /// Returns true if this event was produced by the given node.
    pub fn originated_by(&self, node: &str) -> bool {
        self.origin == node
    }
}
