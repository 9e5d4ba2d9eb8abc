//! Patient record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a patient record.
///
/// Assigned by the local store on creation, referenced globally by
/// replication events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PatientId(pub i64);

impl std::fmt::Display for PatientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PatientId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A stored patient record.
///
/// `last_update` is the commit timestamp of the mutation that last wrote
/// the record; under the replication conflict policy it is monotonically
/// non-decreasing for the record's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    /// Record identifier.
    pub id: PatientId,
    /// Patient name.
    pub name: String,
    /// Patient age.
    pub age: u32,
    /// Free-text diagnosis.
    pub diagnosis: String,
    /// Timestamp of the mutation that last wrote this record.
    pub last_update: DateTime<Utc>,
}

impl PatientRecord {
    /// Creates a record.
    pub fn new(
        id: PatientId,
        name: impl Into<String>,
        age: u32,
        diagnosis: impl Into<String>,
        last_update: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            age,
            diagnosis: diagnosis.into(),
            last_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn patient_id_display() {
        assert_eq!(PatientId(42).to_string(), "42");
    }

    #[test]
    fn record_construction() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        let record = PatientRecord::new(PatientId(1), "Jane", 40, "flu", ts);
        assert_eq!(record.id, PatientId(1));
        assert_eq!(record.name, "Jane");
        assert_eq!(record.last_update, ts);
    }
}
