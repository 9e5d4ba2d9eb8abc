//! Canonical fixtures for store and replication tests.

use chrono::{DateTime, TimeZone, Utc};
use medsync_protocol::ChangeEvent;
use medsync_store::{PatientId, PatientRecord};

/// A fixed base timestamp; offset it with [`at`].
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
}

/// Returns `base_time` plus the given number of seconds.
pub fn at(secs: i64) -> DateTime<Utc> {
    base_time() + chrono::Duration::seconds(secs)
}

/// The canonical first patient.
pub fn jane(secs: i64) -> PatientRecord {
    PatientRecord::new(PatientId(1), "Jane", 40, "flu", at(secs))
}

/// The canonical second patient.
pub fn john(secs: i64) -> PatientRecord {
    PatientRecord::new(PatientId(2), "John", 35, "fractured wrist", at(secs))
}

/// Builds the upsert event a node would publish for a record.
pub fn upsert_event(record: &PatientRecord, origin: &str) -> ChangeEvent {
    ChangeEvent::upsert(
        record.id.0,
        record.name.clone(),
        record.age,
        record.diagnosis.clone(),
        record.last_update,
        origin,
    )
}
