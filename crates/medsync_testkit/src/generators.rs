//! Proptest strategies for replication events.

use crate::fixtures::at;
use medsync_protocol::ChangeEvent;
use proptest::prelude::*;

/// Strategy for plausible patient names.
pub fn arb_name() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{2,11}( [A-Z][a-z]{2,11})?"
}

/// Strategy for upsert events over a small id space.
///
/// Every generated event has a distinct, strictly increasing offset
/// folded in by [`upsert_series`]; on its own this strategy leaves the
/// timestamp at offset zero.
pub fn arb_upsert(max_id: i64, origin: &'static str) -> impl Strategy<Value = ChangeEvent> {
    (1..=max_id, arb_name(), 0u32..110, "[a-z ]{3,20}").prop_map(
        move |(id, name, age, diagnosis)| {
            ChangeEvent::upsert(id, name, age, diagnosis, at(0), origin)
        },
    )
}

/// Strategy for a series of upserts with unique, increasing timestamps.
///
/// Unique timestamps matter: last-write-wins is strictly-newer-only, so
/// ties are kept by whichever side saw them first and order-independence
/// only holds when no two events for one id carry equal timestamps.
pub fn upsert_series(
    len: usize,
    max_id: i64,
    origin: &'static str,
) -> impl Strategy<Value = Vec<ChangeEvent>> {
    proptest::collection::vec(arb_upsert(max_id, origin), 1..=len).prop_map(|mut events| {
        for (offset, event) in events.iter_mut().enumerate() {
            event.last_update = Some(at(offset as i64));
        }
        events
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_upserts_are_valid(event in arb_upsert(10, "hospital_a")) {
            event.validate().unwrap();
        }

        #[test]
        fn series_has_unique_timestamps(events in upsert_series(16, 4, "hospital_a")) {
            let mut stamps: Vec<_> = events.iter().map(|e| e.last_update).collect();
            stamps.sort();
            stamps.dedup();
            prop_assert_eq!(stamps.len(), events.len());
        }
    }
}
