//! The transactional patient store.
//!
//! File system layout of a store directory:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK            # Advisory lock for single-process ownership
//! └─ patients.log    # Append-only journal of committed transactions
//! ```

use crate::error::{StoreError, StoreResult};
use crate::patient::{PatientId, PatientRecord};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use medsync_storage::{FileBackend, InMemoryBackend, Journal};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "patients.log";
const JOURNAL_TEMP: &str = "patients.log.tmp";

/// Journal size beyond which a commit schedules compaction.
const COMPACT_THRESHOLD_BYTES: u64 = 4 * 1024 * 1024;

/// One mutation within a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum StoreOp {
    Upsert(PatientRecord),
    Delete(PatientId),
    Clear,
}

struct StoreInner {
    records: BTreeMap<PatientId, PatientRecord>,
    journal: Journal,
    next_id: i64,
}

/// The node-local patient store.
///
/// The full record set lives in memory; every committed transaction is
/// appended to the journal and fsynced before the commit returns, so a
/// mutation acknowledged to a caller survives restart. On open the
/// journal is replayed to rebuild the image.
///
/// # Transactions
///
/// All writes go through [`PatientStore::transaction`]. The closure runs
/// under the store's write lock with a staged view of its own mutations;
/// returning an error discards the staged mutations entirely. This lock
/// is the only serialization point between the local mutation path and
/// the replication consumer, which is what makes read-compare-write
/// conflict checks atomic.
pub struct PatientStore {
    inner: RwLock<StoreInner>,
    dir: Option<PathBuf>,
    _lock_file: Option<File>,
}

impl PatientStore {
    /// Opens or creates a store in the given directory.
    ///
    /// Acquires the directory's advisory lock; fails with
    /// [`StoreError::Locked`] if another process holds it.
    pub fn open(path: &Path) -> StoreResult<Self> {
        fs::create_dir_all(path)?;

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked(path.to_path_buf()))?;

        let backend = FileBackend::open(&path.join(JOURNAL_FILE))?;
        let inner = Self::replay(Journal::open(Box::new(backend))?)?;

        Ok(Self {
            inner: RwLock::new(inner),
            dir: Some(path.to_path_buf()),
            _lock_file: Some(lock_file),
        })
    }

    /// Opens an ephemeral in-memory store, for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let inner = Self::replay(Journal::open(Box::new(InMemoryBackend::new()))?)?;
        Ok(Self {
            inner: RwLock::new(inner),
            dir: None,
            _lock_file: None,
        })
    }

    fn replay((journal, payloads): (Journal, Vec<Vec<u8>>)) -> StoreResult<StoreInner> {
        let mut records = BTreeMap::new();
        for payload in payloads {
            let ops: Vec<StoreOp> = ciborium::de::from_reader(&payload[..])
                .map_err(|e| StoreError::Corrupt(format!("unreadable journal record: {e}")))?;
            for op in ops {
                apply_op(&mut records, op);
            }
        }

        let next_id = records.keys().next_back().map(|id| id.0 + 1).unwrap_or(1);

        Ok(StoreInner {
            records,
            journal,
            next_id,
        })
    }

    /// Returns the record with the given id, if present.
    pub fn get(&self, id: PatientId) -> Option<PatientRecord> {
        self.inner.read().records.get(&id).cloned()
    }

    /// Returns every record, ordered by id.
    pub fn list(&self) -> Vec<PatientRecord> {
        self.inner.read().records.values().cloned().collect()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Returns the journal size in bytes.
    pub fn journal_bytes(&self) -> StoreResult<u64> {
        Ok(self.inner.read().journal.size_bytes()?)
    }

    /// Runs a read-modify-write transaction.
    ///
    /// The closure's mutations are staged; if it returns an error nothing
    /// is applied. On success the mutations are journaled, fsynced, and
    /// only then applied to the in-memory image — a transaction that
    /// returned `Ok` is durable.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut StoreTxn<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let mut txn = StoreTxn {
            records: &inner.records,
            staged: BTreeMap::new(),
            cleared: false,
            ops: Vec::new(),
            next_id: inner.next_id,
        };

        let value = f(&mut txn)?;

        let StoreTxn {
            staged,
            cleared,
            ops,
            next_id,
            ..
        } = txn;

        if ops.is_empty() {
            return Ok(value);
        }

        let mut payload = Vec::new();
        ciborium::ser::into_writer(&ops, &mut payload)
            .map_err(|e| StoreError::Codec(format!("failed to encode transaction: {e}")))?;
        inner.journal.append(&payload)?;
        inner.journal.sync()?;

        if cleared {
            inner.records.clear();
        }
        for (id, slot) in staged {
            match slot {
                Some(record) => {
                    inner.records.insert(id, record);
                }
                None => {
                    inner.records.remove(&id);
                }
            }
        }
        inner.next_id = next_id;

        if inner.journal.size_bytes()? > COMPACT_THRESHOLD_BYTES {
            // Compaction failure leaves a longer journal, not lost data.
            if let Err(e) = self.rewrite_journal(inner) {
                tracing::warn!(error = %e, "journal compaction failed");
            }
        }

        Ok(value)
    }

    /// Compacts the journal by rewriting the live image as one record.
    pub fn checkpoint(&self) -> StoreResult<()> {
        let mut guard = self.inner.write();
        self.rewrite_journal(&mut guard)
    }

    fn rewrite_journal(&self, inner: &mut StoreInner) -> StoreResult<()> {
        let ops: Vec<StoreOp> = inner.records.values().cloned().map(StoreOp::Upsert).collect();
        let mut payload = Vec::new();
        ciborium::ser::into_writer(&ops, &mut payload)
            .map_err(|e| StoreError::Codec(format!("failed to encode checkpoint: {e}")))?;

        match &self.dir {
            Some(dir) => {
                // Write the compacted image to a temp file and rename it
                // over the journal, so a crash mid-checkpoint leaves the
                // old journal intact.
                let temp_path = dir.join(JOURNAL_TEMP);
                let final_path = dir.join(JOURNAL_FILE);

                let _ = fs::remove_file(&temp_path);
                let backend = FileBackend::open(&temp_path)?;
                let (mut temp_journal, _) = Journal::open(Box::new(backend))?;
                if !ops.is_empty() {
                    temp_journal.append(&payload)?;
                }
                temp_journal.sync()?;
                drop(temp_journal);

                fs::rename(&temp_path, &final_path)?;

                let backend = FileBackend::open(&final_path)?;
                let (journal, _) = Journal::open(Box::new(backend))?;
                inner.journal = journal;
            }
            None => {
                inner.journal.reset()?;
                if !ops.is_empty() {
                    inner.journal.append(&payload)?;
                }
                inner.journal.sync()?;
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for PatientStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatientStore")
            .field("records", &self.len())
            .field("dir", &self.dir)
            .finish()
    }
}

/// A staged view of the store within a transaction.
///
/// Reads see the committed image overlaid with this transaction's own
/// staged mutations. Mutations are buffered until the enclosing
/// [`PatientStore::transaction`] commits.
pub struct StoreTxn<'a> {
    records: &'a BTreeMap<PatientId, PatientRecord>,
    staged: BTreeMap<PatientId, Option<PatientRecord>>,
    cleared: bool,
    ops: Vec<StoreOp>,
    next_id: i64,
}

impl StoreTxn<'_> {
    /// Returns the record with the given id as this transaction sees it.
    pub fn get(&self, id: PatientId) -> Option<PatientRecord> {
        if let Some(slot) = self.staged.get(&id) {
            return slot.clone();
        }
        if self.cleared {
            return None;
        }
        self.records.get(&id).cloned()
    }

    /// Returns the number of records this transaction sees.
    pub fn len(&self) -> usize {
        if self.cleared {
            return self.staged.values().filter(|slot| slot.is_some()).count();
        }
        let mut count = self.records.len();
        for (id, slot) in &self.staged {
            match (slot.is_some(), self.records.contains_key(id)) {
                (true, false) => count += 1,
                (false, true) => count -= 1,
                _ => {}
            }
        }
        count
    }

    /// Returns true if this transaction sees no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes a record, creating or replacing it.
    pub fn upsert(&mut self, record: PatientRecord) {
        if record.id.0 >= self.next_id {
            self.next_id = record.id.0 + 1;
        }
        self.ops.push(StoreOp::Upsert(record.clone()));
        self.staged.insert(record.id, Some(record));
    }

    /// Inserts a record, failing if the id is already taken.
    pub fn insert(&mut self, record: PatientRecord) -> StoreResult<()> {
        if self.get(record.id).is_some() {
            return Err(StoreError::DuplicateId(record.id));
        }
        self.upsert(record);
        Ok(())
    }

    /// Creates a record with the next locally assigned id.
    pub fn insert_new(
        &mut self,
        name: impl Into<String>,
        age: u32,
        diagnosis: impl Into<String>,
        now: DateTime<Utc>,
    ) -> PatientRecord {
        let record = PatientRecord::new(PatientId(self.next_id), name, age, diagnosis, now);
        self.upsert(record.clone());
        record
    }

    /// Deletes a record, returning whether it existed.
    pub fn delete(&mut self, id: PatientId) -> bool {
        let existed = self.get(id).is_some();
        if existed {
            self.ops.push(StoreOp::Delete(id));
            self.staged.insert(id, None);
        }
        existed
    }

    /// Removes every record, returning how many there were.
    pub fn clear_all(&mut self) -> usize {
        let count = self.len();
        self.ops.push(StoreOp::Clear);
        self.staged.clear();
        self.cleared = true;
        count
    }
}

fn apply_op(records: &mut BTreeMap<PatientId, PatientRecord>, op: StoreOp) {
    match op {
        StoreOp::Upsert(record) => {
            records.insert(record.id, record);
        }
        StoreOp::Delete(id) => {
            records.remove(&id);
        }
        StoreOp::Clear => {
            records.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, secs).unwrap()
    }

    #[test]
    fn insert_and_get() {
        let store = PatientStore::open_in_memory().unwrap();

        let record = store
            .transaction(|txn| Ok(txn.insert_new("Jane", 40, "flu", ts(0))))
            .unwrap();

        assert_eq!(record.id, PatientId(1));
        assert_eq!(store.get(PatientId(1)).unwrap().name, "Jane");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn ids_are_sequential() {
        let store = PatientStore::open_in_memory().unwrap();

        let (a, b) = store
            .transaction(|txn| {
                let a = txn.insert_new("A", 30, "x", ts(0));
                let b = txn.insert_new("B", 31, "y", ts(1));
                Ok((a, b))
            })
            .unwrap();

        assert_eq!(a.id, PatientId(1));
        assert_eq!(b.id, PatientId(2));
    }

    #[test]
    fn remote_upsert_bumps_next_id() {
        let store = PatientStore::open_in_memory().unwrap();

        store
            .transaction(|txn| {
                txn.upsert(PatientRecord::new(PatientId(10), "Remote", 50, "z", ts(0)));
                Ok(())
            })
            .unwrap();

        let record = store
            .transaction(|txn| Ok(txn.insert_new("Local", 20, "w", ts(1))))
            .unwrap();
        assert_eq!(record.id, PatientId(11));
    }

    #[test]
    fn duplicate_insert_rejected_and_rolled_back() {
        let store = PatientStore::open_in_memory().unwrap();
        store
            .transaction(|txn| {
                txn.insert(PatientRecord::new(PatientId(1), "Jane", 40, "flu", ts(0)))
            })
            .unwrap();

        let result = store.transaction(|txn| {
            txn.upsert(PatientRecord::new(PatientId(2), "Extra", 20, "x", ts(1)));
            txn.insert(PatientRecord::new(PatientId(1), "Dup", 41, "cold", ts(1)))
        });

        assert!(matches!(result, Err(StoreError::DuplicateId(PatientId(1)))));
        // The whole transaction rolled back, including the first upsert.
        assert!(store.get(PatientId(2)).is_none());
        assert_eq!(store.get(PatientId(1)).unwrap().name, "Jane");
    }

    #[test]
    fn delete_and_clear() {
        let store = PatientStore::open_in_memory().unwrap();
        store
            .transaction(|txn| {
                txn.insert_new("A", 30, "x", ts(0));
                txn.insert_new("B", 31, "y", ts(0));
                txn.insert_new("C", 32, "z", ts(0));
                Ok(())
            })
            .unwrap();

        let existed = store
            .transaction(|txn| Ok(txn.delete(PatientId(2))))
            .unwrap();
        assert!(existed);
        assert_eq!(store.len(), 2);

        let missing = store
            .transaction(|txn| Ok(txn.delete(PatientId(99))))
            .unwrap();
        assert!(!missing);

        let removed = store.transaction(|txn| Ok(txn.clear_all())).unwrap();
        assert_eq!(removed, 2);
        assert!(store.is_empty());
    }

    #[test]
    fn txn_reads_see_staged_writes() {
        let store = PatientStore::open_in_memory().unwrap();

        store
            .transaction(|txn| {
                let record = txn.insert_new("Jane", 40, "flu", ts(0));
                assert!(txn.get(record.id).is_some());
                assert_eq!(txn.len(), 1);

                txn.delete(record.id);
                assert!(txn.get(record.id).is_none());
                assert!(txn.is_empty());
                Ok(())
            })
            .unwrap();

        assert!(store.is_empty());
    }

    #[test]
    fn clear_then_upsert_within_txn() {
        let store = PatientStore::open_in_memory().unwrap();
        store
            .transaction(|txn| {
                txn.insert_new("Old", 60, "x", ts(0));
                Ok(())
            })
            .unwrap();

        store
            .transaction(|txn| {
                txn.clear_all();
                txn.upsert(PatientRecord::new(PatientId(5), "New", 25, "y", ts(1)));
                Ok(())
            })
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(PatientId(5)).unwrap().name, "New");
    }

    #[test]
    fn reopen_recovers_committed_state() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = PatientStore::open(dir.path()).unwrap();
            store
                .transaction(|txn| {
                    txn.insert_new("Jane", 40, "flu", ts(0));
                    txn.insert_new("John", 35, "cold", ts(1));
                    Ok(())
                })
                .unwrap();
            store
                .transaction(|txn| {
                    txn.delete(PatientId(2));
                    Ok(())
                })
                .unwrap();
        }

        let store = PatientStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(PatientId(1)).unwrap().name, "Jane");

        // Id assignment continues past recovered records.
        let record = store
            .transaction(|txn| Ok(txn.insert_new("New", 20, "x", ts(2))))
            .unwrap();
        assert_eq!(record.id, PatientId(2));
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let _store = PatientStore::open(dir.path()).unwrap();

        let result = PatientStore::open(dir.path());
        assert!(matches!(result, Err(StoreError::Locked(_))));
    }

    #[test]
    fn checkpoint_compacts_and_preserves_state() {
        let dir = tempfile::tempdir().unwrap();

        let store = PatientStore::open(dir.path()).unwrap();
        for i in 0..20 {
            store
                .transaction(|txn| {
                    txn.insert_new(format!("P{i}"), 30 + i, "obs", ts(i));
                    Ok(())
                })
                .unwrap();
        }
        store
            .transaction(|txn| {
                txn.delete(PatientId(1));
                Ok(())
            })
            .unwrap();

        let before = store.journal_bytes().unwrap();
        store.checkpoint().unwrap();
        let after = store.journal_bytes().unwrap();
        assert!(after < before);
        assert_eq!(store.len(), 19);
        drop(store);

        let store = PatientStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 19);
        assert!(store.get(PatientId(1)).is_none());
        assert_eq!(store.get(PatientId(20)).unwrap().name, "P19");
    }

    #[test]
    fn empty_transaction_writes_nothing() {
        let store = PatientStore::open_in_memory().unwrap();
        store.transaction(|_txn| Ok(())).unwrap();
        assert_eq!(store.journal_bytes().unwrap(), 0);
    }
}
