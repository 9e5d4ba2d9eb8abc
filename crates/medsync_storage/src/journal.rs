//! Append-only record journal.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// Maximum accepted record payload length (16 MiB).
///
/// A length field above this is treated as corruption rather than an
/// allocation request.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Per-record header: 4-byte length + 8-byte checksum.
const HEADER_LEN: usize = 12;

/// An append-only log of opaque, checksummed records.
///
/// Each record is `[len: u32 BE][fnv1a64(payload): u64 BE][payload]`.
/// On open the journal replays every intact record and truncates the tail
/// at the first torn or corrupt one, so a crash mid-append never poisons
/// recovery: the partially written record is discarded and the log stays
/// consistent with what was last acknowledged as durable.
///
/// The journal is a single-writer structure; callers serialize access.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
}

impl Journal {
    /// Opens a journal over the given backend, replaying intact records.
    ///
    /// Returns the journal and the payloads recovered in append order.
    /// The tail is truncated at the first record that is incomplete or
    /// fails its checksum.
    pub fn open(backend: Box<dyn StorageBackend>) -> StorageResult<(Self, Vec<Vec<u8>>)> {
        let mut journal = Self { backend };
        let records = journal.replay_and_repair()?;
        Ok((journal, records))
    }

    /// Appends a record. Not durable until [`Journal::sync`] returns.
    pub fn append(&mut self, payload: &[u8]) -> StorageResult<u64> {
        let mut record = Vec::with_capacity(HEADER_LEN + payload.len());
        record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        record.extend_from_slice(&fnv1a64(payload).to_be_bytes());
        record.extend_from_slice(payload);
        self.backend.append(&record)
    }

    /// Makes all appended records durable.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.backend.sync()
    }

    /// Discards every record. Used when rewriting a compacted image.
    pub fn reset(&mut self) -> StorageResult<()> {
        self.backend.truncate(0)?;
        self.backend.sync()
    }

    /// Returns the journal size in bytes.
    pub fn size_bytes(&self) -> StorageResult<u64> {
        self.backend.size()
    }

    fn replay_and_repair(&mut self) -> StorageResult<Vec<Vec<u8>>> {
        let size = self.backend.size()?;
        let mut records = Vec::new();
        let mut offset = 0u64;

        while offset < size {
            if size - offset < HEADER_LEN as u64 {
                break; // torn header
            }

            let header = self.backend.read_at(offset, HEADER_LEN)?;
            let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let checksum = u64::from_be_bytes([
                header[4], header[5], header[6], header[7], header[8], header[9], header[10],
                header[11],
            ]);

            if len > MAX_RECORD_LEN || size - offset - (HEADER_LEN as u64) < len as u64 {
                break; // corrupt length or torn payload
            }

            let payload = self.backend.read_at(offset + HEADER_LEN as u64, len)?;
            if fnv1a64(&payload) != checksum {
                break; // torn or bit-rotted payload
            }

            records.push(payload);
            offset += (HEADER_LEN + len) as u64;
        }

        if offset < size {
            self.backend.truncate(offset)?;
            self.backend.sync()?;
        }

        Ok(records)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("size_bytes", &self.backend.size().unwrap_or(0))
            .finish()
    }
}

/// FNV-1a 64-bit hash.
///
/// An integrity checksum against torn writes, not an authenticity check.
fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// StorageBackend is object-safe; journals always hold a boxed backend so
// stores can pick file or memory at run time.
impl StorageBackend for Box<dyn StorageBackend> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        (**self).read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        (**self).append(data)
    }

    fn size(&self) -> StorageResult<u64> {
        (**self).size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        (**self).sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        (**self).truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileBackend, InMemoryBackend};
    use proptest::prelude::*;

    #[test]
    fn empty_journal() {
        let (journal, records) = Journal::open(Box::new(InMemoryBackend::new())).unwrap();
        assert!(records.is_empty());
        assert_eq!(journal.size_bytes().unwrap(), 0);
    }

    #[test]
    fn append_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.log");

        {
            let backend = FileBackend::open(&path).unwrap();
            let (mut journal, _) = Journal::open(Box::new(backend)).unwrap();
            journal.append(b"first").unwrap();
            journal.append(b"second").unwrap();
            journal.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        let (_, records) = Journal::open(Box::new(backend)).unwrap();
        assert_eq!(records, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn torn_tail_is_truncated() {
        // Build one intact record.
        let (mut journal, _) = Journal::open(Box::new(InMemoryBackend::new())).unwrap();
        journal.append(b"intact").unwrap();
        let Journal { backend } = journal;
        let mut bytes = backend.read_at(0, backend.size().unwrap() as usize).unwrap();

        // Follow it with a record whose payload is cut short.
        bytes.extend_from_slice(&7u32.to_be_bytes());
        bytes.extend_from_slice(&fnv1a64(b"torn!!!").to_be_bytes());
        bytes.extend_from_slice(b"torn");

        let (journal, records) =
            Journal::open(Box::new(InMemoryBackend::with_data(bytes))).unwrap();
        assert_eq!(records, vec![b"intact".to_vec()]);
        // The torn record is gone from the underlying storage as well.
        assert_eq!(
            journal.size_bytes().unwrap(),
            (HEADER_LEN + b"intact".len()) as u64
        );
    }

    #[test]
    fn corrupt_checksum_stops_replay() {
        let boxed: Box<dyn StorageBackend> = Box::new(InMemoryBackend::new());
        let (mut journal, _) = Journal::open(boxed).unwrap();
        journal.append(b"good").unwrap();
        journal.append(b"bad").unwrap();

        let Journal { backend } = journal;
        let mut bytes = backend.read_at(0, backend.size().unwrap() as usize).unwrap();
        // Flip a bit in the second record's payload.
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let (_, records) = Journal::open(Box::new(InMemoryBackend::with_data(bytes))).unwrap();
        assert_eq!(records, vec![b"good".to_vec()]);
    }

    #[test]
    fn reset_discards_everything() {
        let (mut journal, _) = Journal::open(Box::new(InMemoryBackend::new())).unwrap();
        journal.append(b"one").unwrap();
        journal.append(b"two").unwrap();
        journal.reset().unwrap();
        assert_eq!(journal.size_bytes().unwrap(), 0);
    }

    #[test]
    fn fnv1a64_known_values() {
        // Reference vectors for FNV-1a 64.
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    proptest! {
        #[test]
        fn replay_returns_appended_payloads(
            payloads in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..256),
                0..20,
            )
        ) {
            let boxed: Box<dyn StorageBackend> = Box::new(InMemoryBackend::new());
            let (mut journal, _) = Journal::open(boxed).unwrap();
            for payload in &payloads {
                journal.append(payload).unwrap();
            }

            let Journal { backend } = journal;
            let bytes = backend.read_at(0, backend.size().unwrap() as usize).unwrap();
            let (_, records) =
                Journal::open(Box::new(InMemoryBackend::with_data(bytes))).unwrap();
            prop_assert_eq!(records, payloads);
        }
    }
}
