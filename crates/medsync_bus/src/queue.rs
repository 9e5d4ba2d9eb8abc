//! Durable per-node subscriber queues.

use crate::error::BusResult;
use medsync_storage::{FileBackend, InMemoryBackend, Journal};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Notify;

/// Acks journaled since the last compaction before the queue rewrites
/// itself.
const COMPACT_ACKED_THRESHOLD: u64 = 256;

/// One record in a queue journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum QueueRecord {
    Enqueue { seq: u64, payload: Vec<u8> },
    Ack { seq: u64 },
}

struct QueueInner {
    journal: Journal,
    pending: VecDeque<(u64, Vec<u8>)>,
    next_seq: u64,
    acked_since_compact: u64,
}

/// A durable FIFO queue bound to one subscriber node.
///
/// Entries are journaled before [`DurableQueue::append`] returns, so an
/// acknowledged publish survives broker restart. Entries stay pending
/// until [`DurableQueue::ack`]; an entry delivered but never acked is
/// redelivered after reconnect, which is where the bus's at-least-once
/// guarantee comes from. Sequence numbers are assigned in enqueue order
/// and never reused, so delivery order per queue is FIFO.
pub struct DurableQueue {
    name: String,
    path: Option<PathBuf>,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl DurableQueue {
    /// Opens or creates a file-backed queue, replaying its journal.
    pub fn open_file(name: impl Into<String>, path: &Path) -> BusResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::from_journal(name.into(), Some(path.to_path_buf()), Journal::open(Box::new(backend))?)
    }

    /// Opens an in-memory queue, for tests and in-process buses.
    pub fn open_in_memory(name: impl Into<String>) -> BusResult<Self> {
        Self::from_journal(name.into(), None, Journal::open(Box::new(InMemoryBackend::new()))?)
    }

    fn from_journal(
        name: String,
        path: Option<PathBuf>,
        (journal, payloads): (Journal, Vec<Vec<u8>>),
    ) -> BusResult<Self> {
        let mut pending: VecDeque<(u64, Vec<u8>)> = VecDeque::new();
        let mut next_seq = 1u64;

        for bytes in payloads {
            let record: QueueRecord = match ciborium::de::from_reader(&bytes[..]) {
                Ok(record) => record,
                Err(e) => {
                    // The checksum held but the shape didn't; skip rather
                    // than refuse to start.
                    tracing::warn!(queue = %name, error = %e, "skipping unreadable queue record");
                    continue;
                }
            };
            match record {
                QueueRecord::Enqueue { seq, payload } => {
                    next_seq = next_seq.max(seq + 1);
                    pending.push_back((seq, payload));
                }
                QueueRecord::Ack { seq } => {
                    next_seq = next_seq.max(seq + 1);
                    pending.retain(|(s, _)| *s != seq);
                }
            }
        }

        Ok(Self {
            name,
            path,
            inner: Mutex::new(QueueInner {
                journal,
                pending,
                next_seq,
                acked_since_compact: 0,
            }),
            notify: Notify::new(),
        })
    }

    /// Returns the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues a payload durably, returning its sequence number.
    pub fn append(&self, payload: &[u8]) -> BusResult<u64> {
        let seq = {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;

            let record = QueueRecord::Enqueue {
                seq,
                payload: payload.to_vec(),
            };
            let bytes = encode_record(&record);
            inner.journal.append(&bytes)?;
            inner.journal.sync()?;

            inner.pending.push_back((seq, payload.to_vec()));
            seq
        };
        self.notify.notify_waiters();
        Ok(seq)
    }

    /// Acknowledges an entry, removing it from the pending set.
    ///
    /// Returns whether the entry was still pending. The ack record is
    /// journaled without an fsync: losing it redelivers an already
    /// processed entry, which consumers must tolerate anyway.
    pub fn ack(&self, seq: u64) -> BusResult<bool> {
        let mut inner = self.inner.lock();
        let before = inner.pending.len();
        inner.pending.retain(|(s, _)| *s != seq);
        let existed = inner.pending.len() != before;

        if existed {
            let bytes = encode_record(&QueueRecord::Ack { seq });
            inner.journal.append(&bytes)?;
            inner.acked_since_compact += 1;

            if inner.acked_since_compact >= COMPACT_ACKED_THRESHOLD {
                if let Err(e) = self.compact(&mut inner) {
                    tracing::warn!(queue = %self.name, error = %e, "queue compaction failed");
                }
            }
        }

        Ok(existed)
    }

    /// Returns the oldest pending entry without removing it.
    pub fn front(&self) -> Option<(u64, Vec<u8>)> {
        self.inner.lock().pending.front().cloned()
    }

    /// Returns all pending entries in delivery order.
    pub fn pending(&self) -> Vec<(u64, Vec<u8>)> {
        self.inner.lock().pending.iter().cloned().collect()
    }

    /// Returns the number of pending entries.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Waits until at least one entry is pending.
    pub async fn wait_for_pending(&self) {
        loop {
            let notified = self.notify.notified();
            if self.pending_len() > 0 {
                return;
            }
            notified.await;
        }
    }

    fn compact(&self, inner: &mut QueueInner) -> BusResult<()> {
        let records: Vec<Vec<u8>> = inner
            .pending
            .iter()
            .map(|(seq, payload)| {
                encode_record(&QueueRecord::Enqueue {
                    seq: *seq,
                    payload: payload.clone(),
                })
            })
            .collect();

        match &self.path {
            Some(path) => {
                // Rewrite into a temp file and rename, so a crash
                // mid-compaction leaves the old journal intact.
                let temp_path = path.with_extension("tmp");
                let _ = fs::remove_file(&temp_path);
                let backend = FileBackend::open(&temp_path)?;
                let (mut journal, _) = Journal::open(Box::new(backend))?;
                for record in &records {
                    journal.append(record)?;
                }
                journal.sync()?;
                drop(journal);
                fs::rename(&temp_path, path)?;

                let backend = FileBackend::open(path)?;
                let (journal, _) = Journal::open(Box::new(backend))?;
                inner.journal = journal;
            }
            None => {
                inner.journal.reset()?;
                for record in &records {
                    inner.journal.append(record)?;
                }
                inner.journal.sync()?;
            }
        }

        inner.acked_since_compact = 0;
        Ok(())
    }
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("name", &self.name)
            .field("pending", &self.pending_len())
            .finish()
    }
}

fn encode_record(record: &QueueRecord) -> Vec<u8> {
    let mut bytes = Vec::new();
    // QueueRecord serialization cannot fail: it is a closed enum of
    // plain integers and byte strings.
    ciborium::ser::into_writer(record, &mut bytes).expect("queue record encoding");
    bytes
}
