//! The durable outbound event log.

use crate::error::ReplicationResult;
use medsync_bus::DurableQueue;
use medsync_protocol::ChangeEvent;
use std::path::Path;

/// Durable log of locally committed events awaiting relay to the bus.
///
/// `publish_mutation` returns once its event is fsynced here, so the
/// caller's latency never depends on bus availability, and an event
/// accepted into the outbox is guaranteed to reach the bus eventually —
/// the relay keeps retrying across restarts because the entries are
/// journaled.
pub struct Outbox {
    queue: DurableQueue,
}

impl Outbox {
    /// Opens or creates a file-backed outbox, replaying unpublished
    /// events.
    pub fn open(path: &Path) -> ReplicationResult<Self> {
        Ok(Self {
            queue: DurableQueue::open_file("outbox", path)?,
        })
    }

    /// Opens an ephemeral in-memory outbox, for tests.
    pub fn open_in_memory() -> ReplicationResult<Self> {
        Ok(Self {
            queue: DurableQueue::open_in_memory("outbox")?,
        })
    }

    /// Durably enqueues an event, returning its sequence number.
    pub fn enqueue(&self, event: &ChangeEvent) -> ReplicationResult<u64> {
        let payload = event.encode()?;
        Ok(self.queue.append(&payload)?)
    }

    /// Returns the oldest unpublished entry.
    pub fn front(&self) -> Option<(u64, Vec<u8>)> {
        self.queue.front()
    }

    /// Marks an entry as published.
    pub fn ack(&self, seq: u64) -> ReplicationResult<bool> {
        Ok(self.queue.ack(seq)?)
    }

    /// Returns every unpublished entry in order.
    pub fn pending(&self) -> Vec<(u64, Vec<u8>)> {
        self.queue.pending()
    }

    /// Returns the number of unpublished entries.
    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    /// Waits until at least one entry is unpublished.
    pub async fn wait_for_pending(&self) {
        self.queue.wait_for_pending().await
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("pending", &self.pending_len())
            .finish()
    }
}
