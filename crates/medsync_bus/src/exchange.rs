//! The fanout exchange.

use crate::error::{BusError, BusResult};
use crate::queue::DurableQueue;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOCK_FILE: &str = "LOCK";
const QUEUE_EXTENSION: &str = "queue";

/// Prefix for subscriber queue names.
pub const QUEUE_PREFIX: &str = "patients_";

/// Returns the deterministic queue name for a node.
pub fn queue_name(node: &str) -> String {
    format!("{QUEUE_PREFIX}{node}")
}

/// A durable broadcast exchange with one queue per bound node.
///
/// Publishing appends the payload to every bound queue before returning,
/// so a successful publish is durable in each subscriber's queue.
/// Binding is idempotent: the same node always gets the same queue, and
/// file-backed queues are recovered from their journals on reopen. A
/// queue bound after a publish does not see that publish.
pub struct FanoutExchange {
    dir: Option<PathBuf>,
    queues: RwLock<HashMap<String, Arc<DurableQueue>>>,
    _lock_file: Option<File>,
}

impl FanoutExchange {
    /// Opens or creates a file-backed exchange in the given directory.
    ///
    /// Existing queue journals are reopened so unconsumed events survive
    /// a broker restart. Fails with [`BusError::Locked`] if another
    /// process owns the directory.
    pub fn open(dir: &Path) -> BusResult<Self> {
        fs::create_dir_all(dir).map_err(|e| BusError::transport_fatal(e.to_string()))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))
            .map_err(|e| BusError::transport_fatal(e.to_string()))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| BusError::Locked(dir.to_path_buf()))?;

        let mut queues = HashMap::new();
        let entries = fs::read_dir(dir).map_err(|e| BusError::transport_fatal(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| BusError::transport_fatal(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(QUEUE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let queue = DurableQueue::open_file(name, &path)?;
            tracing::info!(queue = name, pending = queue.pending_len(), "recovered queue");
            queues.insert(name.to_string(), Arc::new(queue));
        }

        Ok(Self {
            dir: Some(dir.to_path_buf()),
            queues: RwLock::new(queues),
            _lock_file: Some(lock_file),
        })
    }

    /// Creates an in-memory exchange, for tests and in-process buses.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            queues: RwLock::new(HashMap::new()),
            _lock_file: None,
        }
    }

    /// Binds (idempotently) the queue for a node and returns it.
    pub fn bind(&self, node: &str) -> BusResult<Arc<DurableQueue>> {
        validate_node_id(node)?;
        let name = queue_name(node);

        if let Some(queue) = self.queues.read().get(&name) {
            return Ok(Arc::clone(queue));
        }

        let mut queues = self.queues.write();
        // Double-checked: another binder may have won the race.
        if let Some(queue) = queues.get(&name) {
            return Ok(Arc::clone(queue));
        }

        let queue = match &self.dir {
            Some(dir) => {
                let path = dir.join(format!("{name}.{QUEUE_EXTENSION}"));
                DurableQueue::open_file(&name, &path)?
            }
            None => DurableQueue::open_in_memory(&name)?,
        };
        let queue = Arc::new(queue);
        queues.insert(name, Arc::clone(&queue));
        Ok(queue)
    }

    /// Broadcasts a payload to every bound queue.
    ///
    /// Returns the number of queues reached. Once this returns, the
    /// payload is durable in each of them.
    pub fn publish(&self, payload: &[u8]) -> BusResult<u32> {
        let queues: Vec<Arc<DurableQueue>> =
            self.queues.read().values().map(Arc::clone).collect();

        for queue in &queues {
            queue.append(payload)?;
        }
        Ok(queues.len() as u32)
    }

    /// Returns the names of all bound queues.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FanoutExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutExchange")
            .field("dir", &self.dir)
            .field("queues", &self.queue_names())
            .finish()
    }
}

fn validate_node_id(node: &str) -> BusResult<()> {
    let valid = !node.is_empty()
        && node
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(BusError::InvalidNodeId(node.to_string()))
    }
}
