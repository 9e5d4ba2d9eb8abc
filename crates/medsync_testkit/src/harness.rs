//! Multi-node cluster harness over an in-process bus.

use medsync_bus::MemoryBus;
use medsync_replication::{Node, NodeConfig, Outbox, RetryConfig};
use medsync_store::{PatientRecord, PatientStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// How long convergence helpers wait before panicking.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// N replicating nodes sharing one in-process bus.
///
/// Every queue is bound before any node starts, so a publish can never
/// race a subscription. Dataset convergence can be awaited with
/// [`TestCluster::settle`].
pub struct TestCluster {
    bus: Arc<MemoryBus>,
    nodes: BTreeMap<String, Node>,
}

impl TestCluster {
    /// Starts a cluster with in-memory stores and outboxes.
    pub fn start(node_ids: &[&str]) -> Self {
        let bus = Arc::new(MemoryBus::new());
        for id in node_ids {
            bus.exchange().bind(id).expect("bind queue");
        }

        let mut nodes = BTreeMap::new();
        for id in node_ids {
            let store = Arc::new(PatientStore::open_in_memory().expect("open store"));
            let outbox = Outbox::open_in_memory().expect("open outbox");
            let config = NodeConfig::new(*id).with_retry(RetryConfig::fast());
            let node = Node::start(config, store, outbox, bus.clone());
            nodes.insert((*id).to_string(), node);
        }

        Self { bus, nodes }
    }

    /// Returns a node by id.
    ///
    /// # Panics
    ///
    /// Panics if the id is unknown.
    pub fn node(&self, id: &str) -> &Node {
        self.nodes
            .get(id)
            .unwrap_or_else(|| panic!("unknown node {id}"))
    }

    /// Returns the shared bus.
    pub fn bus(&self) -> &Arc<MemoryBus> {
        &self.bus
    }

    /// Waits until every outbox is drained and every queue is empty.
    ///
    /// Since consumers acknowledge only after a committed apply, empty
    /// queues mean every event has been applied everywhere.
    ///
    /// # Panics
    ///
    /// Panics if the cluster has not settled within the timeout.
    pub async fn settle(&self) {
        let result = tokio::time::timeout(SETTLE_TIMEOUT, async {
            loop {
                if self.is_settled() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await;
        assert!(result.is_ok(), "cluster did not settle in time");
    }

    fn is_settled(&self) -> bool {
        let outboxes_drained = self.nodes.values().all(|node| node.outbox_pending() == 0);
        let queues_empty = self.bus.exchange().queue_names().iter().all(|name| {
            let node = name.trim_start_matches(medsync_bus::QUEUE_PREFIX);
            self.bus
                .exchange()
                .bind(node)
                .map(|queue| queue.pending_len() == 0)
                .unwrap_or(false)
        });
        outboxes_drained && queues_empty
    }

    /// Asserts that every node holds exactly this dataset.
    ///
    /// # Panics
    ///
    /// Panics if any node diverges.
    pub fn assert_converged(&self, expected: &[PatientRecord]) {
        for (id, node) in &self.nodes {
            let records = node.list_patients();
            assert_eq!(
                &records, expected,
                "node {id} diverged from expected dataset"
            );
        }
    }

    /// Shuts every node down gracefully.
    pub async fn shutdown(self) {
        for (_, node) in self.nodes {
            node.shutdown().await;
        }
    }
}
