//! Outbox durability across node restarts and broker outages.

use medsync_bus::MockBus;
use medsync_protocol::ChangeEvent;
use medsync_replication::{Node, NodeConfig, Outbox, RetryConfig};
use medsync_store::PatientStore;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn mutations_accepted_while_the_bus_is_down_replicate_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("store");
    let outbox_path = dir.path().join("outbox.queue");

    // First lifetime: the bus rejects every publish.
    {
        let bus = Arc::new(MockBus::new());
        bus.fail_next_publishes(u32::MAX);

        let store = Arc::new(PatientStore::open(&store_path).unwrap());
        let outbox = Outbox::open(&outbox_path).unwrap();
        let node = Node::start(
            NodeConfig::new("hospital_a").with_retry(RetryConfig::fast()),
            store,
            outbox,
            bus.clone(),
        );

        // The mutation still succeeds: it is committed locally and
        // durably scheduled in the outbox.
        let record = node.create_patient("Jane", 40, "flu").unwrap();
        assert_eq!(node.get_patient(record.id), Some(record));
        assert!(node.outbox_pending() >= 1);

        node.shutdown().await;
    }

    // Second lifetime: a healthy bus. The journaled outbox entry is
    // relayed without the caller doing anything.
    let bus = Arc::new(MockBus::new());
    let store = Arc::new(PatientStore::open(&store_path).unwrap());
    let outbox = Outbox::open(&outbox_path).unwrap();
    assert_eq!(outbox.pending_len(), 1);

    let node = Node::start(
        NodeConfig::new("hospital_a").with_retry(RetryConfig::fast()),
        store,
        outbox,
        bus.clone(),
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        while node.outbox_pending() > 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("outbox never drained");

    let published = bus.published();
    assert_eq!(published.len(), 1);
    let event = ChangeEvent::decode(&published[0]).unwrap();
    assert_eq!(event.id, Some(1));
    assert_eq!(event.origin, "hospital_a");

    node.shutdown().await;
}

#[tokio::test]
async fn failed_outbox_is_surfaced_to_the_mutation_path() {
    // A publisher over a poisoned outbox must fail the mutation rather
    // than silently dropping the event. Exercised at the publisher
    // level: an invalid event is the cheapest stand-in for "cannot be
    // durably scheduled".
    let outbox = Arc::new(Outbox::open_in_memory().unwrap());
    let publisher = medsync_replication::Publisher::new("hospital_a", Arc::clone(&outbox));

    let mut event = ChangeEvent::delete(1, "hospital_a");
    event.id = None;

    assert!(publisher.publish_mutation(event).is_err());
    assert_eq!(outbox.pending_len(), 0);
}
