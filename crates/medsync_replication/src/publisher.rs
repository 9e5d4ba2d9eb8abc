//! Publisher: local mutations onto the bus.

use crate::config::RetryConfig;
use crate::error::ReplicationResult;
use crate::outbox::Outbox;
use medsync_bus::ChangeBus;
use medsync_protocol::ChangeEvent;
use std::sync::Arc;
use tokio::sync::watch;

/// Accepts committed local mutations for replication.
///
/// A mutation is "scheduled for replication" once its event sits
/// durably in the outbox; the relay task ships it to the bus
/// asynchronously. An outbox failure is surfaced to the caller — a
/// mutation that cannot be durably scheduled must not be silently
/// acknowledged.
pub struct Publisher {
    node_id: String,
    outbox: Arc<Outbox>,
}

impl Publisher {
    /// Creates a publisher stamping events with this node's id.
    pub fn new(node_id: impl Into<String>, outbox: Arc<Outbox>) -> Self {
        Self {
            node_id: node_id.into(),
            outbox,
        }
    }

    /// Schedules a committed local mutation for broadcast.
    ///
    /// Overrides the event's `origin` with this node's id, validates
    /// it, and appends it durably to the outbox.
    pub fn publish_mutation(&self, mut event: ChangeEvent) -> ReplicationResult<()> {
        event.origin = self.node_id.clone();
        event.validate()?;

        let seq = self.outbox.enqueue(&event)?;
        tracing::debug!(
            action = %event.action,
            id = ?event.id,
            event_id = %event.event_id,
            seq,
            "mutation scheduled for replication"
        );
        Ok(())
    }
}

/// Drains the outbox onto the bus, in order, forever.
///
/// Each entry is published with capped exponential backoff on failure
/// and acknowledged in the outbox only after the bus confirms it. The
/// relay never drops an entry and never exits on error; it stops only
/// when `shutdown` fires.
pub async fn run_relay(
    outbox: Arc<Outbox>,
    bus: Arc<dyn ChangeBus>,
    retry: RetryConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = outbox.wait_for_pending() => {}
        }

        let Some((seq, payload)) = outbox.front() else {
            continue;
        };

        match bus.publish(payload).await {
            Ok(()) => {
                attempt = 0;
                if let Err(e) = outbox.ack(seq) {
                    tracing::warn!(seq, error = %e, "failed to ack outbox entry");
                }
            }
            Err(e) => {
                attempt = attempt.saturating_add(1);
                let delay = retry.delay_for_attempt(attempt);
                tracing::warn!(
                    seq,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "publish failed, backing off"
                );
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_bus::MockBus;
    use std::time::Duration;

    fn publisher() -> (Publisher, Arc<Outbox>) {
        let outbox = Arc::new(Outbox::open_in_memory().unwrap());
        (
            Publisher::new("hospital_a", Arc::clone(&outbox)),
            outbox,
        )
    }

    async fn drained(outbox: &Outbox) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while outbox.pending_len() > 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("outbox never drained");
    }

    #[test]
    fn publish_mutation_stamps_origin() {
        let (publisher, outbox) = publisher();

        publisher
            .publish_mutation(ChangeEvent::delete(1, "ignored"))
            .unwrap();

        let (_, payload) = outbox.front().unwrap();
        let event = ChangeEvent::decode(&payload).unwrap();
        assert_eq!(event.origin, "hospital_a");
    }

    #[test]
    fn invalid_mutation_rejected_before_queueing() {
        let (publisher, outbox) = publisher();

        let mut event = ChangeEvent::delete(1, "x");
        event.id = None;
        assert!(publisher.publish_mutation(event).is_err());
        assert_eq!(outbox.pending_len(), 0);
    }

    #[tokio::test]
    async fn relay_ships_events_in_order() {
        let (publisher, outbox) = publisher();
        let bus = Arc::new(MockBus::new());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let relay = tokio::spawn(run_relay(
            Arc::clone(&outbox),
            bus.clone(),
            RetryConfig::fast(),
            shutdown_rx,
        ));

        publisher
            .publish_mutation(ChangeEvent::delete(1, "x"))
            .unwrap();
        publisher
            .publish_mutation(ChangeEvent::delete(2, "x"))
            .unwrap();
        publisher
            .publish_mutation(ChangeEvent::clear_all("x"))
            .unwrap();

        drained(&outbox).await;

        let published: Vec<ChangeEvent> = bus
            .published()
            .iter()
            .map(|payload| ChangeEvent::decode(payload).unwrap())
            .collect();
        assert_eq!(published.len(), 3);
        assert_eq!(published[0].id, Some(1));
        assert_eq!(published[1].id, Some(2));
        assert_eq!(
            published[2].action,
            medsync_protocol::EventAction::ClearAll
        );

        shutdown_tx.send(true).unwrap();
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn relay_retries_until_the_bus_recovers() {
        let (publisher, outbox) = publisher();
        let bus = Arc::new(MockBus::new());
        bus.fail_next_publishes(3);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let relay = tokio::spawn(run_relay(
            Arc::clone(&outbox),
            bus.clone(),
            RetryConfig::fast(),
            shutdown_rx,
        ));

        publisher
            .publish_mutation(ChangeEvent::delete(7, "x"))
            .unwrap();

        drained(&outbox).await;

        // The event went through exactly once despite the failures.
        assert_eq!(bus.published().len(), 1);

        shutdown_tx.send(true).unwrap();
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn relay_stops_on_shutdown() {
        let (_, outbox) = publisher();
        let bus: Arc<dyn ChangeBus> = Arc::new(MockBus::new());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let relay = tokio::spawn(run_relay(
            Arc::clone(&outbox),
            bus,
            RetryConfig::fast(),
            shutdown_rx,
        ));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .expect("relay did not stop")
            .unwrap();
    }
}
