//! Consumer: the per-node replication worker.

use crate::apply::{ApplyEngine, ApplyOutcome};
use crate::config::RetryConfig;
use crate::error::ReplicationError;
use medsync_bus::{ChangeBus, Delivery};
use medsync_protocol::ChangeEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// Counters maintained by the consumer, for tests and inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Deliveries received.
    pub received: u64,
    /// Events applied (including no-op deletes on absent records).
    pub applied: u64,
    /// Upserts ignored as stale under last-write-wins.
    pub stale_ignored: u64,
    /// Self-originated events discarded.
    pub self_skipped: u64,
    /// Deliveries dropped because they failed to decode or validate.
    pub decode_failures: u64,
    /// Applies rejected by a stored invariant and discarded.
    pub conflicts: u64,
    /// Successful resubscriptions after a lost connection.
    pub reconnects: u64,
}

/// What to do with a delivery after processing it.
enum Disposition {
    /// Processing finished (applied or deliberately discarded): ack.
    Ack,
    /// Transient failure: leave unacked so the bus redelivers it.
    Redeliver,
}

/// The single background worker applying remote events to one node.
///
/// Owns this node's subscription and processes deliveries strictly one
/// at a time:
///
/// 1. decode — malformed payloads are logged, counted, and acked away
/// 2. self-echo filter — events with `origin == node` are discarded
/// 3. apply — via [`ApplyEngine`], inside a store transaction
/// 4. ack — only after the apply transaction committed, so a crash in
///    between causes a redelivery that the idempotent apply absorbs
///
/// A lost connection triggers resubscription with capped exponential
/// backoff; the worker only exits when `shutdown` fires, and it
/// finishes (and acks) an in-flight apply first.
pub struct Consumer {
    node_id: String,
    engine: ApplyEngine,
    stats: Mutex<ConsumerStats>,
}

impl Consumer {
    /// Creates a consumer for the given node.
    pub fn new(node_id: impl Into<String>, engine: ApplyEngine) -> Self {
        Self {
            node_id: node_id.into(),
            engine,
            stats: Mutex::new(ConsumerStats::default()),
        }
    }

    /// Returns a snapshot of the consumer's counters.
    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().clone()
    }

    /// Runs the worker until `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        bus: Arc<dyn ChangeBus>,
        retry: RetryConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut attempt: u32 = 0;

        loop {
            let mut subscription = tokio::select! {
                _ = shutdown.changed() => return,
                result = bus.subscribe(&self.node_id) => match result {
                    Ok(subscription) => {
                        if attempt > 0 {
                            self.stats.lock().reconnects += 1;
                            tracing::info!(node = %self.node_id, "resubscribed");
                        }
                        attempt = 0;
                        subscription
                    }
                    Err(e) => {
                        attempt = attempt.saturating_add(1);
                        let delay = retry.delay_for_attempt(attempt);
                        tracing::warn!(
                            node = %self.node_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "subscribe failed, backing off"
                        );
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                },
            };

            // Drain deliveries until the subscription drops.
            loop {
                let delivery = tokio::select! {
                    _ = shutdown.changed() => return,
                    result = subscription.next() => match result {
                        Ok(delivery) => delivery,
                        Err(e) => {
                            tracing::warn!(node = %self.node_id, error = %e, "subscription lost");
                            break;
                        }
                    },
                };

                self.stats.lock().received += 1;

                match self.process(&delivery) {
                    Disposition::Ack => {
                        if let Err(e) = subscription.ack(delivery.seq).await {
                            tracing::warn!(
                                node = %self.node_id,
                                seq = delivery.seq,
                                error = %e,
                                "ack failed, reconnecting"
                            );
                            break;
                        }
                    }
                    // Leave unacked; the bus will redeliver after we
                    // resubscribe, and apply is idempotent.
                    Disposition::Redeliver => break,
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = retry.delay_for_attempt(attempt);
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Decodes, filters, and applies one delivery.
    fn process(&self, delivery: &Delivery) -> Disposition {
        let event = match ChangeEvent::decode(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    node = %self.node_id,
                    seq = delivery.seq,
                    error = %e,
                    "dropping malformed event"
                );
                self.stats.lock().decode_failures += 1;
                return Disposition::Ack;
            }
        };

        if event.originated_by(&self.node_id) {
            tracing::debug!(
                node = %self.node_id,
                event_id = %event.event_id,
                "discarding self-originated event"
            );
            self.stats.lock().self_skipped += 1;
            return Disposition::Ack;
        }

        match self.engine.apply(&event) {
            Ok(outcome) => {
                let mut stats = self.stats.lock();
                stats.applied += 1;
                if outcome == ApplyOutcome::Stale {
                    stats.stale_ignored += 1;
                }
                Disposition::Ack
            }
            Err(e) if e.is_discardable() => {
                tracing::warn!(
                    node = %self.node_id,
                    event_id = %event.event_id,
                    error = %e,
                    "discarding unapplicable event"
                );
                let mut stats = self.stats.lock();
                match e {
                    ReplicationError::Validation(_) => stats.decode_failures += 1,
                    _ => stats.conflicts += 1,
                }
                Disposition::Ack
            }
            Err(e) => {
                tracing::error!(
                    node = %self.node_id,
                    event_id = %event.event_id,
                    error = %e,
                    "apply failed, leaving event for redelivery"
                );
                Disposition::Redeliver
            }
        }
    }
}
