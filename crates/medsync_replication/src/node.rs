//! The node facade: store, publisher, and workers wired together.

use crate::apply::ApplyEngine;
use crate::config::NodeConfig;
use crate::consumer::{Consumer, ConsumerStats};
use crate::error::{ReplicationError, ReplicationResult};
use crate::outbox::Outbox;
use crate::publisher::{run_relay, Publisher};
use chrono::Utc;
use medsync_bus::ChangeBus;
use medsync_protocol::ChangeEvent;
use medsync_store::{PatientId, PatientRecord, PatientStore};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A running replication node.
///
/// Owns the local store, the durable outbox, and the two background
/// workers (outbox relay and consumer). The mutation methods implement
/// the contract with the external request-handling surface: commit
/// locally, then schedule the event for replication before returning,
/// so the replication lag from a crash window stays bounded.
///
/// Must be started from within a tokio runtime.
pub struct Node {
    config: NodeConfig,
    store: Arc<PatientStore>,
    publisher: Publisher,
    consumer: Arc<Consumer>,
    outbox: Arc<Outbox>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl Node {
    /// Starts a node over its store, outbox, and bus connection.
    ///
    /// Spawns the relay and consumer workers immediately; the consumer
    /// binds the node's durable queue on first subscribe.
    pub fn start(
        config: NodeConfig,
        store: Arc<PatientStore>,
        outbox: Outbox,
        bus: Arc<dyn ChangeBus>,
    ) -> Self {
        let outbox = Arc::new(outbox);
        let publisher = Publisher::new(config.node_id.clone(), Arc::clone(&outbox));
        let consumer = Arc::new(Consumer::new(
            config.node_id.clone(),
            ApplyEngine::new(Arc::clone(&store)),
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let workers = vec![
            tokio::spawn(run_relay(
                Arc::clone(&outbox),
                Arc::clone(&bus),
                config.retry.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(Arc::clone(&consumer).run(
                bus,
                config.retry.clone(),
                shutdown_rx,
            )),
        ];

        tracing::info!(node = %config.node_id, "node started");

        Self {
            config,
            store,
            publisher,
            consumer,
            outbox,
            shutdown,
            workers,
        }
    }

    /// Returns this node's identifier.
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<PatientStore> {
        &self.store
    }

    /// Creates a patient record and schedules its replication.
    pub fn create_patient(
        &self,
        name: impl Into<String>,
        age: u32,
        diagnosis: impl Into<String>,
    ) -> ReplicationResult<PatientRecord> {
        let now = Utc::now();
        let (name, diagnosis) = (name.into(), diagnosis.into());

        let record = self
            .store
            .transaction(|txn| Ok(txn.insert_new(name, age, diagnosis, now)))?;

        self.publish_upsert(&record)?;
        Ok(record)
    }

    /// Updates a patient record and schedules its replication.
    pub fn update_patient(
        &self,
        id: PatientId,
        name: impl Into<String>,
        age: u32,
        diagnosis: impl Into<String>,
    ) -> ReplicationResult<PatientRecord> {
        let now = Utc::now();
        let (name, diagnosis) = (name.into(), diagnosis.into());

        let updated = self.store.transaction(|txn| {
            Ok(txn.get(id).map(|mut record| {
                record.name = name;
                record.age = age;
                record.diagnosis = diagnosis;
                record.last_update = now;
                txn.upsert(record.clone());
                record
            }))
        })?;

        let record = updated.ok_or(ReplicationError::NotFound(id))?;
        self.publish_upsert(&record)?;
        Ok(record)
    }

    /// Deletes a patient record and schedules its replication.
    pub fn delete_patient(&self, id: PatientId) -> ReplicationResult<()> {
        let existed = self.store.transaction(|txn| Ok(txn.delete(id)))?;
        if !existed {
            return Err(ReplicationError::NotFound(id));
        }

        self.publisher
            .publish_mutation(ChangeEvent::delete(id.0, self.node_id()))?;
        Ok(())
    }

    /// Removes every patient record and schedules the replication of
    /// the wipe.
    pub fn clear_patients(&self) -> ReplicationResult<usize> {
        let removed = self.store.transaction(|txn| Ok(txn.clear_all()))?;

        self.publisher
            .publish_mutation(ChangeEvent::clear_all(self.node_id()))?;
        Ok(removed)
    }

    /// Returns a patient record.
    pub fn get_patient(&self, id: PatientId) -> Option<PatientRecord> {
        self.store.get(id)
    }

    /// Returns every patient record, ordered by id.
    pub fn list_patients(&self) -> Vec<PatientRecord> {
        self.store.list()
    }

    /// Returns the consumer's counters.
    pub fn consumer_stats(&self) -> ConsumerStats {
        self.consumer.stats()
    }

    /// Returns the number of events awaiting relay to the bus.
    pub fn outbox_pending(&self) -> usize {
        self.outbox.pending_len()
    }

    /// Stops both workers gracefully and waits for them.
    ///
    /// The consumer finishes and acknowledges an in-flight apply before
    /// exiting; unrelayed outbox entries stay journaled for the next
    /// start.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "worker task panicked");
            }
        }
        tracing::info!(node = %self.config.node_id, "node stopped");
    }

    fn publish_upsert(&self, record: &PatientRecord) -> ReplicationResult<()> {
        self.publisher.publish_mutation(ChangeEvent::upsert(
            record.id.0,
            record.name.clone(),
            record.age,
            record.diagnosis.clone(),
            record.last_update,
            self.node_id(),
        ))
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.config.node_id)
            .field("records", &self.store.len())
            .field("outbox_pending", &self.outbox.pending_len())
            .finish()
    }
}
