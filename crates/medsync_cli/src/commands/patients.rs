//! Patient mutation and query commands.

use crate::NodeArgs;
use medsync_bus::TcpBus;
use medsync_replication::{Node, NodeConfig, Outbox};
use medsync_store::{PatientId, PatientRecord, PatientStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How long mutation commands wait for the outbox to drain before
/// leaving relay to the next run.
const RELAY_WAIT: Duration = Duration::from_secs(10);

/// Creates a record and replicates it.
pub async fn add(
    args: &NodeArgs,
    name: &str,
    age: u32,
    diagnosis: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    with_node(args, |node| {
        let record = node.create_patient(name, age, diagnosis)?;
        println!("Created patient {} ({})", record.id, record.name);
        Ok(())
    })
    .await
}

/// Updates a record and replicates it.
pub async fn update(
    args: &NodeArgs,
    id: i64,
    name: &str,
    age: u32,
    diagnosis: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    with_node(args, |node| {
        let record = node.update_patient(PatientId(id), name, age, diagnosis)?;
        println!("Updated patient {} ({})", record.id, record.name);
        Ok(())
    })
    .await
}

/// Deletes a record and replicates the removal.
pub async fn remove(args: &NodeArgs, id: i64) -> Result<(), Box<dyn std::error::Error>> {
    with_node(args, |node| {
        node.delete_patient(PatientId(id))?;
        println!("Deleted patient {id}");
        Ok(())
    })
    .await
}

/// Deletes every record and replicates the wipe.
pub async fn clear(args: &NodeArgs) -> Result<(), Box<dyn std::error::Error>> {
    with_node(args, |node| {
        let removed = node.clear_patients()?;
        println!("Deleted {removed} patients");
        Ok(())
    })
    .await
}

/// Lists the records in a store.
pub fn list(store_path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = PatientStore::open(store_path)?;
    let records = store.list();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => {
            if records.is_empty() {
                println!("No patients");
            }
            for record in records {
                print_record(&record);
            }
        }
    }
    Ok(())
}

/// Shows a single record.
pub fn show(store_path: &Path, id: i64, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = PatientStore::open(store_path)?;
    let record = store
        .get(PatientId(id))
        .ok_or_else(|| format!("patient {id} not found"))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&record)?),
        _ => print_record(&record),
    }
    Ok(())
}

fn print_record(record: &PatientRecord) {
    println!(
        "{:>6}  {:<24} {:>3}  {:<30} {}",
        record.id.to_string(),
        record.name,
        record.age,
        record.diagnosis,
        record.last_update.to_rfc3339()
    );
}

/// Runs one mutation against a short-lived node, then waits (bounded)
/// for the relay to ship it.
async fn with_node(
    args: &NodeArgs,
    op: impl FnOnce(&Node) -> Result<(), Box<dyn std::error::Error>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(PatientStore::open(&args.store)?);
    let outbox = Outbox::open(&args.outbox_path())?;
    let bus = Arc::new(TcpBus::new(args.bus.clone(), args.node_id.clone()));

    let node = Node::start(NodeConfig::new(args.node_id.clone()), store, outbox, bus);

    let result = op(&node);

    if result.is_ok() {
        let drained = tokio::time::timeout(RELAY_WAIT, async {
            while node.outbox_pending() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;

        if drained.is_err() {
            eprintln!(
                "Warning: {} events still queued for relay; they will be \
                 published the next time this node runs",
                node.outbox_pending()
            );
        }
    }

    node.shutdown().await;
    result
}
