//! Node daemon command implementation.

use crate::NodeArgs;
use medsync_bus::TcpBus;
use medsync_replication::{Node, NodeConfig, Outbox};
use medsync_store::PatientStore;
use std::sync::Arc;

/// Runs a replicating node until interrupted.
pub async fn run(args: &NodeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(PatientStore::open(&args.store)?);
    let outbox = Outbox::open(&args.outbox_path())?;
    let bus = Arc::new(TcpBus::new(args.bus.clone(), args.node_id.clone()));

    println!(
        "Node {} started: {} records, {} events awaiting relay",
        args.node_id,
        store.len(),
        outbox.pending_len()
    );

    let node = Node::start(NodeConfig::new(args.node_id.clone()), store, outbox, bus);

    tokio::signal::ctrl_c().await?;
    println!("Shutting down...");
    node.shutdown().await;
    Ok(())
}
