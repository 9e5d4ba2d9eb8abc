//! Broker command implementation.

use medsync_bus::{Broker, BrokerConfig, FanoutExchange};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

/// Runs the broker until interrupted.
pub async fn run(listen: SocketAddr, data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let exchange = Arc::new(FanoutExchange::open(data_dir)?);
    if !exchange.queue_names().is_empty() {
        println!("Recovered queues: {}", exchange.queue_names().join(", "));
    }

    let broker = Broker::new(BrokerConfig::new(listen), exchange);
    let listener = broker.bind().await?;
    println!("Broker listening on {}", listener.local_addr()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    broker.run(listener, shutdown_rx).await?;
    println!("Broker stopped");
    Ok(())
}
