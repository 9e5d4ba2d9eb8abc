//! The change bus broker.

use crate::error::BusResult;
use crate::exchange::FanoutExchange;
use crate::queue::DurableQueue;
use crate::wire;
use bytes::BytesMut;
use medsync_protocol::{ClientFrame, ServerFrame, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Configuration for the broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,
}

impl BrokerConfig {
    /// Creates a broker configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }
}

/// The TCP broker serving publishers and subscribers.
///
/// One session task per connection. Publishers get `PublishOk` only
/// after the exchange has durably fanned the payload out; subscribers
/// get a strictly sequential deliver/ack loop over their durable queue.
pub struct Broker {
    config: BrokerConfig,
    exchange: Arc<FanoutExchange>,
}

impl Broker {
    /// Creates a broker over an exchange.
    pub fn new(config: BrokerConfig, exchange: Arc<FanoutExchange>) -> Self {
        Self { config, exchange }
    }

    /// Returns the exchange this broker serves.
    pub fn exchange(&self) -> &Arc<FanoutExchange> {
        &self.exchange
    }

    /// Binds the listener and returns the broker run future's inputs.
    ///
    /// Split from [`Broker::run`] so callers can learn the bound address
    /// (useful with port 0 in tests) before serving.
    pub async fn bind(&self) -> BusResult<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "broker listening");
        Ok(listener)
    }

    /// Serves connections until `shutdown` fires.
    ///
    /// In-flight sessions observe the same shutdown signal, finish their
    /// current delivery, and are joined before this returns.
    pub async fn run(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> BusResult<()> {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let exchange = Arc::clone(&self.exchange);
                    let shutdown = shutdown.clone();
                    sessions.spawn(async move {
                        if let Err(e) = run_session(stream, exchange, shutdown).await {
                            tracing::warn!(%peer, error = %e, "session ended with error");
                        }
                    });
                }
                // Reap finished sessions so the set does not grow unbounded.
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        tracing::info!(open_sessions = sessions.len(), "broker shutting down");
        while sessions.join_next().await.is_some() {}
        Ok(())
    }
}

async fn run_session(
    mut stream: TcpStream,
    exchange: Arc<FanoutExchange>,
    mut shutdown: watch::Receiver<bool>,
) -> BusResult<()> {
    let mut buf = BytesMut::new();
    let mut node = String::new();

    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            frame = wire::read_frame::<ClientFrame, _>(&mut stream, &mut buf) => frame?,
        };
        let Some(frame) = frame else {
            return Ok(()); // peer closed
        };

        match frame {
            ClientFrame::Hello {
                node: peer_node,
                protocol_version,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    let reply = ServerFrame::error(format!(
                        "unsupported protocol version {protocol_version}"
                    ));
                    wire::write_frame(&mut stream, &reply).await?;
                    return Ok(());
                }
                node = peer_node;
                tracing::debug!(node = %node, "hello");
                wire::write_frame(
                    &mut stream,
                    &ServerFrame::HelloOk {
                        protocol_version: PROTOCOL_VERSION,
                    },
                )
                .await?;
            }
            ClientFrame::Publish { payload } => {
                let reply = match exchange.publish(&payload) {
                    Ok(queues) => {
                        tracing::debug!(node = %node, queues, bytes = payload.len(), "published");
                        ServerFrame::PublishOk { queues }
                    }
                    Err(e) => {
                        tracing::error!(node = %node, error = %e, "publish failed");
                        ServerFrame::error(format!("publish failed: {e}"))
                    }
                };
                wire::write_frame(&mut stream, &reply).await?;
            }
            ClientFrame::Subscribe { node: sub_node } => {
                let queue = match exchange.bind(&sub_node) {
                    Ok(queue) => queue,
                    Err(e) => {
                        let reply = ServerFrame::error(format!("subscribe failed: {e}"));
                        wire::write_frame(&mut stream, &reply).await?;
                        return Ok(());
                    }
                };
                return run_delivery(stream, buf, queue, shutdown).await;
            }
            ClientFrame::Ack { seq } => {
                tracing::warn!(node = %node, seq, "ack outside a subscription");
                let reply = ServerFrame::error("ack without subscription");
                wire::write_frame(&mut stream, &reply).await?;
            }
        }
    }
}

/// Drives the deliver/ack loop for one subscriber.
///
/// At most one delivery is outstanding at a time; the next entry is sent
/// only after the previous ack, preserving FIFO processing order. A
/// disconnect before ack leaves the entry pending for redelivery.
async fn run_delivery(
    mut stream: TcpStream,
    mut buf: BytesMut,
    queue: Arc<DurableQueue>,
    mut shutdown: watch::Receiver<bool>,
) -> BusResult<()> {
    tracing::info!(
        queue = queue.name(),
        pending = queue.pending_len(),
        "subscriber attached"
    );
    wire::write_frame(
        &mut stream,
        &ServerFrame::SubscribeOk {
            queue: queue.name().to_string(),
            pending: queue.pending_len() as u64,
        },
    )
    .await?;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = queue.wait_for_pending() => {}
        }

        let Some((seq, payload)) = queue.front() else {
            continue;
        };

        wire::write_frame(&mut stream, &ServerFrame::Deliver { seq, payload }).await?;

        let frame = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            frame = wire::read_frame::<ClientFrame, _>(&mut stream, &mut buf) => frame?,
        };

        match frame {
            Some(ClientFrame::Ack { seq: acked }) if acked == seq => {
                queue.ack(seq)?;
            }
            Some(other) => {
                tracing::warn!(queue = queue.name(), ?other, "unexpected frame, expected ack");
                let reply = ServerFrame::error("expected ack");
                wire::write_frame(&mut stream, &reply).await?;
                return Ok(());
            }
            // Disconnected with a delivery in flight; it stays pending.
            None => return Ok(()),
        }
    }
}
