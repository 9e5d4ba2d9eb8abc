//! Bus client abstraction and implementations.

use crate::error::{BusError, BusResult};
use crate::exchange::FanoutExchange;
use crate::queue::DurableQueue;
use crate::wire;
use async_trait::async_trait;
use bytes::BytesMut;
use medsync_protocol::{ClientFrame, ServerFrame, PROTOCOL_VERSION};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;

/// One payload delivered from a subscription queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Queue sequence number, passed back to acknowledge.
    pub seq: u64,
    /// Encoded event bytes.
    pub payload: Vec<u8>,
}

/// A client-side handle to the change bus.
///
/// `publish` returns only once the payload is durable in every bound
/// queue. `subscribe` attaches to the node's durable queue; the same
/// node id always reaches the same queue.
#[async_trait]
pub trait ChangeBus: Send + Sync {
    /// Broadcasts an encoded event to all bound subscriber queues.
    async fn publish(&self, payload: Vec<u8>) -> BusResult<()>;

    /// Attaches to the durable queue for `node`, binding it if needed.
    async fn subscribe(&self, node: &str) -> BusResult<Box<dyn BusSubscription>>;
}

/// An attached subscription delivering queued payloads in FIFO order.
///
/// `next` blocks cooperatively until an entry is available. An entry is
/// redelivered on a later attach unless it was acknowledged, so callers
/// must ack only after they have durably processed the delivery.
#[async_trait]
pub trait BusSubscription: Send {
    /// Waits for the next delivery.
    async fn next(&mut self) -> BusResult<Delivery>;

    /// Acknowledges a delivery by sequence number.
    async fn ack(&mut self, seq: u64) -> BusResult<()>;
}

// ---------------------------------------------------------------------------
// In-process bus
// ---------------------------------------------------------------------------

/// A bus wrapping a [`FanoutExchange`] in the same process.
///
/// Used by tests and single-process deployments; behavior (durability,
/// FIFO, redelivery of unacked entries) matches the TCP broker.
pub struct MemoryBus {
    exchange: Arc<FanoutExchange>,
}

impl MemoryBus {
    /// Creates a bus over a fresh in-memory exchange.
    pub fn new() -> Self {
        Self {
            exchange: Arc::new(FanoutExchange::in_memory()),
        }
    }

    /// Creates a bus over an existing exchange.
    pub fn with_exchange(exchange: Arc<FanoutExchange>) -> Self {
        Self { exchange }
    }

    /// Returns the underlying exchange.
    pub fn exchange(&self) -> &Arc<FanoutExchange> {
        &self.exchange
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeBus for MemoryBus {
    async fn publish(&self, payload: Vec<u8>) -> BusResult<()> {
        self.exchange.publish(&payload)?;
        Ok(())
    }

    async fn subscribe(&self, node: &str) -> BusResult<Box<dyn BusSubscription>> {
        let queue = self.exchange.bind(node)?;
        Ok(Box::new(MemorySubscription { queue }))
    }
}

struct MemorySubscription {
    queue: Arc<DurableQueue>,
}

#[async_trait]
impl BusSubscription for MemorySubscription {
    async fn next(&mut self) -> BusResult<Delivery> {
        loop {
            self.queue.wait_for_pending().await;
            if let Some((seq, payload)) = self.queue.front() {
                return Ok(Delivery { seq, payload });
            }
        }
    }

    async fn ack(&mut self, seq: u64) -> BusResult<()> {
        self.queue.ack(seq)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TCP bus
// ---------------------------------------------------------------------------

struct Conn {
    stream: TcpStream,
    buf: BytesMut,
}

/// A bus client connected to a remote broker.
///
/// The publish connection is established lazily, reused across
/// publishes, and dropped on failure so the next publish reconnects —
/// never one connection per event. Subscriptions get their own dedicated
/// connection.
pub struct TcpBus {
    addr: String,
    node: String,
    publish_conn: tokio::sync::Mutex<Option<Conn>>,
}

impl TcpBus {
    /// Creates a client for the broker at `addr`, identifying as `node`.
    pub fn new(addr: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            node: node.into(),
            publish_conn: tokio::sync::Mutex::new(None),
        }
    }

    async fn handshake(&self, node: &str) -> BusResult<Conn> {
        let stream = TcpStream::connect(&self.addr).await?;
        let mut conn = Conn {
            stream,
            buf: BytesMut::new(),
        };

        wire::write_frame(
            &mut conn.stream,
            &ClientFrame::Hello {
                node: node.to_string(),
                protocol_version: PROTOCOL_VERSION,
            },
        )
        .await?;

        match wire::read_frame::<ServerFrame, _>(&mut conn.stream, &mut conn.buf).await? {
            Some(ServerFrame::HelloOk { .. }) => Ok(conn),
            Some(ServerFrame::Error { message }) => Err(BusError::Rejected(message)),
            Some(other) => Err(BusError::transport_fatal(format!(
                "unexpected reply to hello: {other:?}"
            ))),
            None => Err(BusError::transport_retryable(
                "connection closed during handshake",
            )),
        }
    }
}

#[async_trait]
impl ChangeBus for TcpBus {
    async fn publish(&self, payload: Vec<u8>) -> BusResult<()> {
        let mut guard = self.publish_conn.lock().await;
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.handshake(&self.node).await?,
        };

        match publish_on(&mut conn, payload).await {
            Ok(()) => {
                // Return the healthy connection for reuse.
                *guard = Some(conn);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn subscribe(&self, node: &str) -> BusResult<Box<dyn BusSubscription>> {
        let mut conn = self.handshake(node).await?;

        wire::write_frame(
            &mut conn.stream,
            &ClientFrame::Subscribe {
                node: node.to_string(),
            },
        )
        .await?;

        match wire::read_frame::<ServerFrame, _>(&mut conn.stream, &mut conn.buf).await? {
            Some(ServerFrame::SubscribeOk { queue, pending }) => {
                tracing::debug!(queue = %queue, pending, "subscribed");
                Ok(Box::new(TcpSubscription { conn }))
            }
            Some(ServerFrame::Error { message }) => Err(BusError::Rejected(message)),
            Some(other) => Err(BusError::transport_fatal(format!(
                "unexpected reply to subscribe: {other:?}"
            ))),
            None => Err(BusError::transport_retryable(
                "connection closed during subscribe",
            )),
        }
    }
}

async fn publish_on(conn: &mut Conn, payload: Vec<u8>) -> BusResult<()> {
    wire::write_frame(&mut conn.stream, &ClientFrame::Publish { payload }).await?;

    match wire::read_frame::<ServerFrame, _>(&mut conn.stream, &mut conn.buf).await? {
        Some(ServerFrame::PublishOk { queues }) => {
            tracing::debug!(queues, "publish confirmed");
            Ok(())
        }
        Some(ServerFrame::Error { message }) => Err(BusError::Rejected(message)),
        Some(other) => Err(BusError::transport_fatal(format!(
            "unexpected reply to publish: {other:?}"
        ))),
        None => Err(BusError::transport_retryable(
            "connection closed awaiting publish confirmation",
        )),
    }
}

struct TcpSubscription {
    conn: Conn,
}

#[async_trait]
impl BusSubscription for TcpSubscription {
    async fn next(&mut self) -> BusResult<Delivery> {
        match wire::read_frame::<ServerFrame, _>(&mut self.conn.stream, &mut self.conn.buf).await? {
            Some(ServerFrame::Deliver { seq, payload }) => Ok(Delivery { seq, payload }),
            Some(ServerFrame::Error { message }) => Err(BusError::Rejected(message)),
            Some(other) => Err(BusError::transport_fatal(format!(
                "unexpected frame on subscription: {other:?}"
            ))),
            None => Err(BusError::transport_retryable("subscription closed")),
        }
    }

    async fn ack(&mut self, seq: u64) -> BusResult<()> {
        wire::write_frame(&mut self.conn.stream, &ClientFrame::Ack { seq }).await
    }
}

// ---------------------------------------------------------------------------
// Mock bus
// ---------------------------------------------------------------------------

/// A [`MemoryBus`] wrapper with scriptable failure injection, for
/// publisher and consumer tests.
pub struct MockBus {
    inner: MemoryBus,
    fail_publishes: AtomicU32,
    fail_subscribes: AtomicU32,
    published: Mutex<Vec<Vec<u8>>>,
}

impl MockBus {
    /// Creates a mock bus over a fresh in-memory exchange.
    pub fn new() -> Self {
        Self {
            inner: MemoryBus::new(),
            fail_publishes: AtomicU32::new(0),
            fail_subscribes: AtomicU32::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Makes the next `count` publishes fail with a retryable error.
    pub fn fail_next_publishes(&self, count: u32) {
        self.fail_publishes.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` subscribes fail with a retryable error.
    pub fn fail_next_subscribes(&self, count: u32) {
        self.fail_subscribes.store(count, Ordering::SeqCst);
    }

    /// Returns every successfully published payload, in order.
    pub fn published(&self) -> Vec<Vec<u8>> {
        self.published.lock().clone()
    }

    /// Returns the underlying exchange.
    pub fn exchange(&self) -> &Arc<FanoutExchange> {
        self.inner.exchange()
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

fn try_consume(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ChangeBus for MockBus {
    async fn publish(&self, payload: Vec<u8>) -> BusResult<()> {
        if try_consume(&self.fail_publishes) {
            return Err(BusError::transport_retryable("injected publish failure"));
        }
        self.published.lock().push(payload.clone());
        self.inner.publish(payload).await
    }

    async fn subscribe(&self, node: &str) -> BusResult<Box<dyn BusSubscription>> {
        if try_consume(&self.fail_subscribes) {
            return Err(BusError::transport_retryable("injected subscribe failure"));
        }
        self.inner.subscribe(node).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_bus_delivers_published_payloads() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("hospital_b").await.unwrap();

        bus.publish(b"event".to_vec()).await.unwrap();

        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.payload, b"event".to_vec());
        sub.ack(delivery.seq).await.unwrap();
        assert_eq!(bus.exchange().bind("hospital_b").unwrap().pending_len(), 0);
    }

    #[tokio::test]
    async fn memory_bus_redelivers_unacked() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("hospital_b").await.unwrap();
        bus.publish(b"event".to_vec()).await.unwrap();

        let first = sub.next().await.unwrap();
        drop(sub);

        // A new attach sees the same entry again.
        let mut sub = bus.subscribe("hospital_b").await.unwrap();
        let second = sub.next().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn mock_bus_injects_publish_failures() {
        let bus = MockBus::new();
        bus.fail_next_publishes(2);

        assert!(bus.publish(b"a".to_vec()).await.is_err());
        assert!(bus.publish(b"b".to_vec()).await.is_err());
        bus.publish(b"c".to_vec()).await.unwrap();

        assert_eq!(bus.published(), vec![b"c".to_vec()]);
    }

    #[tokio::test]
    async fn mock_bus_injects_subscribe_failures() {
        let bus = MockBus::new();
        bus.fail_next_subscribes(1);

        assert!(bus.subscribe("hospital_b").await.is_err());
        assert!(bus.subscribe("hospital_b").await.is_ok());
    }
}
