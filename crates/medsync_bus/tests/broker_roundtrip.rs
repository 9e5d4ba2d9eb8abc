//! End-to-end broker tests over real TCP connections.

use medsync_bus::{Broker, BrokerConfig, BusSubscription, ChangeBus, FanoutExchange, TcpBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct TestBroker {
    addr: String,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

async fn start_broker(exchange: Arc<FanoutExchange>) -> TestBroker {
    let config = BrokerConfig::new("127.0.0.1:0".parse().unwrap());
    let broker = Broker::new(config, exchange);
    let listener = broker.bind().await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        broker.run(listener, rx).await.unwrap();
    });

    TestBroker {
        addr,
        shutdown,
        handle,
    }
}

async fn recv(sub: &mut Box<dyn BusSubscription>) -> medsync_bus::Delivery {
    tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .expect("timed out waiting for delivery")
        .expect("subscription failed")
}

#[tokio::test]
async fn publish_reaches_every_subscriber() {
    let exchange = Arc::new(FanoutExchange::in_memory());
    let broker = start_broker(Arc::clone(&exchange)).await;

    // Bind both queues before publishing.
    let bus_b = TcpBus::new(broker.addr.clone(), "hospital_b");
    let bus_c = TcpBus::new(broker.addr.clone(), "hospital_c");
    let mut sub_b = bus_b.subscribe("hospital_b").await.unwrap();
    let mut sub_c = bus_c.subscribe("hospital_c").await.unwrap();

    let bus_a = TcpBus::new(broker.addr.clone(), "hospital_a");
    bus_a.publish(b"first".to_vec()).await.unwrap();
    bus_a.publish(b"second".to_vec()).await.unwrap();

    for sub in [&mut sub_b, &mut sub_c] {
        let d1 = recv(sub).await;
        assert_eq!(d1.payload, b"first".to_vec());
        sub.ack(d1.seq).await.unwrap();

        let d2 = recv(sub).await;
        assert_eq!(d2.payload, b"second".to_vec());
        sub.ack(d2.seq).await.unwrap();
    }

    broker.shutdown.send(true).unwrap();
    broker.handle.await.unwrap();
}

#[tokio::test]
async fn publisher_queue_receives_its_own_events() {
    // Fanout includes the originator's own queue; filtering self-echoes
    // is the consumer's job, not the broker's.
    let exchange = Arc::new(FanoutExchange::in_memory());
    let broker = start_broker(Arc::clone(&exchange)).await;

    let bus = TcpBus::new(broker.addr.clone(), "hospital_a");
    let mut sub = bus.subscribe("hospital_a").await.unwrap();

    bus.publish(b"own event".to_vec()).await.unwrap();

    let delivery = recv(&mut sub).await;
    assert_eq!(delivery.payload, b"own event".to_vec());

    broker.shutdown.send(true).unwrap();
    broker.handle.await.unwrap();
}

#[tokio::test]
async fn unacked_delivery_is_redelivered_on_reconnect() {
    let exchange = Arc::new(FanoutExchange::in_memory());
    let broker = start_broker(Arc::clone(&exchange)).await;

    let bus = TcpBus::new(broker.addr.clone(), "hospital_b");
    let mut sub = bus.subscribe("hospital_b").await.unwrap();

    bus.publish(b"must not be lost".to_vec()).await.unwrap();

    // Receive but crash before acking.
    let first = recv(&mut sub).await;
    assert_eq!(first.payload, b"must not be lost".to_vec());
    drop(sub);

    let mut sub = bus.subscribe("hospital_b").await.unwrap();
    let second = recv(&mut sub).await;
    assert_eq!(second.seq, first.seq);
    assert_eq!(second.payload, first.payload);
    sub.ack(second.seq).await.unwrap();

    broker.shutdown.send(true).unwrap();
    broker.handle.await.unwrap();
}

#[tokio::test]
async fn publish_confirmed_only_after_fanout() {
    let exchange = Arc::new(FanoutExchange::in_memory());
    let broker = start_broker(Arc::clone(&exchange)).await;

    exchange.bind("hospital_b").unwrap();

    let bus = TcpBus::new(broker.addr.clone(), "hospital_a");
    bus.publish(b"durable".to_vec()).await.unwrap();

    // The publish confirmation implies the payload is already queued.
    let queue = exchange.bind("hospital_b").unwrap();
    assert_eq!(queue.pending_len(), 1);

    broker.shutdown.send(true).unwrap();
    broker.handle.await.unwrap();
}

#[tokio::test]
async fn resubscribing_resumes_the_same_queue() {
    let dir = tempfile::tempdir().unwrap();

    // First broker lifetime: accept a publish for hospital_b.
    {
        let exchange = Arc::new(FanoutExchange::open(dir.path()).unwrap());
        let broker = start_broker(Arc::clone(&exchange)).await;

        let bus = TcpBus::new(broker.addr.clone(), "hospital_b");
        let _sub = bus.subscribe("hospital_b").await.unwrap();

        let publisher = TcpBus::new(broker.addr.clone(), "hospital_a");
        publisher.publish(b"across restarts".to_vec()).await.unwrap();

        broker.shutdown.send(true).unwrap();
        broker.handle.await.unwrap();
    }

    // Second broker lifetime over the same data directory.
    let exchange = Arc::new(FanoutExchange::open(dir.path()).unwrap());
    let broker = start_broker(Arc::clone(&exchange)).await;

    let bus = TcpBus::new(broker.addr.clone(), "hospital_b");
    let mut sub = bus.subscribe("hospital_b").await.unwrap();
    let delivery = recv(&mut sub).await;
    assert_eq!(delivery.payload, b"across restarts".to_vec());

    broker.shutdown.send(true).unwrap();
    broker.handle.await.unwrap();
}
