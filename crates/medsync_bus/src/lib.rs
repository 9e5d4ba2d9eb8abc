//! # MedSync Bus
//!
//! The durable broadcast change bus.
//!
//! One fanout exchange carries every patient-record event; each node
//! binds a durable queue named `patients_<node>` and consumes it through
//! a strictly FIFO deliver/ack loop. Delivery is at-least-once per
//! queue: an entry survives broker restarts until acknowledged, and an
//! unacknowledged delivery is redelivered on the next attach.
//!
//! The crate provides both halves:
//!
//! - broker side: [`FanoutExchange`], [`DurableQueue`], [`Broker`]
//! - client side: the [`ChangeBus`] trait with [`TcpBus`] (remote
//!   broker), [`MemoryBus`] (in-process), and [`MockBus`] (failure
//!   injection for tests)

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod broker;
mod client;
mod error;
mod exchange;
mod queue;
mod wire;

pub use broker::{Broker, BrokerConfig};
pub use client::{BusSubscription, ChangeBus, Delivery, MemoryBus, MockBus, TcpBus};
pub use error::{BusError, BusResult};
pub use exchange::{queue_name, FanoutExchange, QUEUE_PREFIX};
pub use queue::DurableQueue;
