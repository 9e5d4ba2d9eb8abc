//! # MedSync Storage
//!
//! Low-level storage primitives shared by the patient store, the broker's
//! durable queues, and the publisher's outbox:
//!
//! - [`StorageBackend`] — an opaque append-oriented byte store
//! - [`FileBackend`] / [`InMemoryBackend`] — persistent and test backends
//! - [`Journal`] — an append-only, checksummed record log with torn-tail
//!   recovery
//!
//! Backends are opaque byte stores; all record framing lives in
//! [`Journal`]. Higher layers define what a record means.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod journal;

pub use backend::{FileBackend, InMemoryBackend, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use journal::Journal;
