//! # MedSync Store
//!
//! The node-local patient-record store.
//!
//! `PatientStore` keeps the full record set in memory and persists every
//! committed mutation to an append-only journal, replayed on open. All
//! writes go through [`PatientStore::transaction`], whose closure-scoped
//! write lock is the single serialization point between locally
//! originated mutations and remotely replicated applies.
//!
//! Each node's store is exclusively owned: an advisory directory lock
//! rejects a second opener, and no other node ever touches it directly.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod patient;
mod store;

pub use error::{StoreError, StoreResult};
pub use patient::{PatientId, PatientRecord};
pub use store::{PatientStore, StoreTxn};
