//! # MedSync Protocol
//!
//! Event model and wire codecs for MedSync replication.
//!
//! This crate provides:
//! - `ChangeEvent` for patient-record mutations (JSON wire form)
//! - Per-action validation of incoming events
//! - Broker frame messages (`ClientFrame`, `ServerFrame`)
//! - Length-prefixed CBOR frame codec
//!
//! This is a pure protocol crate with no I/O operations. Event payloads
//! travel inside frames as opaque bytes, so a malformed event can be
//! rejected by the consumer without poisoning frame decoding.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod event;
mod messages;

pub use codec::{decode_frame, encode_frame, MAX_FRAME_LEN};
pub use error::{ProtocolError, ProtocolResult};
pub use event::{ChangeEvent, EventAction, PROTOCOL_VERSION};
pub use messages::{ClientFrame, ServerFrame};
