//! Broker frame messages.
//!
//! Frames are CBOR-encoded on the wire (see [`crate::codec`]). Event
//! payloads inside `Publish` and `Deliver` are opaque bytes: the broker
//! fans them out without interpreting them, and only the consumer decodes
//! them as [`crate::ChangeEvent`]s.

use serde::{Deserialize, Serialize};

/// A frame sent from a client (publisher or subscriber) to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Opens a connection and negotiates the protocol version.
    Hello {
        /// Identifier of the connecting node.
        node: String,
        /// Protocol version the client speaks.
        protocol_version: u16,
    },
    /// Broadcasts an event payload to every bound queue.
    Publish {
        /// Encoded event bytes, opaque to the broker.
        payload: Vec<u8>,
    },
    /// Binds (idempotently) and attaches to this node's durable queue.
    Subscribe {
        /// Identifier of the subscribing node.
        node: String,
    },
    /// Acknowledges a delivery after it has been fully processed.
    Ack {
        /// Sequence number from the corresponding `Deliver` frame.
        seq: u64,
    },
}

/// A frame sent from the broker to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Accepts a `Hello`.
    HelloOk {
        /// Protocol version the broker speaks.
        protocol_version: u16,
    },
    /// Confirms a publish once the payload is durable in every bound queue.
    PublishOk {
        /// Number of queues the payload was fanned out to.
        queues: u32,
    },
    /// Confirms a subscription.
    SubscribeOk {
        /// Name of the durable queue backing this subscription.
        queue: String,
        /// Number of deliveries pending at attach time.
        pending: u64,
    },
    /// Delivers the next payload from the subscriber's queue.
    ///
    /// The broker sends at most one unacknowledged `Deliver` per
    /// subscriber; the next one follows the matching `Ack`.
    Deliver {
        /// Queue sequence number, echoed back in `Ack`.
        seq: u64,
        /// Encoded event bytes.
        payload: Vec<u8>,
    },
    /// Reports a request the broker rejected.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerFrame {
    /// Creates an error frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_frame, encode_frame};
    use bytes::BytesMut;

    #[test]
    fn client_frame_roundtrip() {
        let frames = vec![
            ClientFrame::Hello {
                node: "hospital_a".into(),
                protocol_version: 1,
            },
            ClientFrame::Publish {
                payload: vec![0x7b, 0x7d],
            },
            ClientFrame::Subscribe {
                node: "hospital_a".into(),
            },
            ClientFrame::Ack { seq: 42 },
        ];

        for frame in frames {
            let bytes = encode_frame(&frame).unwrap();
            let mut buf = BytesMut::from(&bytes[..]);
            let decoded: ClientFrame = decode_frame(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, frame);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn server_frame_roundtrip() {
        let frames = vec![
            ServerFrame::HelloOk {
                protocol_version: 1,
            },
            ServerFrame::PublishOk { queues: 3 },
            ServerFrame::SubscribeOk {
                queue: "patients_hospital_a".into(),
                pending: 7,
            },
            ServerFrame::Deliver {
                seq: 9,
                payload: vec![1, 2, 3],
            },
            ServerFrame::error("unsupported protocol version"),
        ];

        for frame in frames {
            let bytes = encode_frame(&frame).unwrap();
            let mut buf = BytesMut::from(&bytes[..]);
            let decoded: ServerFrame = decode_frame(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, frame);
        }
    }
}
