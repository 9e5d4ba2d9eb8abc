//! Length-prefixed frame codec.
//!
//! Each frame on the wire is a 4-byte big-endian body length followed by a
//! CBOR-encoded body. Decoding is incremental: callers feed a growing
//! buffer and get `None` until a full frame has arrived.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum accepted frame body length (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Length of the frame header.
const HEADER_LEN: usize = 4;

/// Encodes a message as a length-prefixed CBOR frame.
pub fn encode_frame<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(message, &mut body)
        .map_err(|e| ProtocolError::frame(format!("failed to encode frame: {e}")))?;

    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.put_u32(body.len() as u32);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes one frame from the front of `buf`, if a complete one is present.
///
/// Returns `Ok(None)` when more bytes are needed. On success the consumed
/// bytes are removed from `buf`, so the function can be called in a loop
/// to drain several buffered frames.
pub fn decode_frame<T: DeserializeOwned>(buf: &mut BytesMut) -> ProtocolResult<Option<T>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&buf[..HEADER_LEN]);
    let body_len = u32::from_be_bytes(header) as usize;

    if body_len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: body_len,
            max: MAX_FRAME_LEN,
        });
    }

    if buf.len() < HEADER_LEN + body_len {
        return Ok(None);
    }

    buf.advance(HEADER_LEN);
    let body = buf.split_to(body_len);

    let message = ciborium::de::from_reader(&body[..])
        .map_err(|e| ProtocolError::frame(format!("failed to decode frame: {e}")))?;
    Ok(Some(message))
}
