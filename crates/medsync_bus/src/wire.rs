//! Async frame I/O over a byte stream.

use crate::error::{BusError, BusResult};
use bytes::BytesMut;
use medsync_protocol::{decode_frame, encode_frame};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one frame, buffering partial reads in `buf`.
///
/// Returns `Ok(None)` on clean end of stream (peer closed between
/// frames). EOF mid-frame is a transport error. Cancel-safe: bytes read
/// so far stay in `buf`.
pub(crate) async fn read_frame<T, S>(stream: &mut S, buf: &mut BytesMut) -> BusResult<Option<T>>
where
    T: DeserializeOwned,
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = decode_frame(buf)? {
            return Ok(Some(frame));
        }

        let read = stream.read_buf(buf).await?;
        if read == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(BusError::transport_retryable(
                "connection closed mid-frame",
            ));
        }
    }
}

/// Writes one frame to the stream.
pub(crate) async fn write_frame<T, S>(stream: &mut S, message: &T) -> BusResult<()>
where
    T: Serialize,
    S: AsyncWrite + Unpin,
{
    let bytes = encode_frame(message)?;
    stream.write_all(&bytes).await?;
    Ok(())
}
