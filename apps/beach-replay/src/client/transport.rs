//! Length-prefixed framing over any byte stream.
//!
//! Every frame is a big-endian `u32` length followed by that many bytes.
//! Handshake frames carry uncompressed JSON; everything after them is
//! encoded with the negotiated codec.

use std::io::ErrorKind;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{CodecError, ReplayError};
use crate::telemetry::logging::hexdump;

const LEN_PREFIX: usize = 4;

/// Reads one frame. A stream that ends cleanly between frames yields
/// [`ReplayError::ConnectionClosed`]; one that ends inside a frame is an I/O
/// error.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Bytes, ReplayError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_PREFIX];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
            return Err(ReplayError::ConnectionClosed);
        }
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        return Err(CodecError::FrameTooLarge {
            size: len,
            limit: max_frame_bytes,
        }
        .into());
    }
    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    trace!(target = "replay::transport", len, "frame read");
    Ok(buf.freeze())
}

pub async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    max_frame_bytes: usize,
) -> Result<(), ReplayError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > max_frame_bytes || payload.len() > u32::MAX as usize {
        return Err(CodecError::FrameTooLarge {
            size: payload.len(),
            limit: max_frame_bytes,
        }
        .into());
    }
    let mut buf = BytesMut::with_capacity(LEN_PREFIX + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    trace!(target = "replay::transport", len = payload.len(), "frame written");
    Ok(())
}

/// Writes `value` as an uncompressed JSON frame.
pub async fn write_json<W, T>(
    writer: &mut W,
    value: &T,
    max_frame_bytes: usize,
) -> Result<(), ReplayError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value).map_err(CodecError::Json)?;
    write_frame(writer, &payload, max_frame_bytes).await
}

pub async fn read_json<R, T>(reader: &mut R, max_frame_bytes: usize) -> Result<T, ReplayError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let frame = read_frame(reader, max_frame_bytes).await?;
    serde_json::from_slice(&frame).map_err(|err| {
        trace!(
            target = "replay::transport",
            error = %err,
            "malformed handshake frame:\n{}",
            hexdump(&frame[..frame.len().min(256)])
        );
        ReplayError::Handshake(err.to_string())
    })
}
