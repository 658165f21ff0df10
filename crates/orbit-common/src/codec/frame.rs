//! Transport-level framing.
//!
//! Every frame on the wire starts with a 16-byte header whose first two bytes
//! are a magic number selecting the parse strategy:
//!
//! ```text
//! legacy:  [TRANSPORT_MAGIC 2B][reserved 1B][type 1B][request id 8B][len 4B][legacy payload]
//! framed:  [FRAMED_MAGIC 2B][version 1B][type<<5 | serializer 1B][request id 8B][len 4B][body]
//! ```
//!
//! Legacy payloads carry their own 2-byte payload magic and are wrapped by the
//! framer; framed payloads already carry the header and pass through as-is.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{OrbitError, Result};
use crate::protocol::{MessageType, RequestId};

/// Magic of the fixed transport header wrapped around legacy payloads.
pub const TRANSPORT_MAGIC: u16 = 0x0b1a;
/// Magic the legacy payload codec prefixes its output with.
pub const LEGACY_PAYLOAD_MAGIC: u16 = 0x0bc1;
/// Magic of the self-framed payload codec.
pub const FRAMED_MAGIC: u16 = 0x0bf2;

pub const HEADER_LEN: usize = 16;

/// Maximum frame body size (100 MB)
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Reads the big-endian magic at the start of `bytes`.
pub fn peek_magic(bytes: &[u8]) -> Result<u16> {
    if bytes.len() < 2 {
        return Err(OrbitError::Codec(format!(
            "need 2 bytes to read magic, got {}",
            bytes.len()
        )));
    }
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Value of the 4-byte length field for a body of `len` bytes.
///
/// Fails with [`OrbitError::FrameTooLarge`] past `max_frame_size`, so a peer
/// is never sent a frame its reader would refuse.
pub fn length_field(len: usize, max_frame_size: usize) -> Result<u32> {
    if len > max_frame_size {
        return Err(OrbitError::FrameTooLarge(len, max_frame_size));
    }
    u32::try_from(len).map_err(|_| OrbitError::FrameTooLarge(len, max_frame_size))
}

/// Wraps a payload produced by a payload codec into a transport frame.
///
/// Legacy payloads get the fixed transport header; self-framed payloads are
/// returned untouched.
pub fn frame(payload: Bytes, message_type: MessageType, request_id: RequestId) -> Result<Bytes> {
    frame_within(payload, message_type, request_id, MAX_FRAME_SIZE)
}

/// [`frame`] with an explicit body limit.
pub fn frame_within(
    payload: Bytes,
    message_type: MessageType,
    request_id: RequestId,
    max_frame_size: usize,
) -> Result<Bytes> {
    match peek_magic(&payload)? {
        LEGACY_PAYLOAD_MAGIC => {
            let len = length_field(payload.len(), max_frame_size)?;
            let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
            buf.put_u16(TRANSPORT_MAGIC);
            buf.put_u8(0);
            buf.put_u8(message_type as u8);
            buf.put_u64(request_id);
            buf.put_u32(len);
            buf.put_slice(&payload);
            Ok(buf.freeze())
        }
        FRAMED_MAGIC => {
            let body = payload.len().saturating_sub(HEADER_LEN);
            length_field(body, max_frame_size)?;
            Ok(payload)
        }
        other => Err(OrbitError::InvalidMagic(other)),
    }
}

/// A transport frame split into header fields and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub magic: u16,
    pub message_type: MessageType,
    pub request_id: RequestId,
    /// For legacy frames: the legacy payload (starting with its own magic).
    /// For framed frames: the whole frame including the header.
    pub payload: Bytes,
}

/// Splits one complete frame. `bytes` must hold exactly one frame.
pub fn unframe(bytes: Bytes) -> Result<Frame> {
    let magic = peek_magic(&bytes)?;
    if magic != TRANSPORT_MAGIC && magic != FRAMED_MAGIC {
        return Err(OrbitError::InvalidMagic(magic));
    }
    if bytes.len() < HEADER_LEN {
        return Err(OrbitError::Codec(format!(
            "truncated header: {} bytes",
            bytes.len()
        )));
    }

    let mut header = &bytes[3..HEADER_LEN];
    let type_byte = header.get_u8();
    let request_id = header.get_u64();
    let len = header.get_u32() as usize;
    if bytes.len() != HEADER_LEN + len {
        return Err(OrbitError::Codec(format!(
            "frame length mismatch: header says {} bytes, got {}",
            len,
            bytes.len() - HEADER_LEN
        )));
    }

    match magic {
        TRANSPORT_MAGIC => Ok(Frame {
            magic,
            message_type: MessageType::from_u8(type_byte),
            request_id,
            payload: bytes.slice(HEADER_LEN..),
        }),
        _ => Ok(Frame {
            magic,
            message_type: MessageType::from_u8(type_byte >> 5),
            request_id,
            payload: bytes,
        }),
    }
}

/// Reads one complete frame (header and body) from the stream.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly before a new
/// frame started.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header[..1]).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(map_io_error(e, "reading magic")),
    }
    // A frame has started; running out of bytes from here on is a truncation.
    reader
        .read_exact(&mut header[1..2])
        .await
        .map_err(|e| map_io_error(e, "reading magic"))?;

    let magic = u16::from_be_bytes([header[0], header[1]]);
    if magic != TRANSPORT_MAGIC && magic != FRAMED_MAGIC {
        return Err(OrbitError::InvalidMagic(magic));
    }

    reader
        .read_exact(&mut header[2..])
        .await
        .map_err(|e| map_io_error(e, "reading header"))?;

    let len = (&header[12..]).get_u32() as usize;
    if len > max_frame_size {
        return Err(OrbitError::FrameTooLarge(len, max_frame_size));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + len);
    buf.put_slice(&header);
    buf.resize(HEADER_LEN + len, 0);
    reader
        .read_exact(&mut buf[HEADER_LEN..])
        .await
        .map_err(|e| map_io_error(e, "reading body"))?;

    Ok(Some(buf.freeze()))
}

/// Writes one already-framed buffer and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(frame)
        .await
        .map_err(|e| map_io_error(e, "writing frame"))?;
    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing stream"))?;
    Ok(())
}

/// Map IO errors to appropriate OrbitError variants
///
/// - Connection errors -> `Connection`
/// - Other IO errors -> `Io`
pub fn map_io_error(err: std::io::Error, context: &str) -> OrbitError {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof => {
            OrbitError::Connection(format!("{}: connection lost", context))
        }
        _ => OrbitError::Io(err),
    }
}
