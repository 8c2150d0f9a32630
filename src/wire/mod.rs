//! Binary frame codec.
//!
//! Every frame on the wire is one leading type-tag byte followed by the
//! variant's fields in a fixed order. All multi-byte integers are
//! big-endian. Variable-length fields are explicit-length-prefixed
//! (`u8` for URIs and ping payloads, `u16` for close messages, `u32`
//! for bodies) — never delimiter-terminated, so arbitrary binary
//! payloads are unambiguous.
//!
//! | Tag  | Frame     | Fields                                              |
//! |------|-----------|-----------------------------------------------------|
//! | 0x00 | Handshake | version: u16                                        |
//! | 0x01 | Ping      | ack: bool, len: u8, payload                         |
//! | 0x03 | Close     | code: u8, len: u16, message                         |
//! | 0x06 | Request   | uid: 16B, len: u8, uri, progressive: bool, body     |
//! | 0x07 | Cancel    | uid: 16B, len: u8, uri, request_uid: 16B            |
//! | 0x08 | Response  | uid: 16B, len: u8, uri, request_uid: 16B, kind, body|
//! | 0x10 | Event     | uid: 16B, len: u8, uri, body                        |

mod system;
mod user;

pub use system::{Close, CloseCode, Handshake, Ping};
pub use user::{CancelFrame, EventFrame, RequestFrame, ResponseFrame, ResponseKind, UserHeader};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, Result};

/// Wire-level frame type discriminator. The numeric values are part of
/// the wire contract and must match on both peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Version negotiation, first frame in both directions.
    Handshake = 0x00,
    /// Keepalive probe or its acknowledgement.
    Ping = 0x01,
    /// Terminal frame before dropping the transport.
    Close = 0x03,
    /// Correlated request expecting a terminal response.
    Request = 0x06,
    /// Abandon an in-flight request on the remote peer.
    Cancel = 0x07,
    /// Reply correlated to a request by its uid.
    Response = 0x08,
    /// Fire-and-forget pub/sub event.
    Event = 0x10,
}

impl FrameType {
    /// Look up a frame type by its wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(Self::Handshake),
            0x01 => Some(Self::Ping),
            0x03 => Some(Self::Close),
            0x06 => Some(Self::Request),
            0x07 => Some(Self::Cancel),
            0x08 => Some(Self::Response),
            0x10 => Some(Self::Event),
            _ => None,
        }
    }

    /// The wire tag byte for this frame type.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Handshake => "handshake",
            Self::Ping => "ping",
            Self::Close => "close",
            Self::Request => "request",
            Self::Cancel => "cancel",
            Self::Response => "response",
            Self::Event => "event",
        };
        write!(f, "{name}")
    }
}

/// One decoded protocol frame. Immutable once decoded; each frame is
/// self-contained on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Version negotiation frame.
    Handshake(Handshake),
    /// Keepalive frame.
    Ping(Ping),
    /// Termination frame.
    Close(Close),
    /// Request frame.
    Request(RequestFrame),
    /// Cancellation frame.
    Cancel(CancelFrame),
    /// Response frame.
    Response(ResponseFrame),
    /// Event frame.
    Event(EventFrame),
}

impl Frame {
    /// The wire type of this frame.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Handshake(_) => FrameType::Handshake,
            Self::Ping(_) => FrameType::Ping,
            Self::Close(_) => FrameType::Close,
            Self::Request(_) => FrameType::Request,
            Self::Cancel(_) => FrameType::Cancel,
            Self::Response(_) => FrameType::Response,
            Self::Event(_) => FrameType::Event,
        }
    }

    /// Decode exactly one frame from the reader.
    ///
    /// A clean EOF on the type-tag byte is reported as
    /// [`ProtocolError::Disconnected`] — the peer hung up between
    /// frames, which is a terminal condition rather than a decode
    /// failure. An unknown tag is a [`ProtocolError::MalformedFrame`].
    pub async fn decode<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let tag = match reader.read_u8().await {
            Ok(tag) => tag,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::Disconnected);
            }
            Err(e) => return Err(e.into()),
        };

        let frame_type = FrameType::from_tag(tag)
            .ok_or_else(|| ProtocolError::MalformedFrame(format!("unknown type tag 0x{tag:02x}")))?;

        match frame_type {
            FrameType::Handshake => Handshake::read(reader).await.map(Self::Handshake),
            FrameType::Ping => Ping::read(reader).await.map(Self::Ping),
            FrameType::Close => Close::read(reader).await.map(Self::Close),
            FrameType::Request => RequestFrame::read(reader).await.map(Self::Request),
            FrameType::Cancel => CancelFrame::read(reader).await.map(Self::Cancel),
            FrameType::Response => ResponseFrame::read(reader).await.map(Self::Response),
            FrameType::Event => EventFrame::read(reader).await.map(Self::Event),
        }
    }

    /// Encode this frame, tag byte first, into the buffer.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(self.frame_type().tag());
        match self {
            Self::Handshake(f) => f.write(buf),
            Self::Ping(f) => f.write(buf),
            Self::Close(f) => f.write(buf),
            Self::Request(f) => f.write(buf),
            Self::Cancel(f) => f.write(buf),
            Self::Response(f) => f.write(buf),
            Self::Event(f) => f.write(buf),
        }
    }
}

/// Read `len` raw bytes.
pub(crate) async fn read_bytes<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Read a u8-length-prefixed UTF-8 string (URIs, ping payloads).
pub(crate) async fn read_string_u8<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let len = reader.read_u8().await? as usize;
    let raw = read_bytes(reader, len).await?;
    String::from_utf8(raw)
        .map_err(|e| ProtocolError::MalformedFrame(format!("invalid utf-8 in string field: {e}")))
}

/// Read a u16-length-prefixed UTF-8 string (close messages).
pub(crate) async fn read_string_u16<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let len = reader.read_u16().await? as usize;
    let raw = read_bytes(reader, len).await?;
    String::from_utf8(raw)
        .map_err(|e| ProtocolError::MalformedFrame(format!("invalid utf-8 in string field: {e}")))
}

/// Read a u32-length-prefixed opaque body.
pub(crate) async fn read_body<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes> {
    let len = reader.read_u32().await? as usize;
    Ok(Bytes::from(read_bytes(reader, len).await?))
}

/// Write a u8-length-prefixed string; fails if it exceeds 255 bytes.
pub(crate) fn put_string_u8(buf: &mut BytesMut, field: &str, value: &str) -> Result<()> {
    let len = u8::try_from(value.len())
        .map_err(|_| ProtocolError::FieldTooLarge(format!("{field} exceeds 255 bytes")))?;
    buf.put_u8(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

/// Write a u16-length-prefixed string; fails if it exceeds 65535 bytes.
pub(crate) fn put_string_u16(buf: &mut BytesMut, field: &str, value: &str) -> Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| ProtocolError::FieldTooLarge(format!("{field} exceeds 65535 bytes")))?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

/// Write a u32-length-prefixed opaque body.
pub(crate) fn put_body(buf: &mut BytesMut, body: &Bytes) -> Result<()> {
    let len = u32::try_from(body.len())
        .map_err(|_| ProtocolError::FieldTooLarge("body exceeds u32 range".into()))?;
    buf.put_u32(len);
    buf.put_slice(body);
    Ok(())
}

/// Read a one-byte boolean; any non-zero value is `true`.
pub(crate) async fn read_bool<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool> {
    Ok(reader.read_u8().await? != 0)
}
