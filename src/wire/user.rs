//! User frames: events, requests, responses, cancellation.
//!
//! Every user frame starts with a [`UserHeader`]: a 16-byte time-ordered
//! unique identifier stamped by the sender plus a short UTF-8 URI naming
//! the logical endpoint. The URI is opaque to the protocol.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use super::{put_body, put_string_u8, read_body, read_bool, read_string_u8};
use crate::error::Result;

/// Common header of every user frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserHeader {
    /// Unique, time-ordered frame identifier, never reused on a connection.
    pub uid: Uuid,
    /// Logical endpoint or topic name, at most 255 bytes of UTF-8.
    pub uri: String,
}

impl UserHeader {
    /// Build a header for an outgoing frame, stamping a fresh identifier.
    pub fn new(uri: &str) -> Self {
        Self {
            uid: Uuid::now_v7(),
            uri: uri.to_string(),
        }
    }

    async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let uid = read_uid(reader).await?;
        let uri = read_string_u8(reader).await?;
        Ok(Self { uid, uri })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_slice(self.uid.as_bytes());
        put_string_u8(buf, "uri", &self.uri)
    }
}

async fn read_uid<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Uuid> {
    let mut raw = [0u8; 16];
    reader.read_exact(&mut raw).await?;
    Ok(Uuid::from_bytes(raw))
}

/// Fire-and-forget pub/sub event. No correlation, no reply expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    /// Frame identity and topic.
    pub header: UserHeader,
    /// Opaque payload, interpreted only by the body codec.
    pub body: Bytes,
}

impl EventFrame {
    pub(crate) async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let header = UserHeader::read(reader).await?;
        let body = read_body(reader).await?;
        Ok(Self { header, body })
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) -> Result<()> {
        self.header.write(buf)?;
        put_body(buf, &self.body)
    }
}

/// Correlated request. The sender registers a response handler keyed by
/// `header.uid` before this frame is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    /// Frame identity and endpoint.
    pub header: UserHeader,
    /// Requester accepts zero or more progress frames before the terminal one.
    pub progressive: bool,
    /// Opaque payload.
    pub body: Bytes,
}

impl RequestFrame {
    pub(crate) async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let header = UserHeader::read(reader).await?;
        let progressive = read_bool(reader).await?;
        let body = read_body(reader).await?;
        Ok(Self {
            header,
            progressive,
            body,
        })
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) -> Result<()> {
        self.header.write(buf)?;
        buf.put_u8(u8::from(self.progressive));
        put_body(buf, &self.body)
    }
}

/// Discriminates the role of a [`ResponseFrame`] in its request's
/// lifecycle. Exactly one Done/Error/Cancelled terminates a request; any
/// number of Progress frames may precede it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseKind {
    /// Successful terminal response.
    Done = 0x00,
    /// Failed terminal response.
    Error = 0x01,
    /// Intermediate response; more will follow.
    Progress = 0x02,
    /// Terminal response to a cancelled request.
    Cancelled = 0x03,
}

impl ResponseKind {
    /// Decode a response kind byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Done),
            0x01 => Some(Self::Error),
            0x02 => Some(Self::Progress),
            0x03 => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this kind ends the request's lifecycle.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Progress)
    }
}

/// Reply to a request, correlated by `request_uid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Own identity of this response frame.
    pub header: UserHeader,
    /// Uid of the originating request — a correlation key, not a reference.
    pub request_uid: Uuid,
    /// Role of this response in the request lifecycle.
    pub kind: ResponseKind,
    /// Opaque payload.
    pub body: Bytes,
}

impl ResponseFrame {
    pub(crate) async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let header = UserHeader::read(reader).await?;
        let request_uid = read_uid(reader).await?;
        let kind_byte = reader.read_u8().await?;
        let kind = ResponseKind::from_byte(kind_byte).ok_or_else(|| {
            crate::error::ProtocolError::MalformedFrame(format!(
                "unknown response kind 0x{kind_byte:02x}"
            ))
        })?;
        let body = read_body(reader).await?;
        Ok(Self {
            header,
            request_uid,
            kind,
            body,
        })
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) -> Result<()> {
        self.header.write(buf)?;
        buf.put_slice(self.request_uid.as_bytes());
        buf.put_u8(self.kind as u8);
        put_body(buf, &self.body)
    }
}

/// Asks the remote peer to abandon processing of an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelFrame {
    /// Own identity of this cancel frame.
    pub header: UserHeader,
    /// Uid of the request to abandon.
    pub request_uid: Uuid,
}

impl CancelFrame {
    pub(crate) async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let header = UserHeader::read(reader).await?;
        let request_uid = read_uid(reader).await?;
        Ok(Self {
            header,
            request_uid,
        })
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) -> Result<()> {
        self.header.write(buf)?;
        buf.put_slice(self.request_uid.as_bytes());
        Ok(())
    }
}
