//! System frames: handshake, keepalive, close.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{put_string_u16, put_string_u8, read_bool, read_string_u16, read_string_u8};
use crate::error::Result;

/// Version negotiation frame, exchanged once in each direction before
/// anything else. Versions must match exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol version spoken by the sender.
    pub version: u16,
}

impl Handshake {
    pub(crate) async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let version = reader.read_u16().await?;
        Ok(Self { version })
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u16(self.version);
        Ok(())
    }
}

/// Keepalive frame. A non-ack ping must be answered with an ack ping
/// carrying the same payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    /// `true` when this ping answers an earlier one.
    pub ack: bool,
    /// Opaque payload echoed back in the acknowledgement, at most 255 bytes.
    pub payload: String,
}

impl Ping {
    pub(crate) async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let ack = read_bool(reader).await?;
        let payload = read_string_u8(reader).await?;
        Ok(Self { ack, payload })
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(u8::from(self.ack));
        put_string_u8(buf, "ping payload", &self.payload)
    }
}

/// Reason codes carried by a [`Close`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CloseCode {
    /// Unspecified reason.
    #[default]
    Unknown = 0x00,
    /// Handshake carried a version the acceptor does not speak.
    VersionNotSupported = 0x01,
    /// Peer timed the connection out.
    Timeout = 0x02,
    /// Peer asks us to reconnect elsewhere.
    Redirect = 0x03,
}

impl CloseCode {
    /// Decode a close code byte; unknown values map to [`CloseCode::Unknown`].
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Self::VersionNotSupported,
            0x02 => Self::Timeout,
            0x03 => Self::Redirect,
            _ => Self::Unknown,
        }
    }
}

/// Terminal frame sent by either side before dropping the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    /// Machine-readable close reason.
    pub code: CloseCode,
    /// Human-readable detail, at most 65535 bytes.
    pub message: String,
}

impl Close {
    pub(crate) async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let code = CloseCode::from_byte(reader.read_u8().await?);
        let message = read_string_u16(reader).await?;
        Ok(Self { code, message })
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(self.code as u8);
        put_string_u16(buf, "close message", &self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_code_byte_mapping() {
        assert_eq!(CloseCode::from_byte(0x00), CloseCode::Unknown);
        assert_eq!(CloseCode::from_byte(0x01), CloseCode::VersionNotSupported);
        assert_eq!(CloseCode::from_byte(0x02), CloseCode::Timeout);
        assert_eq!(CloseCode::from_byte(0x03), CloseCode::Redirect);
        // Forward compatibility: unknown codes degrade to Unknown.
        assert_eq!(CloseCode::from_byte(0x7f), CloseCode::Unknown);
    }

    #[tokio::test]
    async fn ping_ack_flag_on_wire() {
        let mut buf = BytesMut::new();
        Ping {
            ack: true,
            payload: "x".into(),
        }
        .write(&mut buf)
        .unwrap();
        assert_eq!(&buf[..], &[0x01, 0x01, b'x']);

        let decoded = Ping::read(&mut &buf[..]).await.unwrap();
        assert!(decoded.ack);
        assert_eq!(decoded.payload, "x");
    }

    #[tokio::test]
    async fn close_message_length_is_u16() {
        let message = "m".repeat(300);
        let mut buf = BytesMut::new();
        Close {
            code: CloseCode::Timeout,
            message: message.clone(),
        }
        .write(&mut buf)
        .unwrap();
        // code byte + 2-byte big-endian length prefix.
        assert_eq!(buf[0], 0x02);
        assert_eq!(u16::from_be_bytes([buf[1], buf[2]]), 300);

        let decoded = Close::read(&mut &buf[..]).await.unwrap();
        assert_eq!(decoded.message, message);
    }
}
