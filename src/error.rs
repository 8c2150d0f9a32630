//! Protocol error types.
//!
//! The taxonomy follows the layers of the engine: transport failures
//! terminate the frame stream, protocol violations fail connection
//! establishment, routing misses are logged and dropped by the dealers
//! (and therefore never appear here), and registration or body-codec
//! failures are reported synchronously to the caller.

use thiserror::Error;

/// Errors produced by the protocol engine.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The byte stream carried a frame this implementation cannot decode.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A frame arrived that is not valid in the current state,
    /// e.g. a non-handshake frame during connection establishment.
    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),

    /// The peer negotiated a protocol version we do not speak.
    #[error("Version not supported: peer requested {peer}, local version is {local}")]
    VersionNotSupported {
        /// Version advertised by the remote peer.
        peer: u16,
        /// Version implemented locally.
        local: u16,
    },

    /// The peer refused the connection with a close frame during handshake.
    #[error("Connection refused by peer: {0}")]
    Refused(String),

    /// A second request handler was registered for a URI that already has one.
    #[error("Request handler already registered for uri '{0}'")]
    AlreadyRegistered(String),

    /// A field exceeded its wire-format size limit.
    #[error("Field too large for wire format: {0}")]
    FieldTooLarge(String),

    /// The connection is no longer able to send frames
    /// (write pump gone, transport closed).
    #[error("Connection closed")]
    ConnectionClosed,

    /// The peer closed its end of the transport cleanly.
    #[error("Peer disconnected")]
    Disconnected,

    /// Body codec failed to serialize or parse a payload.
    #[error("Body codec error: {0}")]
    BodyCodec(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error on the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
