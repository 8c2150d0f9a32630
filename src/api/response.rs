//! Response view: reader on the requester side, responder on the
//! request-handler side.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::body::{self, BodyCodec};
use crate::error::{ProtocolError, Result};
use crate::wire::{Frame, ResponseFrame, ResponseKind, UserHeader};

enum Side {
    /// Received from the peer, correlated to a local request.
    Inbound(ResponseFrame),
    /// Bound to a received request; sends replies onto the shared
    /// outbound channel.
    Outbound {
        request: UserHeader,
        out: mpsc::Sender<Frame>,
    },
}

/// One side of a request's response lifecycle.
///
/// A response handler receives the inbound form and reads it; a request
/// handler receives the outbound form pre-bound to the request's
/// identity and calls [`progress`](Self::progress) zero or more times
/// followed by exactly one [`done`](Self::done) or
/// [`error`](Self::error). Sends apply channel backpressure: they block
/// until the write pump accepts the frame.
pub struct Response {
    codec: Arc<dyn BodyCodec>,
    side: Side,
}

impl Response {
    pub(crate) fn inbound(codec: Arc<dyn BodyCodec>, frame: ResponseFrame) -> Self {
        Self {
            codec,
            side: Side::Inbound(frame),
        }
    }

    pub(crate) fn outbound(
        codec: Arc<dyn BodyCodec>,
        request: UserHeader,
        out: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            codec,
            side: Side::Outbound { request, out },
        }
    }

    /// Canonical string form of this response's own identifier.
    /// `None` on the responder side, where frames get their identity
    /// only when sent.
    pub fn id(&self) -> Option<String> {
        match &self.side {
            Side::Inbound(frame) => Some(frame.header.uid.to_string()),
            Side::Outbound { .. } => None,
        }
    }

    /// Canonical string form of the originating request's identifier,
    /// from whichever side constructed this view.
    pub fn request_id(&self) -> String {
        match &self.side {
            Side::Inbound(frame) => frame.request_uid.to_string(),
            Side::Outbound { request, .. } => request.uid.to_string(),
        }
    }

    /// `true` for an inbound successful terminal response.
    pub fn is_done(&self) -> bool {
        self.kind() == Some(ResponseKind::Done)
    }

    /// `true` for an inbound failed terminal response.
    pub fn is_error(&self) -> bool {
        self.kind() == Some(ResponseKind::Error)
    }

    /// `true` for an inbound intermediate progress response.
    pub fn is_progress(&self) -> bool {
        self.kind() == Some(ResponseKind::Progress)
    }

    /// `true` for an inbound cancelled terminal response.
    pub fn is_cancelled(&self) -> bool {
        self.kind() == Some(ResponseKind::Cancelled)
    }

    /// The inbound response kind, if this is the inbound side.
    pub fn kind(&self) -> Option<ResponseKind> {
        match &self.side {
            Side::Inbound(frame) => Some(frame.kind),
            Side::Outbound { .. } => None,
        }
    }

    /// Parse the inbound response body into a typed value.
    pub fn read_to<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.side {
            Side::Inbound(frame) => body::parse(self.codec.as_ref(), &frame.body),
            Side::Outbound { .. } => Err(ProtocolError::UnexpectedFrame(
                "responder side has no body to read".into(),
            )),
        }
    }

    /// Raw body bytes of the inbound response.
    pub fn raw_body(&self) -> Option<&[u8]> {
        match &self.side {
            Side::Inbound(frame) => Some(&frame.body),
            Side::Outbound { .. } => None,
        }
    }

    /// Send the successful terminal response.
    pub async fn done<T: Serialize>(&self, value: &T) -> Result<()> {
        self.send(ResponseKind::Done, value).await
    }

    /// Send the failed terminal response.
    pub async fn error<T: Serialize>(&self, value: &T) -> Result<()> {
        self.send(ResponseKind::Error, value).await
    }

    /// Send an intermediate progress response. May be called any number
    /// of times before the terminal one.
    pub async fn progress<T: Serialize>(&self, value: &T) -> Result<()> {
        self.send(ResponseKind::Progress, value).await
    }

    async fn send<T: Serialize>(&self, kind: ResponseKind, value: &T) -> Result<()> {
        let Side::Outbound { request, out } = &self.side else {
            return Err(ProtocolError::UnexpectedFrame(
                "inbound response cannot send".into(),
            ));
        };

        let frame = ResponseFrame {
            header: UserHeader::new(&request.uri),
            request_uid: request.uid,
            kind,
            body: body::serialize(self.codec.as_ref(), value)?,
        };

        out.send(Frame::Response(frame))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}
