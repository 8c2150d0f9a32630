//! Connection: one transport session.
//!
//! `Connection::establish` drives the version handshake synchronously,
//! then spawns the read pump (dispatching decoded frames to the
//! dealers) and the write pump (serializing every outgoing frame from
//! one shared channel, which orders all writes without locking). The
//! handshake finishes before any concurrent dispatch begins, so there
//! are no races on the handshake frames.

use std::future::Future;
use std::sync::Arc;

use bytes::BytesMut;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{Event, Request, Response};
use crate::body::{self, BodyCodec};
use crate::dealer::{EventDealer, RequestDealer, RequestDispatch, ResponseDealer, TaskTracker};
use crate::error::{ProtocolError, Result};
use crate::parser::FrameStream;
use crate::wire::{
    CancelFrame, Close, CloseCode, EventFrame, Frame, Handshake, Ping, RequestFrame, UserHeader,
};
use crate::PROTOCOL_VERSION;

/// Outbound frames buffered between senders and the write pump.
const OUTBOUND_DEPTH: usize = 64;

/// Which side of the handshake this peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the handshake first and waits for the echo.
    Initiator,
    /// Waits for the peer's handshake and validates its version.
    Acceptor,
}

/// One protocol session over a duplex byte stream.
///
/// Dropping the connection stops the read pump; the write pump then
/// drains any already-queued frames and releases the transport, at
/// which point the peer observes EOF. In-flight handler tasks are
/// abandoned unless [`drain`](Self::drain) is awaited first.
pub struct Connection {
    outbound: mpsc::Sender<Frame>,
    codec: Arc<dyn BodyCodec>,
    events: EventDealer,
    requests: RequestDealer,
    responses: ResponseDealer,
    tasks: Arc<TaskTracker>,
    shutdown: watch::Receiver<bool>,
    read_pump: tokio::task::AbortHandle,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Perform the handshake over `transport` and start the session.
    ///
    /// Fails without starting any pump when the handshake cannot be
    /// completed: version mismatch, an unexpected frame, a peer close,
    /// or a transport error. The transport is dropped (closed) on
    /// failure.
    pub async fn establish<T>(transport: T, role: Role, codec: Arc<dyn BodyCodec>) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(transport);
        let mut frames = FrameStream::spawn(read_half);

        match role {
            Role::Initiator => handshake_initiate(&mut frames, &mut write_half).await?,
            Role::Acceptor => handshake_accept(&mut frames, &mut write_half).await?,
        }

        let (outbound, out_rx) = mpsc::channel::<Frame>(OUTBOUND_DEPTH);
        let tasks = TaskTracker::new();

        let (events, events_tx) = EventDealer::start(Arc::clone(&codec), Arc::clone(&tasks));
        let (requests, requests_tx) =
            RequestDealer::start(Arc::clone(&codec), outbound.clone(), Arc::clone(&tasks));
        let (responses, responses_tx) =
            ResponseDealer::start(Arc::clone(&codec), Arc::clone(&tasks));

        let (shutdown_tx, shutdown) = watch::channel(false);

        tokio::spawn(write_pump(out_rx, write_half));
        let read_pump = tokio::spawn(read_pump(
            frames,
            outbound.clone(),
            events_tx,
            requests_tx,
            responses_tx,
            shutdown_tx,
        ))
        .abort_handle();

        Ok(Self {
            outbound,
            codec,
            events,
            requests,
            responses,
            tasks,
            shutdown,
            read_pump,
        })
    }

    /// Subscribe a handler to events published on `uri`. Multiple
    /// handlers per URI are allowed; each receives every event.
    pub fn on_event<F, Fut>(&self, uri: &str, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.events
            .subscribe(uri, Arc::new(move |event| Box::pin(handler(event))));
    }

    /// Bind the request handler for `uri`. At most one handler per URI;
    /// a second registration fails and leaves the first in place.
    pub fn on_request<F, Fut>(&self, uri: &str, handler: F) -> Result<()>
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.requests.register(
            uri,
            Arc::new(move |request, response| Box::pin(handler(request, response))),
        )
    }

    /// Publish a fire-and-forget event. Blocks when the write pump is
    /// backed up (channel backpressure).
    pub async fn send_event<T: Serialize>(&self, uri: &str, value: &T) -> Result<()> {
        let frame = EventFrame {
            header: user_header(uri)?,
            body: body::serialize(self.codec.as_ref(), value)?,
        };
        self.send(Frame::Event(frame)).await
    }

    /// Send a request and register `handler` for its responses. The
    /// handler runs for every progress response and exactly once for
    /// the terminal one. Returns the request id, usable with
    /// [`cancel_request`](Self::cancel_request).
    ///
    /// Set `progressive` when the handler accepts progress responses
    /// before the terminal one.
    pub async fn send_request<T, F, Fut>(
        &self,
        uri: &str,
        value: &T,
        progressive: bool,
        handler: F,
    ) -> Result<Uuid>
    where
        T: Serialize,
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let frame = RequestFrame {
            header: user_header(uri)?,
            progressive,
            body: body::serialize(self.codec.as_ref(), value)?,
        };
        let uid = frame.header.uid;

        // Register before the frame hits the wire so a fast reply
        // cannot arrive ahead of its handler.
        self.responses
            .register(uid, Arc::new(move |response| Box::pin(handler(response))));

        if let Err(err) = self.send(Frame::Request(frame)).await {
            self.responses.unregister(uid);
            return Err(err);
        }
        Ok(uid)
    }

    /// Ask the peer to abandon an in-flight request. The peer answers
    /// with a `Cancelled` terminal response if the request was still
    /// running.
    pub async fn cancel_request(&self, request_id: Uuid) -> Result<()> {
        let frame = CancelFrame {
            header: UserHeader::new(""),
            request_uid: request_id,
        };
        self.send(Frame::Cancel(frame)).await
    }

    /// Send a close frame with [`CloseCode::Unknown`].
    pub async fn close(&self, message: &str) -> Result<()> {
        self.close_with_code(CloseCode::Unknown, message).await
    }

    /// Send a close frame with an explicit reason code.
    pub async fn close_with_code(&self, code: CloseCode, message: &str) -> Result<()> {
        self.send(Frame::Close(Close {
            code,
            message: message.to_string(),
        }))
        .await
    }

    /// Resolve once the read pump has terminated: peer close, transport
    /// EOF, or a decode error.
    pub async fn closed(&self) {
        let mut shutdown = self.shutdown.clone();
        let _ = shutdown.wait_for(|closed| *closed).await;
    }

    /// Wait until every spawned handler task has finished.
    pub async fn drain(&self) {
        self.tasks.wait_idle().await;
    }

    /// Name of the body format this connection was built with.
    pub fn body_format(&self) -> &'static str {
        self.codec.name()
    }

    async fn send(&self, frame: Frame) -> Result<()> {
        // The write pump outlives the read pump, so check the session
        // state rather than the channel: once the read side terminated
        // the session is over even though the channel would still accept.
        if *self.shutdown.borrow() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Stopping the read pump cascades: the dealer inboxes close,
        // their loops exit, the last outbound sender drops and the
        // write pump ends after flushing what was already queued.
        self.read_pump.abort();
    }
}

/// Build a header for an outgoing user frame, rejecting oversized URIs
/// at the call site rather than in the write pump.
fn user_header(uri: &str) -> Result<UserHeader> {
    if uri.len() > u8::MAX as usize {
        return Err(ProtocolError::FieldTooLarge(format!(
            "uri of {} bytes exceeds the 255-byte limit",
            uri.len()
        )));
    }
    Ok(UserHeader::new(uri))
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let mut buf = BytesMut::with_capacity(64);
    frame.encode(&mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Initiator side: send our handshake, wait for the echo.
async fn handshake_initiate<T>(
    frames: &mut FrameStream,
    writer: &mut WriteHalf<T>,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite,
{
    write_frame(
        writer,
        &Frame::Handshake(Handshake {
            version: PROTOCOL_VERSION,
        }),
    )
    .await?;

    match frames.expect_next().await? {
        Frame::Handshake(_) => Ok(()),
        Frame::Close(close) => Err(ProtocolError::Refused(close.message)),
        frame => Err(ProtocolError::UnexpectedFrame(format!(
            "{} during handshake",
            frame.frame_type()
        ))),
    }
}

/// Acceptor side: wait for the peer's handshake, validate the version,
/// echo it back or refuse.
async fn handshake_accept<T>(frames: &mut FrameStream, writer: &mut WriteHalf<T>) -> Result<()>
where
    T: AsyncRead + AsyncWrite,
{
    match frames.expect_next().await? {
        Frame::Handshake(handshake) if handshake.version == PROTOCOL_VERSION => {
            write_frame(writer, &Frame::Handshake(handshake)).await?;
            Ok(())
        }
        Frame::Handshake(handshake) => {
            write_frame(
                writer,
                &Frame::Close(Close {
                    code: CloseCode::VersionNotSupported,
                    message: format!("version {} not supported", handshake.version),
                }),
            )
            .await?;
            Err(ProtocolError::VersionNotSupported {
                peer: handshake.version,
                local: PROTOCOL_VERSION,
            })
        }
        frame => Err(ProtocolError::UnexpectedFrame(format!(
            "{} during handshake",
            frame.frame_type()
        ))),
    }
}

/// Serializes every outgoing frame in receipt order onto the transport.
async fn write_pump<T>(mut out_rx: mpsc::Receiver<Frame>, mut writer: WriteHalf<T>)
where
    T: AsyncRead + AsyncWrite,
{
    let mut buf = BytesMut::with_capacity(4096);
    while let Some(frame) = out_rx.recv().await {
        buf.clear();
        if let Err(err) = frame.encode(&mut buf) {
            // Oversized fields are rejected at the send call; anything
            // left here is a bug worth hearing about, not worth dying for.
            warn!(error = %err, "dropping unencodable outbound frame");
            continue;
        }
        if let Err(err) = writer.write_all(&buf).await {
            warn!(error = %err, "transport write failed, stopping write pump");
            return;
        }
        if let Err(err) = writer.flush().await {
            warn!(error = %err, "transport flush failed, stopping write pump");
            return;
        }
    }
}

/// Consumes the frame stream and dispatches by frame type until the
/// stream terminates. Dropping the dealer senders on exit ends their
/// dispatch loops.
async fn read_pump(
    mut frames: FrameStream,
    outbound: mpsc::Sender<Frame>,
    events_tx: mpsc::Sender<EventFrame>,
    requests_tx: mpsc::Sender<RequestDispatch>,
    responses_tx: mpsc::Sender<crate::wire::ResponseFrame>,
    shutdown_tx: watch::Sender<bool>,
) {
    loop {
        match frames.next().await {
            Some(Ok(frame)) => match frame {
                Frame::Close(close) => {
                    info!(code = ?close.code, message = %close.message, "peer closed connection");
                    break;
                }
                Frame::Ping(ping) => {
                    if ping.ack {
                        // We never initiate pings, so acks are informational.
                        debug!(payload = %ping.payload, "ping acknowledged by peer");
                    } else {
                        let echo = Frame::Ping(Ping {
                            ack: true,
                            payload: ping.payload,
                        });
                        if outbound.send(echo).await.is_err() {
                            break;
                        }
                    }
                }
                Frame::Event(frame) => {
                    if events_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Frame::Request(frame) => {
                    if requests_tx.send(RequestDispatch::Request(frame)).await.is_err() {
                        break;
                    }
                }
                Frame::Cancel(frame) => {
                    if requests_tx.send(RequestDispatch::Cancel(frame)).await.is_err() {
                        break;
                    }
                }
                Frame::Response(frame) => {
                    if responses_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Frame::Handshake(_) => {
                    warn!("unhandled frame: handshake after establishment");
                }
            },
            Some(Err(ProtocolError::Disconnected)) => {
                info!("peer disconnected");
                break;
            }
            Some(Err(err)) => {
                warn!(error = %err, "frame stream terminated");
                break;
            }
            None => break,
        }
    }
    let _ = shutdown_tx.send(true);
}
