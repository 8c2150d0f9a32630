//! Request dealer: routes requests to their single URI handler and
//! consumes cancellation frames for in-flight handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{RequestHandler, TaskTracker};
use crate::api::{Request, Response};
use crate::body::{self, BodyCodec};
use crate::error::{ProtocolError, Result};
use crate::wire::{CancelFrame, Frame, RequestFrame, ResponseFrame, ResponseKind, UserHeader};

type HandlerTable = Arc<RwLock<HashMap<String, RequestHandler>>>;
type InflightTable = Arc<Mutex<HashMap<Uuid, AbortHandle>>>;

/// What the read pump feeds the request dealer: new requests and
/// cancellations of in-flight ones.
pub(crate) enum RequestDispatch {
    Request(RequestFrame),
    Cancel(CancelFrame),
}

/// Routes inbound requests to at most one handler per URI. Each running
/// handler is kept in an in-flight table keyed by request uid so a
/// `Cancel` frame can abort it and answer the requester with a
/// `Cancelled` response.
pub(crate) struct RequestDealer {
    handlers: HandlerTable,
}

impl RequestDealer {
    /// Start the dispatch loop; returns the dealer and the sender the
    /// read pump feeds it through.
    pub(crate) fn start(
        codec: Arc<dyn BodyCodec>,
        out: mpsc::Sender<Frame>,
        tasks: Arc<TaskTracker>,
    ) -> (Self, mpsc::Sender<RequestDispatch>) {
        let (tx, mut rx) = mpsc::channel::<RequestDispatch>(32);
        let handlers: HandlerTable = Arc::new(RwLock::new(HashMap::new()));
        let inflight: InflightTable = Arc::new(Mutex::new(HashMap::new()));

        let table = Arc::clone(&handlers);
        tokio::spawn(async move {
            while let Some(dispatch) = rx.recv().await {
                match dispatch {
                    RequestDispatch::Request(frame) => {
                        dispatch_request(&codec, &out, &tasks, &table, &inflight, frame);
                    }
                    RequestDispatch::Cancel(frame) => {
                        dispatch_cancel(&codec, &out, &inflight, frame).await;
                    }
                }
            }
        });

        (Self { handlers }, tx)
    }

    /// Bind the single handler for a URI. A second registration for the
    /// same URI is rejected and does not replace the first.
    pub(crate) fn register(&self, uri: &str, handler: RequestHandler) -> Result<()> {
        let mut table = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if table.contains_key(uri) {
            return Err(ProtocolError::AlreadyRegistered(uri.to_string()));
        }
        table.insert(uri.to_string(), handler);
        Ok(())
    }
}

fn dispatch_request(
    codec: &Arc<dyn BodyCodec>,
    out: &mpsc::Sender<Frame>,
    tasks: &Arc<TaskTracker>,
    table: &HandlerTable,
    inflight: &InflightTable,
    frame: RequestFrame,
) {
    let handler = table
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&frame.header.uri)
        .cloned();

    let Some(handler) = handler else {
        // The requester will never get a terminal response; there is no
        // "method not found" frame in the protocol.
        debug!(uri = %frame.header.uri, "no request handler registered, dropping");
        return;
    };

    let uid = frame.header.uid;
    let request = Request::new(Arc::clone(codec), frame.clone());
    let responder = Response::outbound(Arc::clone(codec), frame.header, out.clone());

    let cleanup = Arc::clone(inflight);
    let fut = handler(request, responder);
    let handle = tasks.spawn(async move {
        fut.await;
        cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&uid);
    });

    let mut map = inflight.lock().unwrap_or_else(PoisonError::into_inner);
    map.insert(uid, handle.abort_handle());
    // The handler may already have finished on another worker before the
    // insert; in that case its own removal ran first, so undo ours.
    if handle.is_finished() {
        map.remove(&uid);
    }
}

async fn dispatch_cancel(
    codec: &Arc<dyn BodyCodec>,
    out: &mpsc::Sender<Frame>,
    inflight: &InflightTable,
    frame: CancelFrame,
) {
    let handle = inflight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&frame.request_uid);

    let Some(handle) = handle else {
        debug!(request_uid = %frame.request_uid, "cancel for unknown request, dropping");
        return;
    };

    handle.abort();
    debug!(request_uid = %frame.request_uid, "aborted in-flight request handler");

    // Terminate the requester's response lifecycle.
    match body::serialize(codec.as_ref(), &serde_json::Value::Null) {
        Ok(body) => {
            let response = ResponseFrame {
                header: UserHeader::new(&frame.header.uri),
                request_uid: frame.request_uid,
                kind: ResponseKind::Cancelled,
                body,
            };
            let _ = out.send(Frame::Response(response)).await;
        }
        Err(err) => warn!(error = %err, "could not encode cancelled response body"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::JsonCodec;
    use bytes::Bytes;
    use std::time::Duration;

    fn start_dealer() -> (RequestDealer, mpsc::Sender<RequestDispatch>, mpsc::Receiver<Frame>) {
        let (out_tx, out_rx) = mpsc::channel(16);
        let (dealer, tx) = RequestDealer::start(Arc::new(JsonCodec::new()), out_tx, TaskTracker::new());
        (dealer, tx, out_rx)
    }

    fn sum_request() -> RequestFrame {
        RequestFrame {
            header: UserHeader::new("sum"),
            progressive: false,
            body: Bytes::from_static(b"[1,2]"),
        }
    }

    #[tokio::test]
    async fn second_registration_for_same_uri_is_rejected() {
        let (dealer, _tx, _out) = start_dealer();
        dealer
            .register("sum", Arc::new(|_req, _res| Box::pin(async {})))
            .unwrap();
        let err = dealer
            .register("sum", Arc::new(|_req, _res| Box::pin(async {})))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::AlreadyRegistered(_)));
        // A different uri is still free.
        dealer
            .register("other", Arc::new(|_req, _res| Box::pin(async {})))
            .unwrap();
    }

    #[tokio::test]
    async fn handler_answers_through_the_outbound_channel() {
        let (dealer, tx, mut out) = start_dealer();
        dealer
            .register(
                "sum",
                Arc::new(|req, res| {
                    Box::pin(async move {
                        let operands: Vec<i64> = req.read_to().unwrap();
                        res.done(&operands.iter().sum::<i64>()).await.unwrap();
                    })
                }),
            )
            .unwrap();

        let request = sum_request();
        let request_uid = request.header.uid;
        tx.send(RequestDispatch::Request(request)).await.unwrap();

        let Some(Frame::Response(frame)) = out.recv().await else {
            panic!("expected a response frame");
        };
        assert_eq!(frame.request_uid, request_uid);
        assert_eq!(frame.kind, ResponseKind::Done);
        assert_eq!(&frame.body[..], b"3");
    }

    #[tokio::test]
    async fn unknown_uri_is_dropped() {
        let (_dealer, tx, mut out) = start_dealer();
        tx.send(RequestDispatch::Request(sum_request())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_aborts_the_handler_and_answers_cancelled() {
        let (dealer, tx, mut out) = start_dealer();
        dealer
            .register(
                "slow",
                Arc::new(|_req, _res| {
                    Box::pin(async {
                        std::future::pending::<()>().await;
                    })
                }),
            )
            .unwrap();

        let request = RequestFrame {
            header: UserHeader::new("slow"),
            progressive: false,
            body: Bytes::from_static(b"null"),
        };
        let request_uid = request.header.uid;
        tx.send(RequestDispatch::Request(request)).await.unwrap();
        tokio::task::yield_now().await;

        tx.send(RequestDispatch::Cancel(CancelFrame {
            header: UserHeader::new("slow"),
            request_uid,
        }))
        .await
        .unwrap();

        let Some(Frame::Response(frame)) = out.recv().await else {
            panic!("expected a cancelled response");
        };
        assert_eq!(frame.kind, ResponseKind::Cancelled);
        assert_eq!(frame.request_uid, request_uid);
    }

    #[tokio::test]
    async fn cancel_for_finished_request_is_dropped() {
        let (dealer, tx, mut out) = start_dealer();
        dealer
            .register(
                "fast",
                Arc::new(|_req, res| {
                    Box::pin(async move {
                        res.done(&1).await.unwrap();
                    })
                }),
            )
            .unwrap();

        let request = RequestFrame {
            header: UserHeader::new("fast"),
            progressive: false,
            body: Bytes::from_static(b"null"),
        };
        let request_uid = request.header.uid;
        tx.send(RequestDispatch::Request(request)).await.unwrap();
        assert!(matches!(out.recv().await, Some(Frame::Response(_))));
        // Let the finished handler clear its in-flight entry.
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The handler is gone; the cancel finds nothing to abort.
        tx.send(RequestDispatch::Cancel(CancelFrame {
            header: UserHeader::new("fast"),
            request_uid,
        }))
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(out.try_recv().is_err());
    }
}
