//! Response dealer: correlates inbound responses to their request's
//! registered handler.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ResponseHandler, TaskTracker};
use crate::api::Response;
use crate::body::BodyCodec;
use crate::wire::ResponseFrame;

/// A registration owns an ordered delivery queue: progress and terminal
/// callbacks for one request run sequentially, in arrival order, on a
/// dedicated task, while the dispatch loop itself never blocks on a
/// handler.
type Registration = mpsc::UnboundedSender<Response>;
type HandlerTable = Arc<RwLock<HashMap<Uuid, Registration>>>;

/// Routes inbound response frames to the one-shot handler registered
/// under their request uid. Progress frames keep the registration; the
/// first terminal Done/Error/Cancelled removes it under the write lock
/// before invocation, so a duplicate or late terminal frame finds no
/// handler and is dropped — the terminal callback fires at most once.
pub(crate) struct ResponseDealer {
    handlers: HandlerTable,
    tasks: Arc<TaskTracker>,
}

impl ResponseDealer {
    /// Start the dispatch loop; returns the dealer and the sender the
    /// read pump feeds it through.
    pub(crate) fn start(
        codec: Arc<dyn BodyCodec>,
        tasks: Arc<TaskTracker>,
    ) -> (Self, mpsc::Sender<ResponseFrame>) {
        let (tx, mut rx) = mpsc::channel::<ResponseFrame>(32);
        let handlers: HandlerTable = Arc::new(RwLock::new(HashMap::new()));

        let table = Arc::clone(&handlers);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let uid = frame.request_uid;
                let registration = if frame.kind.is_terminal() {
                    table
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&uid)
                } else {
                    table
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get(&uid)
                        .cloned()
                };

                match registration {
                    Some(queue) => {
                        let view = Response::inbound(Arc::clone(&codec), frame);
                        let _ = queue.send(view);
                    }
                    None => {
                        debug!(request_uid = %uid, "no response handler registered, dropping");
                    }
                }
            }

            // Read pump gone: the connection terminated before these
            // requests got their terminal response. Discard them so
            // nothing leaks; they are never invoked.
            let leaked = {
                let mut table = table.write().unwrap_or_else(PoisonError::into_inner);
                let count = table.len();
                table.clear();
                count
            };
            if leaked > 0 {
                warn!(count = leaked, "discarding response handlers pending at connection shutdown");
            }
        });

        (Self { handlers, tasks }, tx)
    }

    /// Register the handler for a request uid. Called before the
    /// request frame is written, so a fast reply cannot race the
    /// registration.
    pub(crate) fn register(&self, uid: Uuid, handler: ResponseHandler) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Response>();

        let tasks = Arc::clone(&self.tasks);
        tokio::spawn(async move {
            while let Some(view) = rx.recv().await {
                let _active = tasks.guard();
                handler(view).await;
            }
        });

        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid, tx);
    }

    /// Drop a registration that never made it onto the wire.
    pub(crate) fn unregister(&self, uid: Uuid) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&uid);
    }
}
