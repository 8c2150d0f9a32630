//! Event dealer: fans events out to every subscriber of their URI.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

use super::{EventHandler, TaskTracker};
use crate::api::Event;
use crate::body::BodyCodec;
use crate::wire::EventFrame;

type HandlerTable = Arc<RwLock<HashMap<String, Vec<EventHandler>>>>;

/// Routes inbound event frames to registered subscribers. Multiple
/// subscribers per URI are allowed; each receives every event,
/// insertion order preserved in the table, invocations concurrent.
pub(crate) struct EventDealer {
    handlers: HandlerTable,
}

impl EventDealer {
    /// Start the dispatch loop; returns the dealer and the sender the
    /// read pump feeds it through.
    pub(crate) fn start(
        codec: Arc<dyn BodyCodec>,
        tasks: Arc<TaskTracker>,
    ) -> (Self, mpsc::Sender<EventFrame>) {
        let (tx, mut rx) = mpsc::channel::<EventFrame>(32);
        let handlers: HandlerTable = Arc::new(RwLock::new(HashMap::new()));

        let table = Arc::clone(&handlers);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let subscribers: Vec<EventHandler> = table
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&frame.header.uri)
                    .cloned()
                    .unwrap_or_default();

                if subscribers.is_empty() {
                    // Not an error: events are fire-and-forget.
                    debug!(uri = %frame.header.uri, "no event handlers registered, dropping");
                    continue;
                }

                for handler in subscribers {
                    let view = Event::new(Arc::clone(&codec), frame.clone());
                    tasks.spawn(handler(view));
                }
            }
        });

        (Self { handlers }, tx)
    }

    /// Add a subscriber for a URI, after any existing ones.
    pub(crate) fn subscribe(&self, uri: &str, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(uri.to_string())
            .or_default()
            .push(handler);
    }
}
