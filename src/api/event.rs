//! Pub/sub event view.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::body::{self, BodyCodec};
use crate::error::Result;
use crate::wire::EventFrame;

/// A received pub/sub event, handed to every handler subscribed to its URI.
pub struct Event {
    codec: Arc<dyn BodyCodec>,
    frame: EventFrame,
}

impl Event {
    pub(crate) fn new(codec: Arc<dyn BodyCodec>, frame: EventFrame) -> Self {
        Self { codec, frame }
    }

    /// Canonical string form of the event's unique identifier.
    pub fn id(&self) -> String {
        self.frame.header.uid.to_string()
    }

    /// Topic this event was published on.
    pub fn uri(&self) -> &str {
        &self.frame.header.uri
    }

    /// Parse the event body into a typed value.
    pub fn read_to<T: DeserializeOwned>(&self) -> Result<T> {
        body::parse(self.codec.as_ref(), &self.frame.body)
    }

    /// The raw, unparsed body bytes.
    pub fn raw_body(&self) -> &[u8] {
        &self.frame.body
    }
}
