//! Request view handed to request handlers.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::body::{self, BodyCodec};
use crate::error::Result;
use crate::wire::RequestFrame;

/// A received request. Read-only; replies go through the paired
/// [`Response`](crate::Response) value.
pub struct Request {
    codec: Arc<dyn BodyCodec>,
    frame: RequestFrame,
}

impl Request {
    pub(crate) fn new(codec: Arc<dyn BodyCodec>, frame: RequestFrame) -> Self {
        Self { codec, frame }
    }

    /// Canonical string form of the request's unique identifier.
    pub fn id(&self) -> String {
        self.frame.header.uid.to_string()
    }

    /// Endpoint this request was addressed to.
    pub fn uri(&self) -> &str {
        &self.frame.header.uri
    }

    /// Whether the requester accepts progress responses before the
    /// terminal one.
    pub fn is_progressive(&self) -> bool {
        self.frame.progressive
    }

    /// Parse the request body into a typed value.
    pub fn read_to<T: DeserializeOwned>(&self) -> Result<T> {
        body::parse(self.codec.as_ref(), &self.frame.body)
    }

    /// The raw, unparsed body bytes.
    pub fn raw_body(&self) -> &[u8] {
        &self.frame.body
    }
}
