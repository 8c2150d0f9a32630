//! Pluggable body serialization.
//!
//! The protocol never inspects frame bodies; a [`BodyCodec`] chosen at
//! connection construction translates between opaque byte payloads and
//! typed application values. The codec is object-safe by bridging
//! through [`serde_json::Value`], so any self-describing format can be
//! plugged in behind `Arc<dyn BodyCodec>` without generics leaking into
//! the connection type. JSON is the only bundled implementation.

mod json;

pub use json::JsonCodec;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Serializer/parser for opaque frame bodies. Selected per connection,
/// fixed at construction.
pub trait BodyCodec: Send + Sync {
    /// Short format name, e.g. `"json"`.
    fn name(&self) -> &'static str;

    /// Encode a structured value into body bytes.
    fn encode_value(&self, value: &serde_json::Value) -> Result<Bytes>;

    /// Decode body bytes into a structured value.
    fn decode_value(&self, bytes: &[u8]) -> Result<serde_json::Value>;
}

/// Serialize a typed value through the codec.
pub(crate) fn serialize<T: Serialize>(codec: &dyn BodyCodec, value: &T) -> Result<Bytes> {
    let value = serde_json::to_value(value)?;
    codec.encode_value(&value)
}

/// Parse body bytes into a typed value through the codec.
pub(crate) fn parse<T: DeserializeOwned>(codec: &dyn BodyCodec, bytes: &[u8]) -> Result<T> {
    let value = codec.decode_value(bytes)?;
    Ok(serde_json::from_value(value)?)
}
