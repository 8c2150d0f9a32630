//! User-facing views over decoded frames.
//!
//! Thin wrappers pairing a frame with the connection's body codec, so
//! handlers get typed read access via an explicit `read_to` call and,
//! for responses, the outbound send operations.

mod event;
mod request;
mod response;

pub use event::Event;
pub use request::Request;
pub use response::Response;
