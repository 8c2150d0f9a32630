//! Symmetric binary messaging over a duplex byte stream.
//!
//! Both peers speak the same framed protocol once a version handshake
//! completes; there is no client/server asymmetry beyond who initiates
//! the handshake. Three messaging patterns share one connection:
//!
//! - **Events** — fire-and-forget pub/sub by URI, fanned out to every
//!   subscribed handler on the receiving side.
//! - **Requests** — correlated by a uid, answered by the single handler
//!   bound to their URI with exactly one terminal response (`Done`,
//!   `Error` or `Cancelled`), optionally preceded by any number of
//!   `Progress` responses.
//! - **Cancellation** — a requester may abandon an in-flight request;
//!   the remote handler task is aborted and the requester receives a
//!   `Cancelled` terminal response.
//!
//! Frame bodies are opaque to the protocol; a [`BodyCodec`] chosen at
//! connection construction (JSON via [`JsonCodec`] is bundled) maps
//! them to typed values through [`Event::read_to`],
//! [`Request::read_to`] and [`Response::read_to`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use peerwire::{Connection, JsonCodec, Role};
//!
//! # async fn run() -> peerwire::Result<()> {
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:7450").await?;
//! let conn = Connection::establish(stream, Role::Initiator, Arc::new(JsonCodec::new())).await?;
//!
//! conn.send_request("sum", &vec![1, 2], false, |response| async move {
//!     let total: i64 = response.read_to().unwrap();
//!     println!("sum = {total}");
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod body;
mod connection;
mod dealer;
mod error;
mod parser;
pub mod wire;

pub use api::{Event, Request, Response};
pub use body::{BodyCodec, JsonCodec};
pub use connection::{Connection, Role};
pub use error::{ProtocolError, Result};
pub use wire::{CloseCode, ResponseKind};

/// Protocol version carried in the handshake. Peers must agree exactly.
pub const PROTOCOL_VERSION: u16 = 1;
