//! # wsrest
//!
//! REST-style request/response exchanges and bidirectional streams,
//! multiplexed over a single WebSocket connection.
//!
//! ## Architecture
//!
//! - **Client** ([`client`]): a lazily opened, multiplexed [`Connection`]
//!   correlating responses to requests by exchange id, with an idle linger
//!   timer that closes the transport when nothing is pending
//! - **Server** ([`server`]): one [`Session`](server::Session) per accepted
//!   transport, a single-flight outbound queue and a bounded worker pool
//!   dispatching requests to a [`Router`]
//! - **Wire format** ([`protocol`]): one text frame per message, a
//!   space-separated header line and an optional body after the first `\n`
//!
//! ## Example
//!
//! ```ignore
//! use wsrest::server::{serve, Exchange, HandlerResult, Router, ServerContext};
//! use wsrest::Connection;
//!
//! async fn echo(exchange: Exchange) -> HandlerResult {
//!     Ok(exchange.query_param("value").map(|v| format!("GET {}", v)))
//! }
//!
//! #[tokio::main]
//! async fn main() -> wsrest::Result<()> {
//!     let context = ServerContext::builder()
//!         .dispatcher(Router::new().get("/rest/echo", echo))
//!         .build()?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     tokio::spawn(serve(listener, context));
//!
//!     let connection = Connection::new("ws://127.0.0.1:8080/ws")?;
//!     let text = connection.get("/rest/echo?value=OK")?.text().await?;
//!     assert_eq!(text, "GET OK");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod completion;
pub mod error;
pub mod protocol;
pub mod server;
pub mod stream;
pub mod transport;
pub mod writer;

pub use client::{Connection, Linger, Request};
pub use error::{Result, WsRestError};
pub use protocol::{RequestMethod, ResponseType};
pub use server::{Exchange, Router, ServerContext};
pub use stream::{Stream, StreamHandler};
