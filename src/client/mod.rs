//! Client module - connections, requests and client-side streams.
//!
//! Provides:
//! - [`Connection`] - lazily connected, multiplexed exchanges to one URL
//! - [`Request`] - builder and terminal operations for one exchange
//! - [`Linger`] - idle policy of the underlying transport
//!
//! # Example
//!
//! ```ignore
//! use wsrest::client::{Connection, Linger};
//!
//! let connection = Connection::builder("ws://localhost:8080/ws")
//!     .linger(Linger::from_millis(5_000))
//!     .build()?;
//!
//! let text = connection.get("/rest/echo?value=OK")?.text().await?;
//! ```

mod connection;
mod pending;
mod request;

pub use connection::{Connection, ConnectionBuilder, Linger, DEFAULT_LINGER};
pub use request::Request;
