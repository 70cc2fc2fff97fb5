//! Transport module - whole-text-frame transports.
//!
//! The engine only needs a handful of operations from a transport:
//! - [`TransportFactory::open`] to start a connection to a URL
//! - [`Transport::send_text`] and [`Transport::close`]
//! - the [`TransportEvents`] callbacks for inbound text, close and errors
//!
//! Provided implementations:
//! - [`websocket`] - WebSocket over TCP (tokio-tungstenite)
//! - [`memory`] - in-process pairing of a client with a [`ServerContext`](crate::server::ServerContext)

use std::sync::Arc;

use crate::error::{Result, WsRestError};
use crate::writer::SendQueue;

pub mod memory;
pub mod websocket;

pub use memory::MemoryTransportFactory;
pub use websocket::WebSocketFactory;

/// An open transport.
///
/// Implementations queue work and return immediately. Neither method may
/// block or call back into the [`TransportEvents`] of the same transport
/// synchronously, because callers hold their connection lock.
pub trait Transport: Send + Sync {
    /// Queue one whole text frame.
    fn send_text(&self, text: String) -> Result<()>;

    /// Start closing. Completion is reported through
    /// [`TransportEvents::on_closed`].
    fn close(&self);
}

/// Callbacks from a transport to its owner.
///
/// Called from the transport's own task, one at a time.
pub trait TransportEvents: Send + Sync {
    /// A whole text frame arrived.
    fn on_text(&self, text: String);

    /// The transport closed.
    fn on_closed(&self);

    /// The transport failed or could not be established.
    fn on_error(&self, error: WsRestError);
}

/// Opens transports for a client connection.
pub trait TransportFactory: Send + Sync {
    /// Start opening a transport to `url`.
    ///
    /// Must return without waiting for the connection to be established;
    /// frames sent in the meantime are queued. Failures after this returns
    /// are reported through `events`.
    fn open(&self, url: &str, events: Arc<dyn TransportEvents>) -> Result<Box<dyn Transport>>;
}

impl Transport for SendQueue {
    fn send_text(&self, text: String) -> Result<()> {
        SendQueue::send_text(self, text)
    }

    fn close(&self) {
        SendQueue::close(self)
    }
}
