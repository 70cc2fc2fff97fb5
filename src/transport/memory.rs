//! In-process transport.
//!
//! Pairs a client [`Connection`](crate::client::Connection) with a
//! [`ServerContext`] without sockets. Each direction is a [`SendQueue`]
//! whose writer task hands frames straight to the receiving side's
//! [`TransportEvents`], so ordering and single-flight sending behave as
//! they do over a WebSocket.

use std::sync::Arc;

use super::{Transport, TransportEvents, TransportFactory};
use crate::error::Result;
use crate::server::ServerContext;
use crate::writer::{spawn_writer_task_on, FrameSink};

/// Opens in-memory transports attached to sessions of one server context.
pub struct MemoryTransportFactory {
    context: Arc<ServerContext>,
}

impl MemoryTransportFactory {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn open(&self, url: &str, events: Arc<dyn TransportEvents>) -> Result<Box<dyn Transport>> {
        tracing::debug!("Opening in-memory session for {}", url);
        let runtime = self.context.runtime();
        let config = self.context.writer_config();

        let (to_client, _) = spawn_writer_task_on(runtime, EventSink { events }, config);
        let session = self.context.new_session(Box::new(to_client));

        let (to_server, _) = spawn_writer_task_on(runtime, EventSink { events: session }, config);
        Ok(Box::new(to_server))
    }
}

/// Delivers frames to the other side's event callbacks.
struct EventSink {
    events: Arc<dyn TransportEvents>,
}

impl FrameSink for EventSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.events.on_text(text);
        Ok(())
    }

    async fn close(&mut self) {
        self.events.on_closed();
    }
}
