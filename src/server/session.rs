//! Server-side session: one per accepted transport.
//!
//! A session owns the outbound transport (a single-flight queue) and the
//! registry of streams opened on it. Inbound frames are handed to the
//! [`ServerContext`] for dispatch.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::ServerContext;
use crate::error::{Result, WsRestError};
use crate::protocol::{encode_response, ResponseType};
use crate::stream::{Stream, StreamOwner};
use crate::transport::{Transport, TransportEvents};

/// Per-session application state, created by the context's state factory.
pub type SessionState = Arc<dyn Any + Send + Sync>;

/// Locally closed stream ids remembered per session, oldest evicted first.
const RELEASED_HISTORY: usize = 256;

struct Tables {
    streams: HashMap<u64, Stream>,
    /// Streams registered by a handler whose OPEN has not been queued yet,
    /// with the frames they sent in the meantime.
    unopened: HashMap<u64, Vec<String>>,
    /// Streams closed locally whose CLOSE may still be crossing with the peer's.
    released: HashSet<u64>,
    released_order: VecDeque<u64>,
    closed: bool,
}

/// One accepted connection.
pub struct Session {
    context: Arc<ServerContext>,
    transport: Box<dyn Transport>,
    state: Option<SessionState>,
    tables: Mutex<Tables>,
    self_ref: Weak<Session>,
}

impl Session {
    pub(crate) fn new(context: Arc<ServerContext>, transport: Box<dyn Transport>) -> Arc<Self> {
        let state = context.create_session_state();
        Arc::new_cyclic(|weak| Session {
            context,
            transport,
            state,
            tables: Mutex::new(Tables {
                streams: HashMap::new(),
                unopened: HashMap::new(),
                released: HashSet::new(),
                released_order: VecDeque::new(),
                closed: false,
            }),
            self_ref: weak.clone(),
        })
    }

    /// Queue a frame for the client.
    pub fn send_text(&self, text: String) -> Result<()> {
        self.transport.send_text(text)
    }

    /// Application state of this session, if a factory was configured.
    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    /// Number of registered streams.
    pub fn stream_count(&self) -> usize {
        self.tables.lock().streams.len()
    }

    /// True once the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.tables.lock().closed
    }

    /// Close the session and its transport. Open streams are closed without
    /// sending CLOSE frames.
    pub fn close(&self) {
        self.shutdown(None);
    }

    /// Register a stream for a STREAM request. OPEN is sent by
    /// [`confirm_open`](Session::confirm_open) once the handler returns.
    pub(crate) fn open_stream(&self, id: u64) -> Result<Stream> {
        let mut tables = self.tables.lock();
        if tables.closed {
            return Err(WsRestError::ConnectionClosed);
        }
        if tables.streams.contains_key(&id) || tables.unopened.contains_key(&id) {
            return Err(WsRestError::Protocol(format!("Stream {} is already open", id)));
        }

        let owner: Weak<dyn StreamOwner> = self.self_ref.clone();
        let stream = Stream::new(id, owner);
        tables.streams.insert(id, stream.clone());
        tables.unopened.insert(id, Vec::new());
        Ok(stream)
    }

    /// Queue OPEN for stream `id`, followed by anything its handler sent early.
    pub(crate) fn confirm_open(&self, id: u64) -> Result<()> {
        let mut tables = self.tables.lock();
        let held = tables.unopened.remove(&id).ok_or_else(|| {
            WsRestError::Handler(format!("Handler did not open a stream for request {}", id))
        })?;

        self.transport
            .send_text(encode_response(ResponseType::Open, id, None))?;
        for frame in held {
            self.transport.send_text(frame)?;
        }
        Ok(())
    }

    /// Drop a stream whose handler failed before OPEN was sent.
    ///
    /// A stream that already sent OPEN is left alone: the failed request
    /// only reused its id.
    pub(crate) fn abort_stream(&self, id: u64, error: &WsRestError) {
        let stream = {
            let mut tables = self.tables.lock();
            if tables.unopened.remove(&id).is_none() {
                return;
            }
            tables.streams.remove(&id)
        };
        if let Some(stream) = stream {
            stream.fail(error.clone());
        }
    }

    /// Look up a stream for an inbound MESSAGE (or remove it for CLOSE).
    ///
    /// `Ok(None)` means the frame refers to a stream this side already closed
    /// and can be ignored.
    pub(crate) fn inbound_stream(&self, id: u64, closing: bool) -> Result<Option<Stream>> {
        let mut tables = self.tables.lock();
        let stream = if closing {
            tables.streams.remove(&id)
        } else {
            tables.streams.get(&id).cloned()
        };

        match stream {
            Some(stream) => Ok(Some(stream)),
            None if tables.released.contains(&id) => {
                if closing {
                    tables.released.remove(&id);
                    tables.released_order.retain(|released| *released != id);
                }
                Ok(None)
            }
            None => Err(WsRestError::Protocol(format!("No open stream with id {}", id))),
        }
    }

    fn shutdown(&self, error: Option<WsRestError>) {
        let streams = {
            let mut tables = self.tables.lock();
            if tables.closed {
                return;
            }
            tables.closed = true;
            tables.unopened.clear();
            tables.released.clear();
            tables.released_order.clear();
            std::mem::take(&mut tables.streams)
        };

        self.transport.close();

        let mut streams: Vec<_> = streams.into_iter().collect();
        streams.sort_by_key(|(id, _)| *id);
        for (_, stream) in streams {
            match &error {
                Some(error) => stream.fail(error.clone()),
                None => stream.close_local(),
            }
        }
    }
}

impl Session {
    /// Send a stream frame, holding it back while OPEN is still pending.
    fn send_stream_frame(&self, id: u64, frame: String) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.closed {
            return Err(WsRestError::ConnectionClosed);
        }
        match tables.unopened.get_mut(&id) {
            Some(held) => {
                held.push(frame);
                Ok(())
            }
            None => self.transport.send_text(frame),
        }
    }
}

impl StreamOwner for Session {
    fn send_message(&self, id: u64, text: String) -> Result<()> {
        self.send_stream_frame(id, encode_response(ResponseType::Message, id, Some(&text)))
    }

    fn send_close(&self, id: u64) -> Result<()> {
        self.send_stream_frame(id, encode_response(ResponseType::Close, id, None))
    }

    fn release(&self, id: u64) {
        let mut tables = self.tables.lock();
        if tables.streams.remove(&id).is_some() && tables.released.insert(id) {
            tables.released_order.push_back(id);
            if tables.released_order.len() > RELEASED_HISTORY {
                if let Some(oldest) = tables.released_order.pop_front() {
                    tables.released.remove(&oldest);
                }
            }
        }
    }
}

impl TransportEvents for Session {
    fn on_text(&self, text: String) {
        if let Some(session) = self.self_ref.upgrade() {
            self.context.execute(&session, text);
        }
    }

    fn on_closed(&self) {
        tracing::debug!("Session transport closed");
        self.shutdown(None);
    }

    fn on_error(&self, error: WsRestError) {
        tracing::warn!("Session transport error: {}", error);
        self.shutdown(Some(error));
    }
}
