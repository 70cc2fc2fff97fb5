//! Full-duplex streams multiplexed on an exchange id.
//!
//! A [`Stream`] is created when a STREAM exchange is opened and lives until
//! either side closes it or the connection goes away. Client and server use
//! the same type; the side-specific framing lives behind [`StreamOwner`].
//!
//! Inbound traffic goes through a per-stream mailbox:
//! - events are delivered in arrival order, one at a time
//! - events arriving while no handler is attached are buffered and flushed
//!   as soon as one is set
//! - handlers are always invoked without any lock held, so a handler may
//!   send, close or replace itself
//!
//! # Example
//!
//! ```ignore
//! let stream = connection.request("/rest/echo-stream", RequestMethod::Stream)?
//!     .stream()
//!     .await?;
//!
//! stream.set_handler(|stream: &Stream, message: String| {
//!     println!("stream {} got {}", stream.id(), message);
//! });
//! stream.send_text("hello")?;
//! stream.close();
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Result, WsRestError};

/// Application callbacks for a stream.
///
/// Any `Fn(&Stream, String)` closure is a handler that only cares about
/// messages.
pub trait StreamHandler: Send + Sync + 'static {
    /// A text message arrived on the stream.
    fn on_message(&self, stream: &Stream, message: String);

    /// The stream is being torn down because of a connection fault.
    ///
    /// Always followed by [`on_closed`](StreamHandler::on_closed).
    fn on_error(&self, _stream: &Stream, _error: &WsRestError) {}

    /// The stream was closed. Invoked exactly once.
    fn on_closed(&self, _stream: &Stream) {}
}

impl<F> StreamHandler for F
where
    F: Fn(&Stream, String) + Send + Sync + 'static,
{
    fn on_message(&self, stream: &Stream, message: String) {
        self(stream, message)
    }
}

/// Side-specific outbound half of a stream.
///
/// Implemented by the client connection and the server session.
pub(crate) trait StreamOwner: Send + Sync {
    /// Send a MESSAGE frame for stream `id`.
    fn send_message(&self, id: u64, text: String) -> Result<()>;

    /// Send a CLOSE frame for stream `id`.
    fn send_close(&self, id: u64) -> Result<()>;

    /// Remove stream `id` from the owner's table.
    fn release(&self, id: u64);
}

#[derive(Debug)]
pub(crate) enum StreamEvent {
    Message(String),
    Error(WsRestError),
    Closed,
}

struct State {
    closed: bool,
    handler: Option<Arc<dyn StreamHandler>>,
    events: VecDeque<StreamEvent>,
    delivering: bool,
}

struct Inner {
    id: u64,
    owner: Weak<dyn StreamOwner>,
    state: Mutex<State>,
}

/// Handle to one stream. Cheap to clone.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<Inner>,
}

impl Stream {
    pub(crate) fn new(id: u64, owner: Weak<dyn StreamOwner>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                owner,
                state: Mutex::new(State {
                    closed: false,
                    handler: None,
                    events: VecDeque::new(),
                    delivering: false,
                }),
            }),
        }
    }

    /// Exchange id shared by both directions of the stream.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// True once the stream was closed from either side.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Attach a handler, replacing the current one.
    ///
    /// Messages buffered while no handler was attached are delivered to the
    /// new handler right away, in arrival order.
    pub fn set_handler<H: StreamHandler>(&self, handler: H) {
        self.replace_handler(Some(Arc::new(handler)));
    }

    /// Detach the current handler. Later messages are buffered.
    pub fn clear_handler(&self) {
        self.replace_handler(None);
    }

    fn replace_handler(&self, handler: Option<Arc<dyn StreamHandler>>) {
        let start = {
            let mut state = self.inner.state.lock();
            state.handler = handler;
            Self::claim_delivery(&mut state)
        };
        if start {
            self.drain();
        }
    }

    /// Send a text message to the peer.
    ///
    /// Fails with `StreamClosed` without any I/O once the stream is closed.
    pub fn send_text(&self, message: impl Into<String>) -> Result<()> {
        if self.is_closed() {
            return Err(WsRestError::StreamClosed);
        }
        let owner = self.owner()?;
        owner.send_message(self.inner.id, message.into())
    }

    /// Serialize `value` as JSON and send it.
    pub fn send_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.send_text(text)
    }

    /// Close the stream.
    ///
    /// The first call sends CLOSE to the peer, removes the stream from its
    /// connection and notifies the handler. Later calls do nothing.
    pub fn close(&self) {
        if !self.mark_closed() {
            return;
        }

        if let Some(owner) = self.inner.owner.upgrade() {
            if let Err(e) = owner.send_close(self.inner.id) {
                tracing::debug!("Could not send CLOSE for stream {}: {}", self.inner.id, e);
            }
            owner.release(self.inner.id);
        }

        self.push_closed(None);
    }

    /// Close in reaction to a CLOSE from the peer: no frame is sent.
    ///
    /// The caller has already removed the stream from its table.
    pub(crate) fn close_local(&self) {
        if self.mark_closed() {
            self.push_closed(None);
        }
    }

    /// Close because the connection failed. The handler sees `on_error`
    /// and then `on_closed`.
    pub(crate) fn fail(&self, error: WsRestError) {
        if self.mark_closed() {
            self.push_closed(Some(error));
        }
    }

    /// Queue an inbound message.
    ///
    /// Returns true when the caller must run [`drain`](Stream::drain), which
    /// lets the server hand delivery to its worker pool.
    pub(crate) fn enqueue_message(&self, message: String) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            tracing::debug!("Dropping message for closed stream {}", self.inner.id);
            return false;
        }
        state.events.push_back(StreamEvent::Message(message));
        Self::claim_delivery(&mut state)
    }

    /// Queue a close requested by the peer, see [`enqueue_message`](Stream::enqueue_message).
    pub(crate) fn enqueue_close(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.events.push_back(StreamEvent::Closed);
        Self::claim_delivery(&mut state)
    }

    /// Deliver a message inline.
    pub(crate) fn deliver(&self, message: String) {
        if self.enqueue_message(message) {
            self.drain();
        }
    }

    /// Deliver queued events until the mailbox is empty or no handler is set.
    pub(crate) fn drain(&self) {
        loop {
            let (handler, event) = {
                let mut state = self.inner.state.lock();
                let handler = match state.handler.clone() {
                    Some(handler) => handler,
                    None => {
                        state.delivering = false;
                        return;
                    }
                };
                match state.events.pop_front() {
                    Some(event) => (handler, event),
                    None => {
                        state.delivering = false;
                        return;
                    }
                }
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match event {
                StreamEvent::Message(message) => handler.on_message(self, message),
                StreamEvent::Error(error) => handler.on_error(self, &error),
                StreamEvent::Closed => handler.on_closed(self),
            }));
            if outcome.is_err() {
                tracing::error!("Handler for stream {} panicked", self.inner.id);
            }
        }
    }

    fn owner(&self) -> Result<Arc<dyn StreamOwner>> {
        self.inner
            .owner
            .upgrade()
            .ok_or(WsRestError::ConnectionClosed)
    }

    /// Flip the closed flag. Returns false if it was already set.
    fn mark_closed(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        true
    }

    fn push_closed(&self, error: Option<WsRestError>) {
        let start = {
            let mut state = self.inner.state.lock();
            if let Some(error) = error {
                state.events.push_back(StreamEvent::Error(error));
            }
            state.events.push_back(StreamEvent::Closed);
            Self::claim_delivery(&mut state)
        };
        if start {
            self.drain();
        }
    }

    /// Take the delivery role if events are waiting, a handler is set and
    /// nobody else is delivering.
    fn claim_delivery(state: &mut State) -> bool {
        if state.delivering || state.handler.is_none() || state.events.is_empty() {
            return false;
        }
        state.delivering = true;
        true
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("closed", &state.closed)
            .field("buffered", &state.events.len())
            .finish()
    }
}
