//! Client connection engine.
//!
//! A [`Connection`] multiplexes request/response exchanges and streams over
//! one transport. The transport is opened lazily by the first request and
//! closed again after the connection has been idle for the linger time.
//!
//! All mutable state lives behind one lock. Application callbacks are never
//! invoked while it is held: every inbound frame is applied to the table
//! first and the resulting deliveries run afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::pending::{Delivery, PendingExchange, Step};
use super::request::Request;
use crate::error::{Result, WsRestError};
use crate::protocol::{encode_request, RequestMethod, ResponseFrame, ResponseType, STREAM_PATH};
use crate::stream::StreamOwner;
use crate::transport::{Transport, TransportEvents, TransportFactory, WebSocketFactory};
use crate::writer::WriterConfig;

/// Default idle time before the transport is closed.
pub const DEFAULT_LINGER: Duration = Duration::from_secs(60);

/// What to do with the transport once no exchange is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linger {
    /// Keep the transport open until the connection is closed.
    Never,
    /// Close the transport as soon as the last exchange completes.
    Immediate,
    /// Close the transport after being idle for this long.
    After(Duration),
}

impl Linger {
    /// Interpret a signed millisecond value: negative never closes, zero
    /// closes immediately, positive is an idle timeout.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            n if n < 0 => Linger::Never,
            0 => Linger::Immediate,
            n => Linger::After(Duration::from_millis(n as u64)),
        }
    }
}

impl Default for Linger {
    fn default() -> Self {
        Linger::After(DEFAULT_LINGER)
    }
}

/// Builder for a [`Connection`].
pub struct ConnectionBuilder {
    url: String,
    linger: Linger,
    factory: Option<Arc<dyn TransportFactory>>,
    runtime: Option<Handle>,
    writer_config: WriterConfig,
}

impl ConnectionBuilder {
    /// Create a builder for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            linger: Linger::default(),
            factory: None,
            runtime: None,
            writer_config: WriterConfig::default(),
        }
    }

    /// Set the idle behaviour.
    ///
    /// Default: close after 60 seconds without pending exchanges.
    pub fn linger(mut self, linger: Linger) -> Self {
        self.linger = linger;
        self
    }

    /// Use a custom transport factory instead of WebSocket.
    pub fn factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Run timers and transport tasks on this runtime.
    ///
    /// Required when building outside of a tokio runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the writer configuration of the default WebSocket transport.
    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    /// Build the connection. No transport is opened yet.
    pub fn build(self) -> Result<Connection> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                WsRestError::InvalidRequest(
                    "No tokio runtime available, set one with ConnectionBuilder::runtime".into(),
                )
            })?,
        };
        let factory = match self.factory {
            Some(factory) => factory,
            None => Arc::new(WebSocketFactory::new(runtime.clone(), self.writer_config)),
        };

        let inner = Arc::new_cyclic(|weak| Inner {
            url: self.url,
            linger: self.linger,
            factory,
            runtime,
            self_ref: weak.clone(),
            state: Mutex::new(State {
                transport: None,
                generation: 0,
                next_id: 1,
                pending: HashMap::new(),
                linger_timer: None,
                linger_epoch: 0,
                closed: false,
            }),
        });

        Ok(Connection { inner })
    }
}

/// A client connection. Cheap to clone; clones share the same transport.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a connection to `url` with default settings.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        ConnectionBuilder::new(url).build()
    }

    /// Create a builder.
    pub fn builder(url: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder::new(url)
    }

    /// Start a new exchange. Fails once the connection has been closed.
    pub fn request(&self, path: impl Into<String>, method: RequestMethod) -> Result<Request> {
        if self.is_closed() {
            return Err(WsRestError::ConnectionClosed);
        }
        if method.is_stream_control() {
            return Err(WsRestError::InvalidRequest(format!(
                "{} is only sent through a Stream",
                method
            )));
        }
        let path = path.into();
        if path.contains([' ', '\n']) {
            return Err(WsRestError::InvalidRequest(format!(
                "Path {:?} contains a space or newline",
                path
            )));
        }
        Ok(Request::new(self.clone(), method, path))
    }

    /// Shortcut for a GET request.
    pub fn get(&self, path: impl Into<String>) -> Result<Request> {
        self.request(path, RequestMethod::Get)
    }

    /// Shortcut for a POST request.
    pub fn post(&self, path: impl Into<String>) -> Result<Request> {
        self.request(path, RequestMethod::Post)
    }

    /// Shortcut for a STREAM request.
    pub fn stream(&self, path: impl Into<String>) -> Result<Request> {
        self.request(path, RequestMethod::Stream)
    }

    /// Close the connection.
    ///
    /// Every pending exchange fails with `ConnectionClosed` and new requests
    /// are rejected. Safe to call more than once and from several threads.
    pub fn close(&self) {
        let (transport, pending) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            self.inner.disarm_linger(&mut state);
            (state.transport.take(), std::mem::take(&mut state.pending))
        };

        tracing::debug!("Closing connection to {}", self.inner.url);
        if let Some(transport) = transport {
            transport.close();
        }
        fail_all(pending, WsRestError::ConnectionClosed);
    }

    /// True after [`close`](Connection::close).
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// True while a transport is open (or opening).
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().transport.is_some()
    }

    /// Number of exchanges and streams waiting in the table.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Issue a request. The exchange, if any, is completed exactly once:
    /// by its response, by teardown, or right here when sending fails.
    pub(crate) fn execute(
        &self,
        method: RequestMethod,
        path: &str,
        body: Option<String>,
        exchange: Option<PendingExchange>,
    ) -> Result<u64> {
        self.inner.execute(method, path, body, exchange)
    }
}

struct LingerTimer {
    task: AbortHandle,
}

struct State {
    transport: Option<Arc<dyn Transport>>,
    /// Bumped for every transport so events from an old one are ignored.
    generation: u64,
    next_id: u64,
    pending: HashMap<u64, PendingExchange>,
    linger_timer: Option<LingerTimer>,
    linger_epoch: u64,
    closed: bool,
}

struct Inner {
    url: String,
    linger: Linger,
    factory: Arc<dyn TransportFactory>,
    runtime: Handle,
    self_ref: Weak<Inner>,
    state: Mutex<State>,
}

impl Inner {
    fn execute(
        &self,
        method: RequestMethod,
        path: &str,
        body: Option<String>,
        exchange: Option<PendingExchange>,
    ) -> Result<u64> {
        let mut state = self.state.lock();

        let result = if state.closed {
            Err(WsRestError::ConnectionClosed)
        } else {
            self.transport(&mut state)
        };
        let transport = match result {
            Ok(transport) => transport,
            Err(e) => {
                drop(state);
                if let Some(exchange) = exchange {
                    exchange.fail(e.clone());
                }
                return Err(e);
            }
        };

        let id = state.next_id;
        state.next_id += 1;

        let text = encode_request(method, path, id, body.as_deref());
        let tracked = exchange.is_some();
        if let Some(exchange) = exchange {
            state.pending.insert(id, exchange);
        }

        tracing::debug!("-> {} {} {}", method, path, id);

        // Sent under the lock so frames leave in id order.
        let sent = transport.send_text(text);
        let failed = match &sent {
            Err(_) if tracked => state.pending.remove(&id),
            _ => None,
        };
        self.update_linger(&mut state);
        drop(state);

        match sent {
            Ok(()) => Ok(id),
            Err(e) => {
                if let Some(exchange) = failed {
                    exchange.fail(e.clone());
                }
                Err(e)
            }
        }
    }

    /// Send a frame for an existing stream, reusing its id.
    fn send_stream_frame(&self, method: RequestMethod, id: u64, body: Option<&str>) -> Result<()> {
        let state = self.state.lock();
        let transport = state
            .transport
            .as_ref()
            .ok_or(WsRestError::ConnectionClosed)?;
        tracing::debug!("-> {} {} {}", method, STREAM_PATH, id);
        transport.send_text(encode_request(method, STREAM_PATH, id, body))
    }

    /// Current transport, opening one if needed.
    fn transport(&self, state: &mut State) -> Result<Arc<dyn Transport>> {
        if let Some(transport) = &state.transport {
            return Ok(transport.clone());
        }

        state.generation += 1;
        state.next_id = 1;

        let events = Arc::new(ConnectionEvents {
            connection: self.self_ref.clone(),
            generation: state.generation,
        });
        let transport: Arc<dyn Transport> = Arc::from(self.factory.open(&self.url, events)?);
        tracing::debug!("Opened transport to {} (generation {})", self.url, state.generation);

        state.transport = Some(transport.clone());
        Ok(transport)
    }

    fn on_text(&self, generation: u64, text: String) {
        let frame = match ResponseFrame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Malformed response, closing connection: {}", e);
                self.teardown(generation, e);
                return;
            }
        };
        tracing::debug!("<- {}", frame);

        let owner: Weak<dyn StreamOwner> = self.self_ref.clone();
        let mut state = self.state.lock();
        if state.generation != generation || state.transport.is_none() {
            return;
        }

        let ResponseFrame { kind, id, body } = frame;
        // Stream traffic for an id this transport already issued and retired
        // is the peer crossing a local close.
        let stream_traffic = matches!(kind, ResponseType::Message | ResponseType::Close);
        if stream_traffic && id < state.next_id && !state.pending.contains_key(&id) {
            tracing::debug!("Ignoring {} for released stream {}", kind, id);
            return;
        }

        let delivery = match state.pending.remove(&id) {
            None => Err(WsRestError::Protocol(format!(
                "No pending exchange for {} {}",
                kind, id
            ))),
            Some(exchange) if kind == ResponseType::Error => Ok(Delivery::Fail(
                exchange,
                WsRestError::Server(body.unwrap_or_default()),
            )),
            Some(exchange) => match exchange.on_response(id, kind, body, &owner) {
                Step::Pending(exchange, delivery) => {
                    state.pending.insert(id, exchange);
                    Ok(delivery)
                }
                Step::Done(delivery) => Ok(delivery),
                Step::Invalid(exchange, e) => {
                    state.pending.insert(id, exchange);
                    Err(e)
                }
            },
        };

        match delivery {
            Ok(delivery) => {
                self.update_linger(&mut state);
                drop(state);
                delivery.run();
            }
            Err(e) => {
                drop(state);
                tracing::warn!("Protocol error, closing connection: {}", e);
                self.teardown(generation, e);
            }
        }
    }

    /// Drop the transport and fail everything pending with `error`.
    fn teardown(&self, generation: u64, error: WsRestError) {
        let (transport, pending) = {
            let mut state = self.state.lock();
            if state.generation != generation || state.transport.is_none() {
                return;
            }
            self.disarm_linger(&mut state);
            (state.transport.take(), std::mem::take(&mut state.pending))
        };

        if !pending.is_empty() {
            tracing::debug!("Failing {} pending exchanges: {}", pending.len(), error);
        }
        if let Some(transport) = transport {
            transport.close();
        }
        fail_all(pending, error);
    }

    /// Arm the linger timer when the table is empty, disarm it otherwise.
    fn update_linger(&self, state: &mut State) {
        if !state.pending.is_empty() {
            self.disarm_linger(state);
            return;
        }
        if state.transport.is_none() || state.linger_timer.is_some() {
            return;
        }

        match self.linger {
            Linger::Never => {}
            Linger::Immediate => {
                // Transport::close only queues the close.
                if let Some(transport) = state.transport.take() {
                    tracing::debug!("Idle, closing transport to {}", self.url);
                    transport.close();
                }
            }
            Linger::After(delay) => {
                state.linger_epoch += 1;
                let epoch = state.linger_epoch;
                let connection = self.self_ref.clone();
                let task = self.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = connection.upgrade() {
                        inner.linger_expired(epoch);
                    }
                });
                state.linger_timer = Some(LingerTimer {
                    task: task.abort_handle(),
                });
            }
        }
    }

    fn disarm_linger(&self, state: &mut State) {
        if let Some(timer) = state.linger_timer.take() {
            state.linger_epoch += 1;
            timer.task.abort();
        }
    }

    fn linger_expired(&self, epoch: u64) {
        let mut state = self.state.lock();
        if state.linger_epoch != epoch || !state.pending.is_empty() {
            return;
        }
        state.linger_timer = None;
        if let Some(transport) = state.transport.take() {
            tracing::debug!("Linger expired, closing transport to {}", self.url);
            transport.close();
        }
    }
}

impl StreamOwner for Inner {
    fn send_message(&self, id: u64, text: String) -> Result<()> {
        self.send_stream_frame(RequestMethod::Message, id, Some(&text))
    }

    fn send_close(&self, id: u64) -> Result<()> {
        self.send_stream_frame(RequestMethod::Close, id, None)
    }

    fn release(&self, id: u64) {
        let mut state = self.state.lock();
        if state.pending.get(&id).is_some_and(PendingExchange::is_stream) {
            state.pending.remove(&id);
            self.update_linger(&mut state);
        }
    }
}

/// Transport callbacks bound to one transport generation.
struct ConnectionEvents {
    connection: Weak<Inner>,
    generation: u64,
}

impl TransportEvents for ConnectionEvents {
    fn on_text(&self, text: String) {
        if let Some(inner) = self.connection.upgrade() {
            inner.on_text(self.generation, text);
        }
    }

    fn on_closed(&self) {
        if let Some(inner) = self.connection.upgrade() {
            inner.teardown(self.generation, WsRestError::ConnectionLost);
        }
    }

    fn on_error(&self, error: WsRestError) {
        tracing::warn!("Transport error: {}", error);
        if let Some(inner) = self.connection.upgrade() {
            inner.teardown(self.generation, error);
        }
    }
}

fn fail_all(pending: HashMap<u64, PendingExchange>, error: WsRestError) {
    let mut pending: Vec<_> = pending.into_iter().collect();
    pending.sort_by_key(|(id, _)| *id);
    for (_, exchange) in pending {
        exchange.fail(error.clone());
    }
}
