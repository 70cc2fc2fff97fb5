//! Server context: dispatcher, worker pool and per-session configuration.
//!
//! A [`ServerContext`] is shared by every session of a server. Each inbound
//! request is parsed on the transport's read path and then executed on the
//! runtime under a semaphore permit, so at most `workers` handlers (and
//! stream deliveries) run at once while frame ingestion keeps going.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use super::exchange::Exchange;
use super::router::{Dispatcher, HandlerResult};
use super::session::{Session, SessionState};
use crate::error::{Result, WsRestError};
use crate::protocol::{
    request_id_hint, RequestFrame, RequestMethod, ResponseFrame, UNKNOWN_EXCHANGE_ID,
};
use crate::stream::Stream;
use crate::transport::Transport;
use crate::writer::WriterConfig;

/// Default number of concurrently running handlers.
pub const DEFAULT_WORKERS: usize = 5;

type StateFactory = Box<dyn Fn() -> SessionState + Send + Sync>;

/// Builder for [`ServerContext`].
pub struct ServerContextBuilder {
    dispatcher: Option<Arc<dyn Dispatcher>>,
    workers: usize,
    expose_diagnostics: bool,
    state_factory: Option<StateFactory>,
    writer_config: WriterConfig,
    runtime: Option<Handle>,
}

impl ServerContextBuilder {
    fn new() -> Self {
        Self {
            dispatcher: None,
            workers: DEFAULT_WORKERS,
            expose_diagnostics: false,
            state_factory: None,
            writer_config: WriterConfig::default(),
            runtime: None,
        }
    }

    /// Set the dispatcher for all requests. Required.
    pub fn dispatcher<D: Dispatcher>(mut self, dispatcher: D) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Size of the worker pool.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Send the full debug rendering of errors in ERROR bodies instead of
    /// their display text.
    pub fn expose_diagnostics(mut self, expose: bool) -> Self {
        self.expose_diagnostics = expose;
        self
    }

    /// Create one state value per session, reachable through
    /// [`Exchange::state`].
    pub fn session_state<F, T>(mut self, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        self.state_factory = Some(Box::new(move || Arc::new(factory()) as SessionState));
        self
    }

    /// Outbound queue configuration for WebSocket sessions.
    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    /// Runtime that runs handlers. Defaults to the current runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Arc<ServerContext>> {
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| WsRestError::InvalidRequest("A dispatcher is required".into()))?;
        if self.workers == 0 {
            return Err(WsRestError::InvalidRequest(
                "Worker pool size must be positive".into(),
            ));
        }
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                WsRestError::InvalidRequest("No tokio runtime available".into())
            })?,
        };

        Ok(Arc::new(ServerContext {
            dispatcher,
            workers: self.workers,
            permits: Arc::new(Semaphore::new(self.workers)),
            expose_diagnostics: self.expose_diagnostics,
            state_factory: self.state_factory,
            writer_config: self.writer_config,
            runtime,
        }))
    }
}

/// Shared server configuration and dispatch machinery.
pub struct ServerContext {
    dispatcher: Arc<dyn Dispatcher>,
    workers: usize,
    permits: Arc<Semaphore>,
    expose_diagnostics: bool,
    state_factory: Option<StateFactory>,
    writer_config: WriterConfig,
    runtime: Handle,
}

impl ServerContext {
    pub fn builder() -> ServerContextBuilder {
        ServerContextBuilder::new()
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[inline]
    pub fn writer_config(&self) -> WriterConfig {
        self.writer_config
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Attach a session to an outbound transport.
    ///
    /// The caller routes the transport's inbound events to the returned
    /// session (it implements [`TransportEvents`](crate::transport::TransportEvents)).
    pub fn new_session(self: &Arc<Self>, transport: Box<dyn Transport>) -> Arc<Session> {
        Session::new(self.clone(), transport)
    }

    pub(crate) fn create_session_state(&self) -> Option<SessionState> {
        self.state_factory.as_ref().map(|factory| factory())
    }

    fn diagnostic(&self, error: &WsRestError) -> String {
        if self.expose_diagnostics {
            format!("{:?}", error)
        } else {
            error.to_string()
        }
    }

    /// Handle one inbound frame of `session`. Never blocks.
    pub(crate) fn execute(self: &Arc<Self>, session: &Arc<Session>, text: String) {
        let frame = match RequestFrame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                let id = request_id_hint(&text).unwrap_or(UNKNOWN_EXCHANGE_ID);
                tracing::warn!("Rejecting malformed request {}: {}", id, e);
                self.respond_error(session, id, &e);
                return;
            }
        };

        match frame.method {
            RequestMethod::Message | RequestMethod::Close => self.route_stream_frame(session, frame),
            _ => {
                let context = self.clone();
                let session = session.clone();
                self.runtime.spawn(async move {
                    let Ok(_permit) = context.permits.clone().acquire_owned().await else {
                        return;
                    };
                    context.run_exchange(session, frame).await;
                });
            }
        }
    }

    fn route_stream_frame(self: &Arc<Self>, session: &Arc<Session>, frame: RequestFrame) {
        let closing = frame.method == RequestMethod::Close;
        let stream = match session.inbound_stream(frame.id, closing) {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                tracing::debug!("Ignoring {} for released stream {}", frame.method, frame.id);
                return;
            }
            Err(e) => {
                tracing::warn!("{} {}: {}", frame.method, frame.id, e);
                self.respond_error(session, frame.id, &e);
                return;
            }
        };

        let must_drain = if closing {
            stream.enqueue_close()
        } else {
            stream.enqueue_message(frame.body.unwrap_or_default())
        };
        if must_drain {
            self.spawn_drain(stream);
        }
    }

    fn spawn_drain(&self, stream: Stream) {
        let permits = self.permits.clone();
        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            stream.drain();
        });
    }

    async fn run_exchange(&self, session: Arc<Session>, frame: RequestFrame) {
        let id = frame.id;
        let method = frame.method;
        tracing::debug!("Dispatching {} {} {}", method, frame.path, id);

        let exchange = Exchange::new(frame, session.clone());
        let result: HandlerResult = match AssertUnwindSafe(self.dispatcher.dispatch(exchange))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Handler for request {} panicked", id);
                Err(WsRestError::handler("Handler panicked"))
            }
        };

        let outcome = match (method, result) {
            (RequestMethod::Stream, Ok(_)) => session.confirm_open(id),
            (RequestMethod::Stream, Err(e)) => {
                session.abort_stream(id, &e);
                Err(e)
            }
            (_, Ok(body)) => session.send_text(ResponseFrame::ok(id, body).encode()),
            (_, Err(e)) => Err(e),
        };

        if let Err(e) = outcome {
            if matches!(e, WsRestError::ConnectionClosed) {
                tracing::debug!("Session closed before request {} completed", id);
                return;
            }
            tracing::debug!("Request {} failed: {}", id, e);
            self.respond_error(&session, id, &e);
        }
    }

    fn respond_error(&self, session: &Session, id: u64, error: &WsRestError) {
        let frame = ResponseFrame::error(id, self.diagnostic(error)).encode();
        if let Err(e) = session.send_text(frame) {
            tracing::warn!("Failed to send ERROR for request {}: {}", id, e);
        }
    }
}
