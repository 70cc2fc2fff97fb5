//! WebSocket transport over tokio-tungstenite.
//!
//! Each socket is split in two halves: the write half is driven by a
//! [`SendQueue`] writer task and the read half by [`read_loop`], which turns
//! incoming messages into [`TransportEvents`] calls.

use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::{self, Message};

use super::{Transport, TransportEvents, TransportFactory};
use crate::error::{Result, WsRestError};
use crate::writer::{spawn_writer_task_on, FrameSink, SendQueue, WriterConfig};

/// Client-side factory opening `ws://` and `wss://` connections.
#[derive(Clone)]
pub struct WebSocketFactory {
    runtime: Handle,
    writer_config: WriterConfig,
}

impl WebSocketFactory {
    /// Create a factory that runs its tasks on `runtime`.
    pub fn new(runtime: Handle, writer_config: WriterConfig) -> Self {
        Self {
            runtime,
            writer_config,
        }
    }
}

impl TransportFactory for WebSocketFactory {
    fn open(&self, url: &str, events: Arc<dyn TransportEvents>) -> Result<Box<dyn Transport>> {
        let parsed = url::Url::parse(url)
            .map_err(|e| WsRestError::Transport(format!("Invalid URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(WsRestError::Transport(format!(
                "Unsupported URL scheme {}",
                parsed.scheme()
            )));
        }

        let (sink_tx, sink_rx) = oneshot::channel();
        let (queue, _writer) = spawn_writer_task_on(
            &self.runtime,
            WebSocketSink::connecting(sink_rx),
            self.writer_config.clone(),
        );

        let url = url.to_string();
        self.runtime.spawn(async move {
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((socket, _response)) => {
                    tracing::debug!("Connected to {}", url);
                    let (write, read) = socket.split();
                    if sink_tx.send(write).is_err() {
                        // Closed before the handshake finished.
                        events.on_closed();
                        return;
                    }
                    read_loop(read, events).await;
                }
                Err(e) => {
                    tracing::warn!("Failed to connect to {}: {}", url, e);
                    events.on_error(e.into());
                }
            }
        });

        Ok(Box::new(queue))
    }
}

/// Drive the write half of a socket with a writer task.
pub(crate) fn spawn_writer<S>(runtime: &Handle, write: S, writer_config: WriterConfig) -> SendQueue
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
{
    let (queue, _writer) = spawn_writer_task_on(runtime, WebSocketSink::ready(write), writer_config);
    queue
}

enum SinkState<S> {
    Connecting(oneshot::Receiver<S>),
    Ready(S),
    Gone,
}

/// Write half of a socket that may still be connecting.
struct WebSocketSink<S> {
    state: SinkState<S>,
}

impl<S> WebSocketSink<S>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
{
    fn connecting(rx: oneshot::Receiver<S>) -> Self {
        Self {
            state: SinkState::Connecting(rx),
        }
    }

    fn ready(sink: S) -> Self {
        Self {
            state: SinkState::Ready(sink),
        }
    }

    /// Wait for the handshake if it is still running.
    async fn sink(&mut self) -> Option<&mut S> {
        if let SinkState::Connecting(rx) = &mut self.state {
            let next = match rx.await {
                Ok(sink) => SinkState::Ready(sink),
                Err(_) => SinkState::Gone,
            };
            self.state = next;
        }
        match &mut self.state {
            SinkState::Ready(sink) => Some(sink),
            _ => None,
        }
    }
}

impl<S> FrameSink for WebSocketSink<S>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
{
    async fn send_text(&mut self, text: String) -> Result<()> {
        match self.sink().await {
            Some(sink) => sink.send(Message::Text(text.into())).await.map_err(Into::into),
            None => Err(WsRestError::Transport("WebSocket is not connected".into())),
        }
    }

    async fn close(&mut self) {
        if let Some(sink) = self.sink().await {
            if let Err(e) = sink.send(Message::Close(None)).await {
                tracing::debug!("Close frame not sent: {}", e);
            }
            let _ = sink.close().await;
        }
        self.state = SinkState::Gone;
    }
}

/// Read messages until the socket closes, forwarding text frames to `events`.
///
/// Ends with exactly one `on_closed` or `on_error` call.
pub(crate) async fn read_loop<R>(mut read: R, events: Arc<dyn TransportEvents>)
where
    R: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => events.on_text(text.as_str().to_owned()),
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(data)) => {
                tracing::warn!("Ignoring binary message ({} bytes)", data.len());
            }
            Ok(_) => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                break
            }
            Err(e) => {
                events.on_error(e.into());
                return;
            }
        }
    }
    events.on_closed();
}

/// Complete the server-side handshake on an accepted TCP stream.
///
/// Returns the queue for outbound frames and the read half, to be driven by
/// [`read_loop`].
pub(crate) async fn accept(
    runtime: &Handle,
    stream: TcpStream,
    writer_config: WriterConfig,
) -> Result<(
    SendQueue,
    impl Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin + Send,
)> {
    let socket = tokio_tungstenite::accept_async(stream).await?;
    let (write, read) = socket.split();
    Ok((spawn_writer(runtime, write, writer_config), read))
}
