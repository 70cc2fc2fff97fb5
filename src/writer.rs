//! Single-flight outbound queue.
//!
//! Every connection and session owns one [`SendQueue`]. Frames are pushed
//! from any thread without blocking and a dedicated writer task hands them to
//! the transport one at a time, in submission order.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► mpsc::UnboundedSender<Outbound> ─► Writer Task ─► FrameSink
//! Caller N ─┘
//! ```
//!
//! The writer awaits each send before taking the next frame, so at most one
//! frame is in flight. When a send fails the writer closes the sink and
//! drops the failed frame together with everything queued behind it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, WsRestError};

/// Default maximum queued frames before sends are rejected.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Destination of outbound text frames.
pub trait FrameSink: Send + 'static {
    /// Send one complete frame.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    /// Close the underlying transport. Called exactly once, when the writer stops.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

/// Configuration for the writer task.
#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    /// Maximum queued frames before `send_text` fails with `Backpressure`.
    pub max_pending_frames: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
        }
    }
}

/// Handle for queueing frames on a writer task.
///
/// Cheap to clone; all clones feed the same FIFO.
#[derive(Clone)]
pub struct SendQueue {
    tx: mpsc::UnboundedSender<Outbound>,
    pending: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    max_pending: usize,
}

impl SendQueue {
    fn new(
        tx: mpsc::UnboundedSender<Outbound>,
        pending: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
        max_pending: usize,
    ) -> Self {
        Self {
            tx,
            pending,
            closed,
            max_pending,
        }
    }

    /// Queue a frame for sending.
    ///
    /// Never waits. Fails with `Backpressure` when the queue is full and
    /// with `ConnectionClosed` once the queue has been closed.
    pub fn send_text(&self, text: String) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WsRestError::ConnectionClosed);
        }

        let current = self.pending.load(Ordering::Acquire);
        if current >= self.max_pending {
            return Err(WsRestError::Backpressure(current));
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(Outbound::Text(text)).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            WsRestError::ConnectionClosed
        })
    }

    /// Ask the writer to close the sink after the frames already queued.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Outbound::Close);
    }

    /// True once the queue was closed or the writer stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Frames queued but not yet handed to the sink.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True when `send_text` would currently be rejected.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }
}

/// Spawn the writer task on the current runtime.
///
/// # Panics
///
/// Panics when called outside a tokio runtime, like `tokio::spawn`.
pub fn spawn_writer_task<S>(sink: S, config: WriterConfig) -> (SendQueue, JoinHandle<Result<()>>)
where
    S: FrameSink,
{
    spawn_writer_task_on(&Handle::current(), sink, config)
}

/// Spawn the writer task on the given runtime.
pub fn spawn_writer_task_on<S>(
    runtime: &Handle,
    sink: S,
    config: WriterConfig,
) -> (SendQueue, JoinHandle<Result<()>>)
where
    S: FrameSink,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicBool::new(false));

    let queue = SendQueue::new(tx, pending.clone(), closed.clone(), config.max_pending_frames);
    let task = runtime.spawn(writer_loop(rx, sink, pending, closed));

    (queue, task)
}

/// Main writer loop - sends frames one at a time until closed or failed.
async fn writer_loop<S>(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut sink: S,
    pending: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
) -> Result<()>
where
    S: FrameSink,
{
    while let Some(item) = rx.recv().await {
        let text = match item {
            Outbound::Text(text) => text,
            Outbound::Close => break,
        };

        let result = sink.send_text(text).await;
        pending.fetch_sub(1, Ordering::Release);

        if let Err(e) = result {
            tracing::warn!("Send failed, closing transport: {}", e);
            closed.store(true, Ordering::Release);
            rx.close();
            sink.close().await;
            return Err(e);
        }
    }

    closed.store(true, Ordering::Release);
    sink.close().await;
    Ok(())
}
