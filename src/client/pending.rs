//! Pending-exchange table entries.
//!
//! An entry correlates one outbound id with its completion. Feeding it a
//! response yields a [`Step`]: the table mutation to apply under the
//! connection lock, plus a [`Delivery`] to run after the lock is released.

use std::sync::Weak;

use crate::error::{Result, WsRestError};
use crate::protocol::ResponseType;
use crate::stream::{Stream, StreamOwner};

/// Completion of a text exchange.
pub(crate) type TextCallback = Box<dyn FnOnce(Result<String>) + Send>;

/// Completion of a stream exchange, called once with the opened stream.
pub(crate) type StreamCallback = Box<dyn FnOnce(Result<Stream>) + Send>;

pub(crate) enum PendingExchange {
    /// Single-shot; completed by the first OK or ERROR.
    Text(TextCallback),
    /// Long-lived; stays in the table until CLOSE.
    Stream(StreamExchange),
}

pub(crate) struct StreamExchange {
    callback: Option<StreamCallback>,
    stream: Option<Stream>,
    /// MESSAGE bodies observed before OPEN.
    early: Vec<String>,
}

/// Work to do outside the lock once a response has been applied.
pub(crate) enum Delivery {
    Nothing,
    Text(TextCallback, Result<String>),
    Fail(PendingExchange, WsRestError),
    Stream {
        opened: Option<StreamCallback>,
        stream: Stream,
        messages: Vec<String>,
        close: bool,
    },
}

pub(crate) enum Step {
    /// The exchange stays in the table.
    Pending(PendingExchange, Delivery),
    /// The exchange is finished and leaves the table.
    Done(Delivery),
    /// The response is not valid for this exchange.
    Invalid(PendingExchange, WsRestError),
}

impl PendingExchange {
    pub(crate) fn text<F>(callback: F) -> Self
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        PendingExchange::Text(Box::new(callback))
    }

    pub(crate) fn stream<F>(callback: F) -> Self
    where
        F: FnOnce(Result<Stream>) + Send + 'static,
    {
        PendingExchange::Stream(StreamExchange {
            callback: Some(Box::new(callback)),
            stream: None,
            early: Vec::new(),
        })
    }

    /// Apply a non-ERROR response.
    pub(crate) fn on_response(
        self,
        id: u64,
        kind: ResponseType,
        body: Option<String>,
        owner: &Weak<dyn StreamOwner>,
    ) -> Step {
        match self {
            PendingExchange::Text(callback) => match kind {
                ResponseType::Ok => Step::Done(Delivery::Text(callback, Ok(body.unwrap_or_default()))),
                other => Step::Invalid(
                    PendingExchange::Text(callback),
                    WsRestError::Protocol(format!("Unexpected {} for request {}", other, id)),
                ),
            },
            PendingExchange::Stream(exchange) => exchange.on_response(id, kind, body, owner),
        }
    }

    /// Fail the exchange because the connection went away.
    pub(crate) fn fail(self, error: WsRestError) {
        match self {
            PendingExchange::Text(callback) => callback(Err(error)),
            PendingExchange::Stream(exchange) => match (exchange.stream, exchange.callback) {
                (Some(stream), _) => stream.fail(error),
                (None, Some(callback)) => callback(Err(error)),
                (None, None) => {}
            },
        }
    }

    pub(crate) fn is_stream(&self) -> bool {
        matches!(self, PendingExchange::Stream(_))
    }
}

impl StreamExchange {
    fn on_response(
        mut self,
        id: u64,
        kind: ResponseType,
        body: Option<String>,
        owner: &Weak<dyn StreamOwner>,
    ) -> Step {
        match kind {
            ResponseType::Open => {
                if self.stream.is_some() {
                    return Step::Invalid(
                        PendingExchange::Stream(self),
                        WsRestError::Protocol(format!("Stream {} is already open", id)),
                    );
                }
                let stream = Stream::new(id, owner.clone());
                self.stream = Some(stream.clone());
                let delivery = Delivery::Stream {
                    opened: self.callback.take(),
                    stream,
                    messages: std::mem::take(&mut self.early),
                    close: false,
                };
                Step::Pending(PendingExchange::Stream(self), delivery)
            }
            ResponseType::Message => {
                let body = body.unwrap_or_default();
                match &self.stream {
                    Some(stream) => {
                        let delivery = Delivery::Stream {
                            opened: None,
                            stream: stream.clone(),
                            messages: vec![body],
                            close: false,
                        };
                        Step::Pending(PendingExchange::Stream(self), delivery)
                    }
                    None => {
                        self.early.push(body);
                        Step::Pending(PendingExchange::Stream(self), Delivery::Nothing)
                    }
                }
            }
            ResponseType::Close => {
                // Opened-then-closed: materialize the stream so the caller still sees it.
                let stream = match self.stream.take() {
                    Some(stream) => stream,
                    None => Stream::new(id, owner.clone()),
                };
                Step::Done(Delivery::Stream {
                    opened: self.callback.take(),
                    stream,
                    messages: std::mem::take(&mut self.early),
                    close: true,
                })
            }
            ResponseType::Ok | ResponseType::Error => Step::Invalid(
                PendingExchange::Stream(self),
                WsRestError::Protocol(format!("Unexpected {} for stream {}", kind, id)),
            ),
        }
    }
}

impl Delivery {
    /// Run the application callbacks. Must be called without the connection lock.
    pub(crate) fn run(self) {
        match self {
            Delivery::Nothing => {}
            Delivery::Text(callback, result) => callback(result),
            Delivery::Fail(exchange, error) => exchange.fail(error),
            Delivery::Stream {
                opened,
                stream,
                messages,
                close,
            } => {
                if let Some(callback) = opened {
                    callback(Ok(stream.clone()));
                }
                for message in messages {
                    stream.deliver(message);
                }
                if close {
                    stream.close_local();
                }
            }
        }
    }
}
