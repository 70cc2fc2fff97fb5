//! Error types for wsrest.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for all wsrest operations.
///
/// The type is `Clone` so that one connection-level cause can be delivered
/// to every exchange that was pending when the connection went down.
#[derive(Debug, Clone, Error)]
pub enum WsRestError {
    /// The underlying transport failed or could not be established.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed frame, unknown method/type or an id with no matching exchange.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The remote side answered the exchange with an ERROR response.
    #[error("Server error\n{0}")]
    Server(String),

    /// The connection was closed explicitly and no longer accepts requests.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The transport closed while exchanges were still pending.
    #[error("Connection closed unexpectedly")]
    ConnectionLost,

    /// Operation on a stream that has already been closed.
    #[error("Stream has been closed")]
    StreamClosed,

    /// The request could not be built or is not valid for its method.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No route matched the request.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An application handler failed.
    #[error("Handler error: {0}")]
    Handler(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// Too many frames queued for sending.
    #[error("Backpressure limit reached ({0} pending frames)")]
    Backpressure(usize),

    /// A bounded wait elapsed before the exchange completed.
    #[error("Timed out waiting for response")]
    Timeout,
}

impl WsRestError {
    /// Convenience constructor for handler failures.
    pub fn handler(message: impl Into<String>) -> Self {
        WsRestError::Handler(message.into())
    }

    /// True for the faults that tear down a whole connection.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            WsRestError::Transport(_)
                | WsRestError::Protocol(_)
                | WsRestError::ConnectionLost
                | WsRestError::ConnectionClosed
        )
    }
}

impl From<serde_json::Error> for WsRestError {
    fn from(e: serde_json::Error) -> Self {
        WsRestError::Json(Arc::new(e))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WsRestError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        WsRestError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for WsRestError {
    fn from(e: std::io::Error) -> Self {
        WsRestError::Transport(e.to_string())
    }
}

/// Result type alias using WsRestError.
pub type Result<T> = std::result::Result<T, WsRestError>;
