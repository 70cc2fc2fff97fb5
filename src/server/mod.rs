//! Server module - sessions, dispatch and routing.
//!
//! Provides:
//! - [`ServerContext`] - dispatcher, worker pool and session configuration
//! - [`Session`] - one accepted connection and its streams
//! - [`Router`] / [`Exchange`] - method and path routing to async handlers
//! - [`serve`] - WebSocket accept loop
//!
//! # Example
//!
//! ```ignore
//! use wsrest::server::{serve, Exchange, HandlerResult, Router, ServerContext};
//!
//! async fn echo(exchange: Exchange) -> HandlerResult {
//!     Ok(exchange.query_param("value"))
//! }
//!
//! let context = ServerContext::builder()
//!     .dispatcher(Router::new().get("/rest/echo", echo))
//!     .workers(8)
//!     .build()?;
//! serve(TcpListener::bind("127.0.0.1:8080").await?, context).await?;
//! ```

mod context;
mod endpoint;
mod exchange;
mod router;
mod session;

pub use context::{ServerContext, ServerContextBuilder, DEFAULT_WORKERS};
pub use endpoint::{accept_connection, serve};
pub use exchange::Exchange;
pub use router::{BoxFuture, Dispatcher, Handler, HandlerResult, Router};
pub use session::{Session, SessionState};
