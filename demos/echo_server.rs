//! Echo Server - example of serving REST exchanges over WebSocket.
//!
//! This example demonstrates:
//! - Registering GET/POST handlers on a `Router`
//! - Path templates and query parameters
//! - Per-session state
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=debug cargo run --example echo_server
//! cargo run --example echo_client
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use wsrest::server::{serve, Exchange, HandlerResult, Router, ServerContext};

/// Requests seen on one session.
#[derive(Default)]
struct Counter(AtomicU64);

async fn echo(exchange: Exchange) -> HandlerResult {
    let value = exchange.query_param("value").unwrap_or_default();
    Ok(Some(format!("{} {}", exchange.method(), value)))
}

async fn echo_body(exchange: Exchange) -> HandlerResult {
    Ok(exchange.body().map(str::to_string))
}

async fn hello(exchange: Exchange) -> HandlerResult {
    let seen = exchange
        .state::<Counter>()
        .map(|counter| counter.0.fetch_add(1, Ordering::Relaxed) + 1)
        .unwrap_or_default();
    let name = exchange.path_param("name").unwrap_or("stranger");
    Ok(Some(format!("Hello, {}! (request #{} on this session)", name, seen)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let router = Router::new()
        .get("/rest/echo", echo)
        .post("/rest/echo", echo_body)
        .get("/rest/hello/{name}", hello);

    let context = ServerContext::builder()
        .dispatcher(router)
        .session_state(Counter::default)
        .build()?;

    let listener = TcpListener::bind("127.0.0.1:8080").await?;
    serve(listener, context).await?;
    Ok(())
}
