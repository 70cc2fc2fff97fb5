//! Stream - example of a bidirectional stream.
//!
//! Runs a server and a client in one process over the in-memory transport:
//! the server answers every message with its length and closes the stream
//! when the client says "bye".

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use wsrest::server::{Exchange, HandlerResult, Router, ServerContext};
use wsrest::transport::MemoryTransportFactory;
use wsrest::{Connection, Stream, StreamHandler, WsRestError};

async fn lengths(exchange: Exchange) -> HandlerResult {
    let stream = exchange.open_stream()?;
    stream.send_text("ready")?;
    stream.set_handler(|stream: &Stream, message: String| {
        if message == "bye" {
            stream.close();
        } else {
            let _ = stream.send_text(format!("{} -> {}", message, message.len()));
        }
    });
    Ok(None)
}

struct Printer {
    done: mpsc::UnboundedSender<()>,
}

impl StreamHandler for Printer {
    fn on_message(&self, stream: &Stream, message: String) {
        println!("[stream {}] {}", stream.id(), message);
    }

    fn on_error(&self, stream: &Stream, error: &WsRestError) {
        println!("[stream {}] failed: {}", stream.id(), error);
    }

    fn on_closed(&self, stream: &Stream) {
        println!("[stream {}] closed", stream.id());
        let _ = self.done.send(());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let context = ServerContext::builder()
        .dispatcher(Router::new().stream("/rest/lengths", lengths))
        .build()?;
    let connection = Connection::builder("memory://demo")
        .factory(Arc::new(MemoryTransportFactory::new(context)))
        .build()?;

    let stream = connection.stream("/rest/lengths")?.stream().await?;
    let (done, mut closed) = mpsc::unbounded_channel();
    stream.set_handler(Printer { done });

    for word in ["hello", "multiplexed", "world", "bye"] {
        stream.send_text(word)?;
    }

    closed.recv().await;
    connection.close();
    Ok(())
}
