//! WebSocket accept loop.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use super::context::ServerContext;
use crate::error::Result;
use crate::transport::websocket::{accept, read_loop};
use crate::transport::TransportEvents;

/// Accept connections on `listener` until it fails, serving each one as a
/// session of `context`.
pub async fn serve(listener: TcpListener, context: Arc<ServerContext>) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Listening on {}", addr);
    }

    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);

        let context = context.clone();
        context.runtime().clone().spawn(async move {
            if let Err(e) = accept_connection(stream, context).await {
                tracing::warn!("Connection from {} failed: {}", peer, e);
            }
        });
    }
}

/// Upgrade one TCP connection and serve it until the peer goes away.
pub async fn accept_connection(stream: TcpStream, context: Arc<ServerContext>) -> Result<()> {
    let (queue, read) = accept(context.runtime(), stream, context.writer_config()).await?;
    let session = context.new_session(Box::new(queue));

    let events: Arc<dyn TransportEvents> = session.clone();
    read_loop(read, events).await;

    tracing::debug!("Session ended with {} open streams", session.stream_count());
    Ok(())
}
