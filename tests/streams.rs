//! Bidirectional streams between a client connection and a server session.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use wsrest::server::{
    serve, BoxFuture, Exchange, Handler, HandlerResult, Router, ServerContext,
};
use wsrest::transport::MemoryTransportFactory;
use wsrest::{Connection, Stream, StreamHandler, WsRestError};

/// Forwards stream events to a channel as strings.
struct Collector {
    events: mpsc::UnboundedSender<String>,
}

impl StreamHandler for Collector {
    fn on_message(&self, _stream: &Stream, message: String) {
        let _ = self.events.send(message);
    }

    fn on_error(&self, _stream: &Stream, error: &WsRestError) {
        let _ = self.events.send(format!("error: {}", error));
    }

    fn on_closed(&self, _stream: &Stream) {
        let _ = self.events.send("closed".to_string());
    }
}

fn collector() -> (Collector, mpsc::UnboundedReceiver<String>) {
    let (events, rx) = mpsc::unbounded_channel();
    (Collector { events }, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a stream event")
        .expect("event channel closed")
}

/// Records what the server side of a stream sees.
struct Observe {
    events: mpsc::UnboundedSender<String>,
}

impl Handler for Observe {
    fn call(&self, exchange: Exchange) -> BoxFuture<'static, HandlerResult> {
        let events = self.events.clone();
        Box::pin(async move {
            let stream = exchange.open_stream()?;
            stream.set_handler(Collector { events });
            Ok::<Option<String>, WsRestError>(None)
        })
    }
}

async fn echo(exchange: Exchange) -> HandlerResult {
    let stream = exchange.open_stream()?;
    stream.set_handler(|stream: &Stream, message: String| {
        if message == "bye" {
            stream.close();
        } else {
            let _ = stream.send_text(format!("echo {}", message));
        }
    });
    Ok(None)
}

async fn countdown(exchange: Exchange) -> HandlerResult {
    let from: u32 = exchange
        .query_param("from")
        .and_then(|from| from.parse().ok())
        .unwrap_or(3);
    let stream = exchange.open_stream()?;
    for i in (1..=from).rev() {
        stream.send_text(i.to_string())?;
    }
    stream.close();
    Ok(None)
}

async fn refuse(_exchange: Exchange) -> HandlerResult {
    Err(WsRestError::handler("no streams today"))
}

async fn open_streams(exchange: Exchange) -> HandlerResult {
    Ok(Some(exchange.session().stream_count().to_string()))
}

fn router(observed: mpsc::UnboundedSender<String>) -> Router {
    Router::new()
        .stream("/rest/echo", echo)
        .stream("/rest/countdown", countdown)
        .stream("/rest/refuse", refuse)
        .stream("/rest/observe", Observe { events: observed })
        .get("/rest/streams", open_streams)
}

fn memory_connection() -> (Connection, mpsc::UnboundedReceiver<String>) {
    let (observed, rx) = mpsc::unbounded_channel();
    let context = ServerContext::builder()
        .dispatcher(router(observed))
        .build()
        .unwrap();
    let connection = Connection::builder("memory://streams")
        .factory(Arc::new(MemoryTransportFactory::new(context)))
        .build()
        .unwrap();
    (connection, rx)
}

async fn websocket_connection() -> (Connection, mpsc::UnboundedReceiver<String>) {
    let (observed, rx) = mpsc::unbounded_channel();
    let context = ServerContext::builder()
        .dispatcher(router(observed))
        .build()
        .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, context));

    (Connection::new(format!("ws://{}/ws", addr)).unwrap(), rx)
}

async fn exercise_echo(connection: &Connection) {
    let stream = connection.stream("/rest/echo").unwrap().stream().await.unwrap();
    let (handler, mut events) = collector();
    stream.set_handler(handler);

    for message in ["a", "b", "c"] {
        stream.send_text(message).unwrap();
    }
    assert_eq!(next(&mut events).await, "echo a");
    assert_eq!(next(&mut events).await, "echo b");
    assert_eq!(next(&mut events).await, "echo c");

    // The server closes its side on "bye".
    stream.send_text("bye").unwrap();
    assert_eq!(next(&mut events).await, "closed");
    assert!(stream.is_closed());
    assert!(matches!(stream.send_text("late"), Err(WsRestError::StreamClosed)));
}

#[tokio::test]
async fn test_memory_echo_stream() {
    let (connection, _observed) = memory_connection();
    exercise_echo(&connection).await;
}

#[tokio::test]
async fn test_websocket_echo_stream() {
    let (connection, _observed) = websocket_connection().await;
    exercise_echo(&connection).await;
    connection.close();
}

#[tokio::test]
async fn test_server_messages_sent_before_open_arrive_in_order() {
    let (connection, _observed) = websocket_connection().await;

    let stream = connection
        .stream("/rest/countdown?from=5")
        .unwrap()
        .stream()
        .await
        .unwrap();
    // Attached late: everything was buffered.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (handler, mut events) = collector();
    stream.set_handler(handler);

    for expected in ["5", "4", "3", "2", "1", "closed"] {
        assert_eq!(next(&mut events).await, expected);
    }
    connection.close();
}

#[tokio::test]
async fn test_client_close_reaches_server() {
    let (connection, mut observed) = memory_connection();

    let stream = connection.stream("/rest/observe").unwrap().stream().await.unwrap();
    stream.send_text("ping").unwrap();
    assert_eq!(next(&mut observed).await, "ping");

    let count = connection.get("/rest/streams").unwrap().text().await.unwrap();
    assert_eq!(count, "1");

    stream.close();
    assert_eq!(next(&mut observed).await, "closed");

    let count = connection.get("/rest/streams").unwrap().text().await.unwrap();
    assert_eq!(count, "0");
    assert_eq!(connection.pending_count(), 0);
}

#[tokio::test]
async fn test_refused_stream_reports_server_error() {
    let (connection, _observed) = memory_connection();
    let err = connection
        .stream("/rest/refuse")
        .unwrap()
        .stream()
        .await
        .unwrap_err();
    match err {
        WsRestError::Server(body) => assert_eq!(body, "Handler error: no streams today"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_and_text_operations_are_exclusive() {
    let (connection, _observed) = memory_connection();

    let err = connection.stream("/rest/echo").unwrap().text().await.unwrap_err();
    assert!(matches!(err, WsRestError::InvalidRequest(_)));

    let err = connection.get("/rest/streams").unwrap().stream().await.unwrap_err();
    assert!(matches!(err, WsRestError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_connection_close_fails_open_streams() {
    let (connection, mut observed) = websocket_connection().await;

    let stream = connection.stream("/rest/observe").unwrap().stream().await.unwrap();
    let (handler, mut events) = collector();
    stream.set_handler(handler);

    connection.close();

    assert_eq!(next(&mut events).await, "error: Connection closed");
    assert_eq!(next(&mut events).await, "closed");
    assert!(stream.is_closed());

    // The server session sees its transport go away.
    assert_eq!(next(&mut observed).await, "closed");
}
