//! Request/response round trips over the in-memory transport and a real
//! localhost WebSocket.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use wsrest::server::{serve, Exchange, HandlerResult, Router, ServerContext};
use wsrest::transport::MemoryTransportFactory;
use wsrest::{Connection, Linger, RequestMethod, WsRestError};

static TRACING: OnceLock<()> = OnceLock::new();

fn init_tracing() {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter("warn")
            .with_test_writer()
            .init();
    });
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Point {
    x: i32,
    y: i32,
}

async fn echo(exchange: Exchange) -> HandlerResult {
    let value = exchange.query_param("value").unwrap_or_default();
    Ok(Some(format!("{} {}", exchange.method(), value)))
}

async fn echo_body(exchange: Exchange) -> HandlerResult {
    Ok(Some(format!(
        "{} {}",
        exchange.method(),
        exchange.body().unwrap_or_default()
    )))
}

async fn user(exchange: Exchange) -> HandlerResult {
    Ok(exchange.path_param("id").map(|id| format!("user {}", id)))
}

async fn greet(exchange: Exchange) -> HandlerResult {
    let names = exchange.form_params("name");
    Ok(Some(format!("hello {}", names.join(" and "))))
}

async fn swap(exchange: Exchange) -> HandlerResult {
    let point: Point = exchange.json()?;
    Ok(Some(serde_json::to_string(&Point {
        x: point.y,
        y: point.x,
    })?))
}

async fn fail(_exchange: Exchange) -> HandlerResult {
    Err(WsRestError::handler("boom"))
}

async fn slow(_exchange: Exchange) -> HandlerResult {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Ok(None)
}

fn router() -> Router {
    Router::new()
        .get("/rest/echo", echo)
        .delete("/rest/echo", echo)
        .post("/rest/echo", echo_body)
        .put("/rest/echo", echo_body)
        .get("/rest/users/{id}", user)
        .post("/rest/greet", greet)
        .put("/rest/swap", swap)
        .get("/rest/fail", fail)
        .get("/rest/slow", slow)
}

fn context() -> Arc<ServerContext> {
    ServerContext::builder().dispatcher(router()).build().unwrap()
}

fn memory_connection(linger: Linger) -> Connection {
    Connection::builder("memory://round-trip")
        .factory(Arc::new(MemoryTransportFactory::new(context())))
        .linger(linger)
        .build()
        .unwrap()
}

async fn websocket_connection(linger: Linger) -> Connection {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, context()));

    Connection::builder(format!("ws://{}/ws", addr))
        .linger(linger)
        .build()
        .unwrap()
}

async fn exercise_methods(connection: &Connection) {
    let get = connection
        .get("/rest/echo")
        .unwrap()
        .query_param("value", "OK")
        .text()
        .await
        .unwrap();
    assert_eq!(get, "GET OK");

    let post = connection
        .post("/rest/echo")
        .unwrap()
        .body("POST OK")
        .text()
        .await
        .unwrap();
    assert_eq!(post, "POST POST OK");

    let put = connection
        .request("/rest/echo", RequestMethod::Put)
        .unwrap()
        .body("PUT OK")
        .text()
        .await
        .unwrap();
    assert_eq!(put, "PUT PUT OK");

    let delete = connection
        .request("/rest/echo?value=DELETE%20OK", RequestMethod::Delete)
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(delete, "DELETE DELETE OK");

    let user = connection
        .get("/rest/users/{id}")
        .unwrap()
        .path_param("id", "a b/c")
        .text()
        .await
        .unwrap();
    assert_eq!(user, "user a b/c");

    let greeting = connection
        .post("/rest/greet")
        .unwrap()
        .form_param("name", "Ada")
        .form_param("name", "Grace Hopper")
        .text()
        .await
        .unwrap();
    assert_eq!(greeting, "hello Ada and Grace Hopper");

    let swapped: Point = connection
        .request("/rest/swap", RequestMethod::Put)
        .unwrap()
        .json_body(&Point { x: 1, y: 2 })
        .json()
        .await
        .unwrap();
    assert_eq!(swapped, Point { x: 2, y: 1 });
}

async fn exercise_error_scoping(connection: &Connection) {
    let err = connection.get("/rest/fail").unwrap().text().await.unwrap_err();
    match err {
        WsRestError::Server(body) => assert_eq!(body, "Handler error: boom"),
        other => panic!("unexpected error: {other:?}"),
    }

    let err = connection.get("/rest/nothing").unwrap().text().await.unwrap_err();
    assert!(matches!(err, WsRestError::Server(_)));

    // The connection survives application faults.
    let text = connection.get("/rest/echo?value=still").unwrap().text().await.unwrap();
    assert_eq!(text, "GET still");
    assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_memory_methods() {
    init_tracing();
    let connection = memory_connection(Linger::default());
    exercise_methods(&connection).await;
}

#[tokio::test]
async fn test_websocket_methods() {
    init_tracing();
    let connection = websocket_connection(Linger::default()).await;
    exercise_methods(&connection).await;
    connection.close();
}

#[tokio::test]
async fn test_memory_error_scoping() {
    init_tracing();
    let connection = memory_connection(Linger::default());
    exercise_error_scoping(&connection).await;
}

#[tokio::test]
async fn test_websocket_error_scoping() {
    init_tracing();
    let connection = websocket_connection(Linger::default()).await;
    exercise_error_scoping(&connection).await;
    connection.close();
}

#[tokio::test]
async fn test_concurrent_exchanges_are_correlated() {
    init_tracing();
    let connection = websocket_connection(Linger::default()).await;

    let requests = (0..20).map(|i| {
        let connection = connection.clone();
        async move {
            connection
                .get(format!("/rest/echo?value={}", i))
                .unwrap()
                .text()
                .await
                .unwrap()
        }
    });
    let replies = futures::future::join_all(requests).await;

    for (i, reply) in replies.iter().enumerate() {
        assert_eq!(reply, &format!("GET {}", i));
    }
    assert_eq!(connection.pending_count(), 0);
    connection.close();
}

#[tokio::test]
async fn test_close_fails_pending_exchanges() {
    init_tracing();
    let connection = memory_connection(Linger::default());

    let pending: Vec<_> = (0..3)
        .map(|_| {
            let request = connection.get("/rest/slow").unwrap();
            tokio::spawn(request.text())
        })
        .collect();

    for _ in 0..100 {
        if connection.pending_count() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    connection.close();

    for handle in pending {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, WsRestError::ConnectionClosed), "{err:?}");
    }
    assert!(matches!(
        connection.get("/rest/echo"),
        Err(WsRestError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_linger_closes_idle_transport() {
    init_tracing();
    let connection = websocket_connection(Linger::After(Duration::from_millis(50))).await;

    let text = connection.get("/rest/echo?value=1").unwrap().text().await.unwrap();
    assert_eq!(text, "GET 1");
    assert!(connection.is_connected());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!connection.is_connected());

    // The next request reopens the transport.
    let text = connection.get("/rest/echo?value=2").unwrap().text().await.unwrap();
    assert_eq!(text, "GET 2");
    connection.close();
}

#[tokio::test]
async fn test_unreachable_server_fails_exchange() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connection = Connection::new(format!("ws://{}/ws", addr)).unwrap();
    let err = connection.get("/rest/echo").unwrap().text().await.unwrap_err();
    assert!(err.is_connection_level(), "{err:?}");
}

#[test]
fn test_blocking_calls_from_plain_thread() {
    init_tracing();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let context = {
        let _guard = runtime.enter();
        context()
    };
    let connection = Connection::builder("memory://blocking")
        .factory(Arc::new(MemoryTransportFactory::new(context)))
        .runtime(runtime.handle().clone())
        .build()
        .unwrap();

    let text = connection
        .get("/rest/echo?value=blocking")
        .unwrap()
        .get_text()
        .unwrap();
    assert_eq!(text, "GET blocking");

    let err = connection
        .get("/rest/slow")
        .unwrap()
        .get_text_timeout(Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, WsRestError::Timeout));

    let point: Point = connection
        .request("/rest/swap", RequestMethod::Put)
        .unwrap()
        .json_body(&Point { x: 3, y: 4 })
        .get_json()
        .unwrap();
    assert_eq!(point, Point { x: 4, y: 3 });

    connection.close();
}
