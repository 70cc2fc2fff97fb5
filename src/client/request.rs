//! Request builder.
//!
//! A [`Request`] collects the path, query, form and body of one exchange and
//! is consumed by one of its terminal operations:
//!
//! | Result | async | blocking | callback |
//! |---|---|---|---|
//! | text body | [`text`](Request::text) | [`get_text`](Request::get_text) | [`on_text`](Request::on_text) |
//! | JSON body | [`json`](Request::json) | [`get_json`](Request::get_json) | |
//! | stream | [`stream`](Request::stream) | [`get_stream`](Request::get_stream) | [`on_stream`](Request::on_stream) |
//!
//! Blocking operations park the calling thread until the response arrives and
//! must not be used from inside the connection's runtime.
//!
//! # Example
//!
//! ```ignore
//! let body = connection
//!     .request("/rest/users/{id}", RequestMethod::Get)?
//!     .path_param("id", "42")
//!     .query_param("verbose", "true")
//!     .text()
//!     .await?;
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use url::form_urlencoded;

use super::connection::Connection;
use super::pending::PendingExchange;
use crate::completion::Completion;
use crate::error::{Result, WsRestError};
use crate::protocol::RequestMethod;
use crate::stream::Stream;

/// A request being built. See the [module docs](self).
pub struct Request {
    connection: Connection,
    method: RequestMethod,
    path: String,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
    body: Option<String>,
    /// First builder error, reported by the terminal operation.
    error: Option<WsRestError>,
}

impl Request {
    pub(crate) fn new(connection: Connection, method: RequestMethod, path: String) -> Self {
        Self {
            connection,
            method,
            path,
            query: Vec::new(),
            form: Vec::new(),
            body: None,
            error: None,
        }
    }

    /// Method of this request.
    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// Replace the `{name}` segment of the path with `value`, URL-encoded.
    pub fn path_param(mut self, name: &str, value: impl AsRef<str>) -> Self {
        let placeholder = format!("{{{}}}", name);
        if self.path.contains(&placeholder) {
            let encoded = encode_path_segment(value.as_ref());
            self.path = self.path.replace(&placeholder, &encoded);
        } else {
            self.fail(WsRestError::InvalidRequest(format!(
                "No path parameter {} in {}",
                name, self.path
            )));
        }
        self
    }

    /// Append a query parameter. Names may repeat.
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Append a form parameter, sent URL-encoded as the body.
    pub fn form_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if self.body.is_some() {
            self.fail(WsRestError::InvalidRequest(
                "A request cannot have both a body and form parameters".into(),
            ));
        }
        self.form.push((name.into(), value.into()));
        self
    }

    /// Use `body` as the raw request body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        if !self.form.is_empty() {
            self.fail(WsRestError::InvalidRequest(
                "A request cannot have both a body and form parameters".into(),
            ));
        }
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json_body<T: Serialize>(self, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(text) => self.body(text),
            Err(e) => {
                let mut request = self;
                request.fail(e.into());
                request
            }
        }
    }

    fn fail(&mut self, error: WsRestError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Final path (with query string) and body.
    fn into_parts(self) -> Result<(Connection, RequestMethod, String, Option<String>)> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut path = self.path;
        if !self.query.is_empty() {
            path.push(if path.contains('?') { '&' } else { '?' });
            path.push_str(&encode_pairs(&self.query));
        }

        let body = if self.form.is_empty() {
            self.body
        } else {
            Some(encode_pairs(&self.form))
        };

        Ok((self.connection, self.method, path, body))
    }

    fn check_method(&self, stream: bool) -> Result<()> {
        match (self.method == RequestMethod::Stream, stream) {
            (true, false) => Err(WsRestError::InvalidRequest(
                "STREAM requests must be opened as a stream".into(),
            )),
            (false, true) => Err(WsRestError::InvalidRequest(format!(
                "{} requests cannot be opened as a stream",
                self.method
            ))),
            _ => Ok(()),
        }
    }

    /// Send the request and pass the response body to `callback`.
    ///
    /// The callback runs on the transport task and is called exactly once.
    pub fn on_text<F>(self, callback: F)
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        if let Err(e) = self.check_method(false) {
            callback(Err(e));
            return;
        }
        match self.into_parts() {
            Ok((connection, method, path, body)) => {
                // Failures are reported through the callback.
                let _ = connection.execute(method, &path, body, Some(PendingExchange::text(callback)));
            }
            Err(e) => callback(Err(e)),
        }
    }

    /// Send the request and wait for the response body.
    pub async fn text(self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.on_text(move |result| {
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| WsRestError::ConnectionLost)?
    }

    /// Blocking version of [`text`](Request::text).
    pub fn get_text(self) -> Result<String> {
        let completion = Completion::new();
        let setter = completion.clone();
        self.on_text(move |result| {
            setter.complete(result);
        });
        completion.wait()
    }

    /// Like [`get_text`](Request::get_text), giving up after `timeout`.
    ///
    /// The exchange stays pending after a timeout; its late response is
    /// discarded.
    pub fn get_text_timeout(self, timeout: Duration) -> Result<String> {
        let completion = Completion::new();
        let setter = completion.clone();
        self.on_text(move |result| {
            setter.complete(result);
        });
        completion
            .wait_timeout(timeout)
            .unwrap_or(Err(WsRestError::Timeout))
    }

    /// Send the request and decode the response body as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let text = self.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Blocking version of [`json`](Request::json).
    pub fn get_json<T: DeserializeOwned>(self) -> Result<T> {
        let text = self.get_text()?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Send the request without waiting for the response.
    ///
    /// The exchange is still tracked, so the connection stays open until
    /// the response arrives. A failed response is only logged.
    pub fn send(self) -> Result<()> {
        self.check_method(false)?;
        let (connection, method, path, body) = self.into_parts()?;
        let exchange = PendingExchange::text(move |result| {
            if let Err(e) = result {
                tracing::debug!("Response to fire-and-forget request failed: {}", e);
            }
        });
        connection.execute(method, &path, body, Some(exchange))?;
        Ok(())
    }

    /// Open a STREAM exchange and pass the stream to `callback` once the
    /// server answers OPEN.
    pub fn on_stream<F>(self, callback: F)
    where
        F: FnOnce(Result<Stream>) + Send + 'static,
    {
        if let Err(e) = self.check_method(true) {
            callback(Err(e));
            return;
        }
        match self.into_parts() {
            Ok((connection, method, path, body)) => {
                let _ = connection.execute(method, &path, body, Some(PendingExchange::stream(callback)));
            }
            Err(e) => callback(Err(e)),
        }
    }

    /// Open a STREAM exchange and wait for OPEN.
    ///
    /// Messages arriving before a handler is attached are buffered.
    pub async fn stream(self) -> Result<Stream> {
        let (tx, rx) = oneshot::channel();
        self.on_stream(move |result| {
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| WsRestError::ConnectionLost)?
    }

    /// Blocking version of [`stream`](Request::stream).
    pub fn get_stream(self) -> Result<Stream> {
        let completion = Completion::new();
        let setter = completion.clone();
        self.on_stream(move |result| {
            setter.complete(result);
        });
        completion.wait()
    }
}

fn encode_pairs(pairs: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Form encoding writes spaces as `+`, which is only meaningful in queries.
fn encode_path_segment(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::connection::tests::RecordingFactory;
    use crate::client::Linger;
    use std::sync::Arc;

    fn connection() -> (Connection, Arc<RecordingFactory>) {
        let factory = Arc::new(RecordingFactory::default());
        let connection = Connection::builder("ws://test/")
            .linger(Linger::Never)
            .factory(factory.clone())
            .build()
            .unwrap();
        (connection, factory)
    }

    fn sent(factory: &RecordingFactory) -> Vec<String> {
        factory.transport().sent.lock().clone()
    }

    #[tokio::test]
    async fn test_path_and_query_encoding() {
        let (connection, factory) = connection();
        connection
            .get("/rest/users/{name}/items")
            .unwrap()
            .path_param("name", "a b/c")
            .query_param("q", "x&y")
            .query_param("q", "z")
            .send()
            .unwrap();

        assert_eq!(sent(&factory), vec!["GET /rest/users/a%20b%2Fc/items?q=x%26y&q=z 1"]);
    }

    #[tokio::test]
    async fn test_query_appends_to_existing_query() {
        let (connection, factory) = connection();
        connection
            .get("/rest/echo?value=OK")
            .unwrap()
            .query_param("extra", "1")
            .send()
            .unwrap();

        assert_eq!(sent(&factory), vec!["GET /rest/echo?value=OK&extra=1 1"]);
    }

    #[tokio::test]
    async fn test_missing_path_param_fails() {
        let (connection, factory) = connection();
        let result = connection.get("/rest/users").unwrap().path_param("id", "1").send();

        assert!(matches!(result, Err(WsRestError::InvalidRequest(_))));
        assert!(factory.opened.lock().is_empty());
    }

    #[tokio::test]
    async fn test_form_params_become_body() {
        let (connection, factory) = connection();
        connection
            .post("/rest/form")
            .unwrap()
            .form_param("name", "Jane Doe")
            .form_param("tag", "a")
            .form_param("tag", "b")
            .send()
            .unwrap();

        assert_eq!(sent(&factory), vec!["POST /rest/form 1\nname=Jane+Doe&tag=a&tag=b"]);
    }

    #[tokio::test]
    async fn test_json_body_and_form_are_exclusive() {
        let (connection, _factory) = connection();
        let result = connection
            .post("/rest/json")
            .unwrap()
            .json_body(&serde_json::json!({"a": 1}))
            .form_param("b", "2")
            .send();

        assert!(matches!(result, Err(WsRestError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let (connection, factory) = connection();
        let pending = tokio::spawn(
            connection
                .post("/rest/sum")
                .unwrap()
                .json_body(&vec![1, 2, 3])
                .json::<i64>(),
        );

        while factory.opened.lock().is_empty() || sent(&factory).is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(sent(&factory), vec!["POST /rest/sum 1\n[1,2,3]"]);

        factory.inject("OK 1\n6");
        assert_eq!(pending.await.unwrap().unwrap(), 6);
    }

    #[tokio::test]
    async fn test_text_operations_reject_stream() {
        let (connection, _factory) = connection();
        let result = connection.stream("/rest/s").unwrap().text().await;
        assert!(matches!(result, Err(WsRestError::InvalidRequest(_))));

        let result = connection.get("/rest/g").unwrap().stream().await;
        assert!(matches!(result, Err(WsRestError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_server_error_reaches_caller() {
        let (connection, factory) = connection();
        let pending = tokio::spawn(connection.get("/rest/fail").unwrap().text());

        while factory.opened.lock().is_empty() || sent(&factory).is_empty() {
            tokio::task::yield_now().await;
        }
        factory.inject("ERROR 1\nboom");

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_get_text_timeout() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let factory = Arc::new(RecordingFactory::default());
        let connection = Connection::builder("ws://test/")
            .runtime(runtime.handle().clone())
            .factory(factory.clone())
            .build()
            .unwrap();

        let result = connection
            .get("/rest/slow")
            .unwrap()
            .get_text_timeout(Duration::from_millis(20));

        assert!(matches!(result, Err(WsRestError::Timeout)));
        assert_eq!(connection.pending_count(), 1);
    }

    #[test]
    fn test_get_text_blocks_until_response() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let factory = Arc::new(RecordingFactory::default());
        let connection = Connection::builder("ws://test/")
            .runtime(runtime.handle().clone())
            .factory(factory.clone())
            .build()
            .unwrap();

        let responder = factory.clone();
        let handle = std::thread::spawn(move || {
            while responder.opened.lock().is_empty() {
                std::thread::sleep(Duration::from_millis(1));
            }
            responder.inject("OK 1\nGET OK");
        });

        let text = connection.get("/rest/echo?value=OK").unwrap().get_text().unwrap();
        assert_eq!(text, "GET OK");
        handle.join().unwrap();
    }
}
