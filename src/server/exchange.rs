//! Inbound exchange handed to request handlers.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use url::form_urlencoded;

use super::session::Session;
use crate::error::{Result, WsRestError};
use crate::protocol::{RequestFrame, RequestMethod};
use crate::stream::Stream;

/// One inbound request.
///
/// Gives handlers access to the parsed path, query, form and JSON body, the
/// session state, and for STREAM requests the stream itself.
pub struct Exchange {
    method: RequestMethod,
    id: u64,
    path: String,
    query: Option<String>,
    body: Option<String>,
    path_params: HashMap<String, String>,
    session: Arc<Session>,
}

impl Exchange {
    pub(crate) fn new(frame: RequestFrame, session: Arc<Session>) -> Self {
        let (path, query) = match frame.path.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (frame.path, None),
        };
        Self {
            method: frame.method,
            id: frame.id,
            path,
            query,
            body: frame.body,
            path_params: HashMap::new(),
            session,
        }
    }

    pub(crate) fn set_path_params(&mut self, params: HashMap<String, String>) {
        self.path_params = params;
    }

    #[inline]
    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// Exchange id chosen by the client.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw body, `None` when the request had none.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Value of a `{name}` segment of the matched route.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_params(name).into_iter().next()
    }

    /// All values of a query parameter, in order.
    pub fn query_params(&self, name: &str) -> Vec<String> {
        lookup(self.query.as_deref(), name)
    }

    /// First value of a URL-encoded form parameter in the body.
    pub fn form_param(&self, name: &str) -> Option<String> {
        self.form_params(name).into_iter().next()
    }

    /// All values of a form parameter, in order.
    pub fn form_params(&self, name: &str) -> Vec<String> {
        lookup(self.body.as_deref(), name)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self
            .body
            .as_deref()
            .ok_or_else(|| WsRestError::InvalidRequest("Request has no body".into()))?;
        Ok(serde_json::from_str(body)?)
    }

    /// Session state, if it has type `T`.
    pub fn state<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.session.state()?.downcast_ref::<T>()
    }

    /// Session this exchange arrived on.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Register the stream of a STREAM request.
    ///
    /// OPEN is sent once the handler returns successfully; anything sent on
    /// the stream before that is queued behind it.
    pub fn open_stream(&self) -> Result<Stream> {
        if self.method != RequestMethod::Stream {
            return Err(WsRestError::InvalidRequest(format!(
                "Cannot open a stream for a {} request",
                self.method
            )));
        }
        self.session.open_stream(self.id)
    }
}

fn lookup(encoded: Option<&str>, name: &str) -> Vec<String> {
    match encoded {
        Some(encoded) => form_urlencoded::parse(encoded.as_bytes())
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .collect(),
        None => Vec::new(),
    }
}
