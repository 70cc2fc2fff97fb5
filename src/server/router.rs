//! Request routing.
//!
//! The [`Router`] is a table built once at startup that maps a method and a
//! path to a handler. Paths are either exact (`/rest/echo`) or templates
//! with `{name}` segments (`/rest/users/{id}`). Exact routes win; templates
//! are tried in registration order.
//!
//! # Example
//!
//! ```ignore
//! use wsrest::server::{Exchange, HandlerResult, Router};
//!
//! async fn echo(exchange: Exchange) -> HandlerResult {
//!     Ok(exchange.query_param("value"))
//! }
//!
//! async fn user(exchange: Exchange) -> HandlerResult {
//!     Ok(exchange.path_param("id").map(|id| format!("user {}", id)))
//! }
//!
//! let router = Router::new()
//!     .get("/rest/echo", echo)
//!     .get("/rest/users/{id}", user);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use percent_encoding::percent_decode_str;

use super::exchange::Exchange;
use crate::error::{Result, WsRestError};
use crate::protocol::RequestMethod;

/// Result of a handler: the response body, if any.
pub type HandlerResult = Result<Option<String>>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Entry point for every non-stream-control request of a session.
pub trait Dispatcher: Send + Sync + 'static {
    /// Handle one request.
    ///
    /// `Ok` becomes an OK response (or OPEN for STREAM requests), `Err`
    /// becomes an ERROR response.
    fn dispatch(&self, exchange: Exchange) -> BoxFuture<'static, HandlerResult>;
}

/// A route handler.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, exchange: Exchange) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Exchange) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, exchange: Exchange) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(exchange))
    }
}

enum Segment {
    Literal(String),
    Param(String),
}

struct TemplateRoute {
    method: RequestMethod,
    segments: Vec<Segment>,
    handler: Arc<dyn Handler>,
}

impl TemplateRoute {
    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut parts = path.split('/');

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), decode_segment(part));
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

/// Routing table implementing [`Dispatcher`].
#[derive(Default)]
pub struct Router {
    exact: HashMap<(RequestMethod, String), Arc<dyn Handler>>,
    templates: Vec<TemplateRoute>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` and `path`.
    ///
    /// A later registration of the same exact path replaces the earlier one.
    pub fn route<H: Handler>(mut self, method: RequestMethod, path: &str, handler: H) -> Self {
        let handler: Arc<dyn Handler> = Arc::new(handler);
        if path.contains('{') {
            let segments = path
                .split('/')
                .map(|segment| match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Some(name) => Segment::Param(name.to_string()),
                    None => Segment::Literal(segment.to_string()),
                })
                .collect();
            self.templates.push(TemplateRoute {
                method,
                segments,
                handler,
            });
        } else {
            self.exact.insert((method, path.to_string()), handler);
        }
        self
    }

    pub fn get<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(RequestMethod::Get, path, handler)
    }

    pub fn post<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(RequestMethod::Post, path, handler)
    }

    pub fn put<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(RequestMethod::Put, path, handler)
    }

    pub fn delete<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(RequestMethod::Delete, path, handler)
    }

    /// Register a STREAM route. The handler must call
    /// [`Exchange::open_stream`].
    pub fn stream<H: Handler>(self, path: &str, handler: H) -> Self {
        self.route(RequestMethod::Stream, path, handler)
    }

    fn resolve(
        &self,
        method: RequestMethod,
        path: &str,
    ) -> Option<(Arc<dyn Handler>, HashMap<String, String>)> {
        if let Some(handler) = self.exact.get(&(method, path.to_string())) {
            return Some((handler.clone(), HashMap::new()));
        }
        self.templates
            .iter()
            .filter(|route| route.method == method)
            .find_map(|route| route.matches(path).map(|params| (route.handler.clone(), params)))
    }
}

impl Dispatcher for Router {
    fn dispatch(&self, mut exchange: Exchange) -> BoxFuture<'static, HandlerResult> {
        match self.resolve(exchange.method(), exchange.path()) {
            Some((handler, params)) => {
                exchange.set_path_params(params);
                handler.call(exchange)
            }
            None => {
                let error = WsRestError::NotFound(format!("{} {}", exchange.method(), exchange.path()));
                Box::pin(async move { Err(error) })
            }
        }
    }
}

/// Percent-decode one path segment. '+' and '=' are literal in paths.
fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}
