//! Request and response frames.
//!
//! # Example
//!
//! ```
//! use wsrest::protocol::{RequestFrame, RequestMethod};
//!
//! let frame = RequestFrame::new(RequestMethod::Get, "/rest/echo?value=OK", 7, None);
//! let text = frame.encode();
//! assert_eq!(text, "GET /rest/echo?value=OK 7");
//! assert_eq!(RequestFrame::decode(&text).unwrap(), frame);
//! ```

use std::fmt;

use super::wire_format::{parse_id, split_frame, split_header, RequestMethod, ResponseType};
use crate::error::Result;

/// A request sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub method: RequestMethod,
    pub path: String,
    pub id: u64,
    /// `None` when the frame has no newline; `Some("")` is a distinct, empty body.
    pub body: Option<String>,
}

impl RequestFrame {
    /// Create a new request frame.
    pub fn new(method: RequestMethod, path: impl Into<String>, id: u64, body: Option<String>) -> Self {
        Self {
            method,
            path: path.into(),
            id,
            body,
        }
    }

    /// Encode to wire text.
    pub fn encode(&self) -> String {
        encode_request(self.method, &self.path, self.id, self.body.as_deref())
    }

    /// Decode wire text.
    ///
    /// Returns a protocol error for a wrong token count, an unknown method or
    /// an id that is not an unsigned 64-bit integer.
    pub fn decode(text: &str) -> Result<Self> {
        let (header, body) = split_frame(text);
        let [method, path, id] = split_header::<3>(header)?;

        Ok(Self {
            method: method.parse()?,
            path: path.to_string(),
            id: parse_id(id)?,
            body: body.map(str::to_string),
        })
    }
}

impl fmt::Display for RequestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.path, self.id)
    }
}

/// A response sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub kind: ResponseType,
    pub id: u64,
    pub body: Option<String>,
}

impl ResponseFrame {
    /// Create a new response frame.
    pub fn new(kind: ResponseType, id: u64, body: Option<String>) -> Self {
        Self { kind, id, body }
    }

    /// OK response with an optional body.
    pub fn ok(id: u64, body: Option<String>) -> Self {
        Self::new(ResponseType::Ok, id, body)
    }

    /// ERROR response carrying a diagnostic body.
    pub fn error(id: u64, diagnostic: impl Into<String>) -> Self {
        Self::new(ResponseType::Error, id, Some(diagnostic.into()))
    }

    /// Encode to wire text.
    pub fn encode(&self) -> String {
        encode_response(self.kind, self.id, self.body.as_deref())
    }

    /// Decode wire text.
    pub fn decode(text: &str) -> Result<Self> {
        let (header, body) = split_frame(text);
        let [kind, id] = split_header::<2>(header)?;

        Ok(Self {
            kind: kind.parse()?,
            id: parse_id(id)?,
            body: body.map(str::to_string),
        })
    }
}

impl fmt::Display for ResponseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Best-effort id of a request that failed to decode.
///
/// Looks at the third header token only, so a frame with a bad method or an
/// extra token still reports the id the client is waiting on.
pub fn request_id_hint(text: &str) -> Option<u64> {
    let (header, _) = split_frame(text);
    header.split(' ').nth(2).and_then(|token| parse_id(token).ok())
}

/// Encode a request without building a [`RequestFrame`] first.
pub fn encode_request(method: RequestMethod, path: &str, id: u64, body: Option<&str>) -> String {
    let mut text = format!("{} {} {}", method, path, id);
    if let Some(body) = body {
        text.reserve(body.len() + 1);
        text.push('\n');
        text.push_str(body);
    }
    text
}

/// Encode a response without building a [`ResponseFrame`] first.
pub fn encode_response(kind: ResponseType, id: u64, body: Option<&str>) -> String {
    let mut text = format!("{} {}", kind, id);
    if let Some(body) = body {
        text.reserve(body.len() + 1);
        text.push('\n');
        text.push_str(body);
    }
    text
}
