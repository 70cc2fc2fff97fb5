//! Method and response type names used on the wire.
//!
//! Frames are UTF-8 text. The first line is a header of space separated
//! tokens, anything after the first `\n` is the body:
//!
//! ```text
//! request:  <METHOD> <PATH> <ID>[\n<BODY>]
//! response: <TYPE> <ID>[\n<BODY>]
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::WsRestError;

/// Path used by stream MESSAGE and CLOSE requests.
pub const STREAM_PATH: &str = "~";

/// Id used in ERROR responses when the request id could not be parsed.
pub const UNKNOWN_EXCHANGE_ID: u64 = 0;

/// Request methods a client can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Delete,
    /// Opens a full-duplex stream on the request id.
    Stream,
    /// Message on an open stream.
    Message,
    /// Closes an open stream.
    Close,
}

impl RequestMethod {
    /// Name as written on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Delete => "DELETE",
            RequestMethod::Stream => "STREAM",
            RequestMethod::Message => "MESSAGE",
            RequestMethod::Close => "CLOSE",
        }
    }

    /// True for MESSAGE and CLOSE, which address an existing stream.
    #[inline]
    pub fn is_stream_control(&self) -> bool {
        matches!(self, RequestMethod::Message | RequestMethod::Close)
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestMethod {
    type Err = WsRestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(RequestMethod::Get),
            "POST" => Ok(RequestMethod::Post),
            "PUT" => Ok(RequestMethod::Put),
            "DELETE" => Ok(RequestMethod::Delete),
            "STREAM" => Ok(RequestMethod::Stream),
            "MESSAGE" => Ok(RequestMethod::Message),
            "CLOSE" => Ok(RequestMethod::Close),
            other => Err(WsRestError::Protocol(format!("Invalid method {}", other))),
        }
    }
}

/// Response types a server can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    Ok,
    Error,
    Open,
    Message,
    Close,
}

impl ResponseType {
    /// Name as written on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Ok => "OK",
            ResponseType::Error => "ERROR",
            ResponseType::Open => "OPEN",
            ResponseType::Message => "MESSAGE",
            ResponseType::Close => "CLOSE",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = WsRestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(ResponseType::Ok),
            "ERROR" => Ok(ResponseType::Error),
            "OPEN" => Ok(ResponseType::Open),
            "MESSAGE" => Ok(ResponseType::Message),
            "CLOSE" => Ok(ResponseType::Close),
            other => Err(WsRestError::Protocol(format!(
                "Unknown response type {}",
                other
            ))),
        }
    }
}

/// Split a frame into header and optional body at the first `\n`.
///
/// The body is never split again, so it may contain further newlines.
pub(crate) fn split_frame(text: &str) -> (&str, Option<&str>) {
    match text.split_once('\n') {
        Some((header, body)) => (header, Some(body)),
        None => (text, None),
    }
}

/// Split a header into exactly `N` non-empty tokens separated by single spaces.
pub(crate) fn split_header<const N: usize>(header: &str) -> Result<[&str; N], WsRestError> {
    let mut tokens = [""; N];
    let mut parts = header.split(' ');

    for slot in tokens.iter_mut() {
        match parts.next() {
            Some(part) if !part.is_empty() => *slot = part,
            _ => return Err(WsRestError::Protocol(format!("Invalid header {:?}", header))),
        }
    }

    if parts.next().is_some() {
        return Err(WsRestError::Protocol(format!("Invalid header {:?}", header)));
    }

    Ok(tokens)
}

/// Parse an exchange id token.
pub(crate) fn parse_id(token: &str) -> Result<u64, WsRestError> {
    token
        .parse::<u64>()
        .map_err(|_| WsRestError::Protocol(format!("Invalid id {:?}", token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_method_names() {
        for method in [
            RequestMethod::Get,
            RequestMethod::Post,
            RequestMethod::Put,
            RequestMethod::Delete,
            RequestMethod::Stream,
            RequestMethod::Message,
            RequestMethod::Close,
        ] {
            assert_eq!(method.as_str().parse::<RequestMethod>().unwrap(), method);
        }
    }

    #[test]
    fn test_method_names_are_case_sensitive() {
        assert!("get".parse::<RequestMethod>().is_err());
        assert!("ok".parse::<ResponseType>().is_err());
    }

    #[test]
    fn test_stream_control() {
        assert!(RequestMethod::Message.is_stream_control());
        assert!(RequestMethod::Close.is_stream_control());
        assert!(!RequestMethod::Stream.is_stream_control());
        assert!(!RequestMethod::Get.is_stream_control());
    }

    #[test]
    fn test_split_frame() {
        assert_eq!(split_frame("OK 1"), ("OK 1", None));
        assert_eq!(split_frame("OK 1\n"), ("OK 1", Some("")));
        assert_eq!(split_frame("OK 1\na\nb"), ("OK 1", Some("a\nb")));
    }

    #[test]
    fn test_split_header_token_count() {
        assert_eq!(split_header::<2>("OK 1").unwrap(), ["OK", "1"]);
        assert!(split_header::<2>("OK").is_err());
        assert!(split_header::<2>("OK 1 2").is_err());
        assert!(split_header::<3>("GET  1").is_err());
        assert!(split_header::<2>("OK 1 ").is_err());
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(parse_id("-1").is_err());
        assert!(parse_id("x").is_err());
    }
}
