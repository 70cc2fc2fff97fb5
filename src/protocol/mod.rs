//! Protocol module - text framing and frame types.
//!
//! This module implements the line-oriented framing used on the transport:
//! - method and response type names
//! - request/response frame encoding and decoding

mod frame;
mod wire_format;

pub use frame::{encode_request, encode_response, request_id_hint, RequestFrame, ResponseFrame};
pub use wire_format::{RequestMethod, ResponseType, STREAM_PATH, UNKNOWN_EXCHANGE_ID};
