//! Wire framing, pluggable codecs and request/response types for timecast.
//!
//! # Protocol Overview
//!
//! Every message travels as one length-prefixed frame:
//! - 4 bytes: body length (u32, big-endian)
//! - N bytes: body produced by the configured [`Codec`]
//!
//! The body is a structured mapping. Requests carry a `kind` tag
//! (`info`, `ping`, `add_time_event`, `publish`, `subscribe`, `unsubscribe`,
//! `listen`); responses mirror the request kind or carry `kind: "error"`.
//! Subscribers additionally receive [`Delivery`] messages
//! (`published_event`, `time_event`).
//!
//! # Example
//!
//! ```rust
//! use timecast_protocol::{
//!     Codec, FrameDecoder, JsonCodec, Request, decode_request, encode_frame, encode_message,
//! };
//!
//! let codec = JsonCodec;
//! let body = encode_message(&codec, &Request::Ping).unwrap();
//! let frame = encode_frame(&body, 1024).unwrap();
//!
//! let mut decoder = FrameDecoder::new(1024);
//! decoder.push(&frame);
//! let body = decoder.next_frame().unwrap().unwrap();
//! let request = decode_request(&codec.decode(&body).unwrap()).unwrap();
//! assert_eq!(request, Request::Ping);
//! ```

mod codec;
mod error;
mod framing;
mod types;

pub use codec::{CborCodec, Codec, CodecKind, JsonCodec, decode_message, encode_message};
pub use error::{ProtocolError, ProtocolResult, RequestError};
pub use framing::{FRAME_HEADER_LEN, FrameDecoder, encode_frame};
pub use types::{
    Delivery, ErrorCode, ErrorResponse, Payload, Request, Response, ServerInfo, ServerMessage,
    decode_request,
};

pub use timecast_core::FireAt;

/// Default maximum frame body size (1 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default number of bytes requested per socket read.
pub const DEFAULT_READ_SIZE: usize = 10240;
