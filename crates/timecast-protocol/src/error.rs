//! Protocol error types.

use thiserror::Error;

use crate::types::ErrorCode;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while framing or coding messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame declared a zero-length body.
    #[error("empty frame")]
    EmptyFrame,

    /// Stream ended in the middle of a frame.
    #[error("incomplete frame: expected {expected} bytes, got {received}")]
    IncompleteFrame { expected: usize, received: usize },

    /// Codec could not produce bytes for a message.
    #[error("{codec} encode failed: {message}")]
    Encode { codec: &'static str, message: String },

    /// Codec could not interpret a frame body.
    #[error("{codec} decode failed: {message}")]
    Decode { codec: &'static str, message: String },

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true if the error only affects the current frame.
    ///
    /// Decode failures leave frame boundaries intact, so the stream can keep
    /// being read. Everything else means the byte stream can no longer be
    /// trusted.
    pub fn is_frame_scoped(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    pub(crate) fn encode(codec: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Encode {
            codec,
            message: err.to_string(),
        }
    }

    pub(crate) fn decode(codec: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            codec,
            message: err.to_string(),
        }
    }
}

/// A well-formed frame carrying a request that cannot be executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The `kind` tag names no known request.
    #[error("unknown request kind: {0}")]
    UnknownKind(String),

    /// A field is missing or has the wrong shape.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl RequestError {
    /// Creates an invalid request error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    /// Returns the wire error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownKind(_) => ErrorCode::UnknownKind,
            Self::Invalid(_) => ErrorCode::InvalidRequest,
        }
    }
}
