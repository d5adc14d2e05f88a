//! Client error types.

use thiserror::Error;

use timecast_core::TracingError;
use timecast_protocol::{ErrorResponse, ProtocolError};
use timecast_server::ServerError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid command-line input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection to server failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol/framing error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Request timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The server answered with an error response.
    #[error("server error: {0}")]
    Server(ErrorResponse),

    /// The server answered with something other than what was asked.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Logging could not be set up.
    #[error("logging error: {0}")]
    Tracing(#[from] TracingError),

    /// The daemon failed to start or stopped with an error.
    #[error("daemon error: {0}")]
    Daemon(#[from] ServerError),
}

impl ClientError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
