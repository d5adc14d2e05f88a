//! Server error types.

use std::io;
use thiserror::Error;

use timecast_protocol::{ProtocolError, RequestError};

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (socket, file, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (framing, encoding, etc.).
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Well-formed request that cannot be executed.
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// Connection refused because the client limit is reached.
    #[error("Client limit reached ({max}), refusing {peer}")]
    Capacity { peer: String, max: usize },

    /// Socket path already in use.
    #[error("Socket path already in use: {path}")]
    SocketInUse { path: String },

    /// Socket path parent directory does not exist.
    #[error("Socket path parent directory does not exist: {path}")]
    SocketPathInvalid { path: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a socket in use error.
    pub fn socket_in_use(path: impl Into<String>) -> Self {
        Self::SocketInUse { path: path.into() }
    }

    /// Creates a socket path invalid error.
    pub fn socket_path_invalid(path: impl Into<String>) -> Self {
        Self::SocketPathInvalid { path: path.into() }
    }

    /// Creates a capacity error.
    pub fn capacity(peer: impl Into<String>, max: usize) -> Self {
        Self::Capacity {
            peer: peer.into(),
            max,
        }
    }
}
