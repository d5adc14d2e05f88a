//! Socket client for talking to a timecast daemon over TCP or a Unix socket.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

use timecast_protocol::{
    Codec, CodecKind, DEFAULT_MAX_FRAME_SIZE, DEFAULT_READ_SIZE, Delivery, Request, Response,
    ServerMessage, decode_message, encode_message,
};
use timecast_server::{BindAddress, BoxedReader, BoxedWriter, FrameReader, FrameWriter};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Connection settings for a timecast daemon.
#[derive(Debug, Clone)]
pub struct ServerClient {
    address: BindAddress,
    codec: CodecKind,
    timeout: Duration,
    max_frame_size: usize,
}

impl ServerClient {
    /// Creates a new client.
    pub fn new(address: BindAddress, codec: CodecKind, timeout: Duration) -> Self {
        Self {
            address,
            codec,
            timeout,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Creates a client from the `[server]` configuration section.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        Ok(Self::new(
            config.address()?,
            config.server.codec,
            Duration::from_secs(config.server.timeout),
        )
        .with_max_frame_size(config.server.max_frame_size))
    }

    /// Sets the largest frame body sent or accepted.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Returns the server address.
    pub fn address(&self) -> &BindAddress {
        &self.address
    }

    /// Opens a connection.
    pub async fn connect(&self) -> ClientResult<ClientConnection> {
        debug!(address = %self.address, "connecting to server");

        let (reader, writer) = tokio::time::timeout(self.timeout, self.open_stream())
            .await
            .map_err(|_| {
                ClientError::Connection(format!(
                    "connection timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                ClientError::Connection(format!("failed to connect to {}: {}", self.address, e))
            })?;

        Ok(ClientConnection {
            reader: FrameReader::new(reader, DEFAULT_READ_SIZE, self.max_frame_size),
            writer: FrameWriter::new(writer, self.max_frame_size),
            codec: self.codec.build(),
            timeout: self.timeout,
            pending: VecDeque::new(),
        })
    }

    async fn open_stream(&self) -> std::io::Result<(BoxedReader, BoxedWriter)> {
        match &self.address {
            BindAddress::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                let (r, w) = stream.into_split();
                Ok((Box::new(r), Box::new(w)))
            }
            #[cfg(unix)]
            BindAddress::Unix(path) => {
                let (r, w) = UnixStream::connect(path).await?.into_split();
                Ok((Box::new(r), Box::new(w)))
            }
            #[cfg(not(unix))]
            BindAddress::Unix(_) => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }

    /// Sends a single request on a fresh connection and waits for the answer.
    pub async fn send(&self, request: &Request) -> ClientResult<Response> {
        let mut connection = self.connect().await?;
        connection.request(request).await
    }

    /// Pings the server to check if it's alive.
    pub async fn ping(&self) -> ClientResult<bool> {
        match self.send(&Request::Ping).await {
            Ok(Response::Ping) => Ok(true),
            Ok(_) => Ok(false),
            Err(_) => Ok(false),
        }
    }
}

/// An open connection to the daemon.
///
/// Deliveries that arrive while waiting for a response are kept and handed
/// out by [`ClientConnection::next_delivery`] in arrival order.
pub struct ClientConnection {
    reader: FrameReader<BoxedReader>,
    writer: FrameWriter<BoxedWriter>,
    codec: Arc<dyn Codec>,
    timeout: Duration,
    pending: VecDeque<Delivery>,
}

impl ClientConnection {
    /// Sends a request and waits for its response.
    ///
    /// Error responses are returned as responses; use [`into_success`] to
    /// turn them into errors.
    pub async fn request(&mut self, request: &Request) -> ClientResult<Response> {
        let body = encode_message(self.codec.as_ref(), request)?;
        tokio::time::timeout(self.timeout, self.writer.write_frame(&body))
            .await
            .map_err(|_| ClientError::Timeout("sending request".into()))??;

        debug!(kind = request.kind(), "request sent, waiting for response");

        let timeout = self.timeout;
        tokio::time::timeout(timeout, async {
            loop {
                match self.read_message().await? {
                    Some(ServerMessage::Response(response)) => return Ok(response),
                    Some(ServerMessage::Delivery(delivery)) => self.pending.push_back(delivery),
                    None => {
                        return Err(ClientError::Connection(
                            "server closed the connection".into(),
                        ));
                    }
                }
            }
        })
        .await
        .map_err(|_| ClientError::Timeout("reading response".into()))?
    }

    /// Waits for the next channel delivery.
    ///
    /// Returns `None` once the server closes the connection. Responses
    /// arriving here have no pending request and are skipped.
    pub async fn next_delivery(&mut self) -> ClientResult<Option<Delivery>> {
        if let Some(delivery) = self.pending.pop_front() {
            return Ok(Some(delivery));
        }
        loop {
            match self.read_message().await? {
                Some(ServerMessage::Delivery(delivery)) => return Ok(Some(delivery)),
                Some(ServerMessage::Response(response)) => {
                    debug!(?response, "ignoring unsolicited response");
                }
                None => return Ok(None),
            }
        }
    }

    async fn read_message(&mut self) -> ClientResult<Option<ServerMessage>> {
        let Some(body) = self.reader.read_frame().await? else {
            return Ok(None);
        };
        Ok(Some(decode_message(self.codec.as_ref(), &body)?))
    }
}

/// Converts an error response into [`ClientError::Server`].
pub fn into_success(response: Response) -> ClientResult<Response> {
    match response {
        Response::Error { error } => Err(ClientError::Server(error)),
        other => Ok(other),
    }
}
