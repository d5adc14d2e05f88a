//! Connection manager.
//!
//! This module binds the TCP or Unix listener, enforces the client limit and
//! hands each accepted stream to a connection handler task.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::{BindAddress, ServerConfig};
use crate::error::{ServerError, ServerResult};

/// Read half of an accepted stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an accepted stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// Listening socket with a bounded number of live connections.
pub struct SocketServer {
    /// Server configuration.
    config: ServerConfig,
    /// Bound listener.
    listener: Listener,
    /// Address actually bound (resolves port 0).
    local_addr: BindAddress,
    /// Semaphore for limiting concurrent connections.
    connection_semaphore: Arc<Semaphore>,
}

impl SocketServer {
    /// Creates a new socket server with the given configuration.
    ///
    /// For Unix sockets, if `cleanup_stale_socket` is true, an existing
    /// socket file nobody answers on is removed before binding.
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;

        let (listener, local_addr) = match &config.bind {
            BindAddress::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).await?;
                let local = listener.local_addr()?;
                (Listener::Tcp(listener), BindAddress::Tcp(local.to_string()))
            }
            #[cfg(unix)]
            BindAddress::Unix(path) => {
                prepare_socket_path(path, config.cleanup_stale_socket).await?;
                let listener = UnixListener::bind(path)?;
                (Listener::Unix(listener), BindAddress::Unix(path.clone()))
            }
            #[cfg(not(unix))]
            BindAddress::Unix(_) => {
                return Err(ServerError::config(
                    "unix sockets are not supported on this platform",
                ));
            }
        };

        info!(
            address = %local_addr,
            max_clients = config.max_clients,
            "Socket server listening"
        );

        let connection_semaphore = Arc::new(Semaphore::new(config.max_clients));

        Ok(Self {
            config,
            listener,
            local_addr,
            connection_semaphore,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> &BindAddress {
        &self.local_addr
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of connections currently holding a slot.
    pub fn active_connections(&self) -> usize {
        self.config.max_clients - self.connection_semaphore.available_permits()
    }

    /// Accepts a single connection.
    ///
    /// A connection arriving while every slot is taken is closed straight
    /// away and reported as [`ServerError::Capacity`].
    pub async fn accept(&self) -> ServerResult<Connection> {
        let (reader, writer, peer): (BoxedReader, BoxedWriter, String) = match &self.listener {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w), addr.to_string())
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let (stream, _addr) = listener.accept().await?;
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w), "unix".to_string())
            }
        };

        let permit = match self.connection_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                // Dropping both halves closes the stream.
                drop((reader, writer));
                return Err(ServerError::capacity(peer, self.config.max_clients));
            }
        };

        debug!(peer = %peer, "Accepted new connection");

        Ok(Connection {
            reader,
            writer,
            peer,
            _permit: permit,
        })
    }

    /// Runs the server accept loop, calling the handler for each connection.
    ///
    /// This method runs indefinitely; accept errors are logged and the loop
    /// keeps going.
    pub async fn run<F, Fut>(&self, handler: F) -> ServerResult<()>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.accept().await {
                Ok(connection) => {
                    let fut = handler(connection);
                    tokio::spawn(fut);
                }
                Err(ServerError::Capacity { peer, max }) => {
                    warn!(
                        peer = %peer,
                        max_clients = max,
                        "Client limit reached, refusing connection"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Runs the server accept loop with a shutdown signal.
    ///
    /// The server will stop when the shutdown future completes.
    pub async fn run_until_shutdown<F, Fut, S>(&self, handler: F, shutdown: S) -> ServerResult<()>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run(handler) => result,
            _ = shutdown => {
                info!("Shutdown signal received");
                Ok(())
            }
        }
    }
}

#[cfg(unix)]
async fn prepare_socket_path(path: &std::path::Path, cleanup_stale: bool) -> ServerResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        return Err(ServerError::socket_path_invalid(
            parent.to_string_lossy().to_string(),
        ));
    }

    if !path.exists() {
        return Ok(());
    }

    if !cleanup_stale {
        return Err(ServerError::socket_in_use(
            path.to_string_lossy().to_string(),
        ));
    }

    // A live socket means another server owns the path.
    match tokio::net::UnixStream::connect(path).await {
        Ok(_) => Err(ServerError::socket_in_use(
            path.to_string_lossy().to_string(),
        )),
        Err(_) => {
            info!(path = %path.display(), "Removing stale socket");
            std::fs::remove_file(path)?;
            Ok(())
        }
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        let Some(path) = self.local_addr.socket_path() else {
            return;
        };
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            } else {
                debug!(path = %path.display(), "Removed socket file");
            }
        }
    }
}

/// An accepted client connection holding one client slot.
///
/// The slot is released when the connection (or the session that took it
/// apart) is dropped.
pub struct Connection {
    reader: BoxedReader,
    writer: BoxedWriter,
    peer: String,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    /// Peer address, or `unix` for Unix sockets.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Splits the connection into its halves and the slot guard.
    pub fn into_parts(self) -> (BoxedReader, BoxedWriter, ConnectionSlot) {
        (
            self.reader,
            self.writer,
            ConnectionSlot {
                peer: self.peer,
                _permit: self._permit,
            },
        )
    }
}

/// Keeps a client slot occupied while alive.
pub struct ConnectionSlot {
    peer: String,
    _permit: OwnedSemaphorePermit,
}

impl ConnectionSlot {
    /// Peer address the slot belongs to.
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[cfg(unix)]
    #[tokio::test]
    async fn socket_server_creates_socket_file() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let server = SocketServer::new(ServerConfig::unix(&socket_path))
            .await
            .unwrap();

        assert!(socket_path.exists());
        drop(server);
        assert!(!socket_path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn socket_server_rejects_duplicate() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let config = ServerConfig::unix(&socket_path).with_cleanup_stale_socket(false);
        let _server = SocketServer::new(config.clone()).await.unwrap();

        let result = SocketServer::new(config.with_cleanup_stale_socket(true)).await;
        assert!(matches!(result, Err(ServerError::SocketInUse { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn socket_server_cleans_stale_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        std::fs::write(&socket_path, b"stale").unwrap();

        let config = ServerConfig::unix(&socket_path).with_cleanup_stale_socket(true);
        let server = SocketServer::new(config).await.unwrap();

        assert!(socket_path.exists());
        drop(server);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn socket_server_rejects_missing_parent() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("missing").join("test.sock");

        let result = SocketServer::new(ServerConfig::unix(&socket_path)).await;
        assert!(matches!(result, Err(ServerError::SocketPathInvalid { .. })));
    }

    #[tokio::test]
    async fn tcp_port_zero_reports_bound_port() {
        let server = SocketServer::new(ServerConfig::tcp("127.0.0.1:0"))
            .await
            .unwrap();
        match server.local_addr() {
            BindAddress::Tcp(addr) => assert!(!addr.ends_with(":0")),
            other => panic!("unexpected address: {other}"),
        }
    }

    #[tokio::test]
    async fn connection_over_limit_is_refused() {
        let server = SocketServer::new(ServerConfig::tcp("127.0.0.1:0").with_max_clients(1))
            .await
            .unwrap();
        let BindAddress::Tcp(addr) = server.local_addr().clone() else {
            panic!("expected tcp address");
        };

        let _first = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let held = server.accept().await.unwrap();
        assert_eq!(server.active_connections(), 1);

        let mut second = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let refused = server.accept().await;
        assert!(matches!(refused, Err(ServerError::Capacity { max: 1, .. })));

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), second.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));

        drop(held);
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn connection_halves_carry_bytes() {
        let server = SocketServer::new(ServerConfig::tcp("127.0.0.1:0"))
            .await
            .unwrap();
        let BindAddress::Tcp(addr) = server.local_addr().clone() else {
            panic!("expected tcp address");
        };

        let mut client = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let conn = server.accept().await.unwrap();
        assert!(conn.peer().starts_with("127.0.0.1:"));

        let (mut reader, mut writer, slot) = conn.into_parts();
        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        writer.write_all(b"yo").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"yo");
        assert!(slot.peer().starts_with("127.0.0.1:"));
    }
}
