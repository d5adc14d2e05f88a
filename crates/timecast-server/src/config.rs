//! Server configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;
use timecast_protocol::{CodecKind, DEFAULT_MAX_FRAME_SIZE, DEFAULT_READ_SIZE};

use crate::error::{ServerError, ServerResult};

/// Default TCP bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:9090";

/// Default cap on concurrent sessions.
pub const DEFAULT_MAX_CLIENTS: usize = 512;

/// Default number of messages queued per session before deliveries drop.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAddress {
    /// TCP `host:port`.
    Tcp(String),
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl BindAddress {
    /// Returns the socket path for Unix addresses.
    pub fn socket_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Unix(path) => Some(path),
            Self::Tcp(_) => None,
        }
    }
}

impl Default for BindAddress {
    fn default() -> Self {
        Self::Tcp(DEFAULT_BIND.to_string())
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => f.write_str(addr),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl FromStr for BindAddress {
    type Err = ServerError;

    /// Parses `unix:/path`, a bare absolute path, or `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ServerError::config("unix bind address needs a path"));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if s.starts_with('/') || s.starts_with("./") {
            return Ok(Self::Unix(PathBuf::from(s)));
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(s.to_string()))
            }
            _ => Err(ServerError::config(format!(
                "invalid bind address {s:?} (expected host:port or unix:/path)"
            ))),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: BindAddress,

    /// Bytes requested per socket read.
    pub read_size: usize,

    /// Largest accepted frame body.
    pub max_frame_size: usize,

    /// Maximum concurrent sessions.
    pub max_clients: usize,

    /// Messages a session may have waiting to be written.
    pub outbound_capacity: usize,

    /// Body codec.
    pub codec: CodecKind,

    /// Timezone naive fire times are read in.
    pub timezone: Tz,

    /// Whether to remove a stale Unix socket on startup.
    pub cleanup_stale_socket: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: BindAddress::default(),
            read_size: DEFAULT_READ_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_clients: DEFAULT_MAX_CLIENTS,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            codec: CodecKind::default(),
            timezone: Tz::UTC,
            cleanup_stale_socket: true,
        }
    }
}

impl ServerConfig {
    /// Creates a new server configuration listening on `bind`.
    pub fn new(bind: BindAddress) -> Self {
        Self {
            bind,
            ..Default::default()
        }
    }

    /// Creates a configuration listening on a Unix socket.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::new(BindAddress::Unix(path.into()))
    }

    /// Creates a configuration listening on TCP `host:port`.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::new(BindAddress::Tcp(addr.into()))
    }

    /// Builder: set read chunk size.
    pub fn with_read_size(mut self, size: usize) -> Self {
        self.read_size = size;
        self
    }

    /// Builder: set maximum frame size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Builder: set max clients.
    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    /// Builder: set per-session outbound queue capacity.
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Builder: set codec.
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    /// Builder: set timezone.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Builder: set cleanup stale socket.
    pub fn with_cleanup_stale_socket(mut self, cleanup: bool) -> Self {
        self.cleanup_stale_socket = cleanup;
        self
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> ServerResult<()> {
        if self.read_size == 0 {
            return Err(ServerError::config("read_size must be greater than zero"));
        }
        if self.max_frame_size == 0 {
            return Err(ServerError::config(
                "max_frame_size must be greater than zero",
            ));
        }
        if self.max_frame_size > u32::MAX as usize {
            return Err(ServerError::config(
                "max_frame_size must fit the 4-byte length prefix",
            ));
        }
        if self.max_clients == 0 {
            return Err(ServerError::config("max_clients must be greater than zero"));
        }
        if self.outbound_capacity == 0 {
            return Err(ServerError::config(
                "outbound_capacity must be greater than zero",
            ));
        }
        Ok(())
    }
}
