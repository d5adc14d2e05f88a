//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/timecast/config.toml` by default:
//!
//! ```toml
//! [server]
//! address = "127.0.0.1:9090"
//! codec = "json"
//! timezone = "Europe/Paris"
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! file = "/var/log/timecast.log"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use timecast_core::{TracingConfig, TracingOutputFormat, parse_timezone};
use timecast_protocol::{CodecKind, DEFAULT_MAX_FRAME_SIZE, DEFAULT_READ_SIZE};
use timecast_server::{
    BindAddress, DEFAULT_BIND, DEFAULT_MAX_CLIENTS, DEFAULT_OUTBOUND_CAPACITY, ServerConfig,
};

use crate::error::{ClientError, ClientResult};

/// Configuration shared by the daemon and the client commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server/connection settings.
    pub server: ServerSettings,

    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Server/connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// `host:port` or `unix:/path`. The daemon binds it, commands connect to it.
    pub address: String,

    /// Body codec.
    pub codec: CodecKind,

    /// Request timeout in seconds.
    pub timeout: u64,

    /// Maximum concurrent clients.
    pub max_clients: usize,

    /// Bytes requested per socket read.
    pub read_size: usize,

    /// Largest frame body accepted.
    pub max_frame_size: usize,

    /// Messages queued per session before deliveries to it are dropped.
    pub outbound_capacity: usize,

    /// IANA timezone naive fire times are read in.
    pub timezone: String,

    /// Remove a stale Unix socket on startup.
    pub cleanup_stale_socket: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_BIND.to_string(),
            codec: CodecKind::default(),
            timeout: 5,
            max_clients: DEFAULT_MAX_CLIENTS,
            read_size: DEFAULT_READ_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            timezone: "UTC".to_string(),
            cleanup_stale_socket: true,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level when RUST_LOG is not set.
    pub level: String,

    /// `pretty`, `compact` or `json`.
    pub format: String,

    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            file: None,
        }
    }
}

impl LoggingSettings {
    /// Builds the tracing configuration for the daemon.
    pub fn tracing_config(&self) -> ClientResult<TracingConfig> {
        let level = self
            .level
            .parse::<tracing::Level>()
            .map_err(|_| ClientError::config(format!("unknown log level: {}", self.level)))?;
        let format = self
            .format
            .parse::<TracingOutputFormat>()
            .map_err(ClientError::Config)?;

        let mut config = TracingConfig::daemon().with_level(level).with_format(format);
        if let Some(ref file) = self.file {
            config = config.with_log_file(file);
        }
        Ok(config)
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parses TOML configuration text.
    pub fn parse(content: &str) -> ClientResult<Self> {
        toml::from_str(content)
            .map_err(|e| ClientError::config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("timecast")
    }

    /// Parsed server address.
    pub fn address(&self) -> ClientResult<BindAddress> {
        self.server
            .address
            .parse()
            .map_err(|e: timecast_server::ServerError| ClientError::config(e.to_string()))
    }

    /// Builds the daemon configuration.
    pub fn server_config(&self) -> ClientResult<ServerConfig> {
        let timezone =
            parse_timezone(&self.server.timezone).map_err(|e| ClientError::config(e.to_string()))?;

        let config = ServerConfig::new(self.address()?)
            .with_codec(self.server.codec)
            .with_max_clients(self.server.max_clients)
            .with_read_size(self.server.read_size)
            .with_max_frame_size(self.server.max_frame_size)
            .with_outbound_capacity(self.server.outbound_capacity)
            .with_timezone(timezone)
            .with_cleanup_stale_socket(self.server.cleanup_stale_socket);
        config
            .validate()
            .map_err(|e| ClientError::config(e.to_string()))?;
        Ok(config)
    }
}
