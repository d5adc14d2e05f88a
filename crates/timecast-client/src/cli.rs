//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use timecast_protocol::CodecKind;

use crate::config::ClientConfig;

/// timecast - scheduled payload delivery and channel pub/sub
#[derive(Debug, Parser)]
#[command(name = "timecast")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "TIMECAST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Server address (`host:port` or `unix:/path`)
    #[arg(long, short, env = "TIMECAST_ADDRESS", global = true)]
    pub address: Option<String>,

    /// Body codec (json or cbor)
    #[arg(long, global = true)]
    pub codec: Option<CodecKind>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Applies global flags on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut ClientConfig) {
        if let Some(ref address) = self.address {
            config.server.address = address.clone();
        }
        if let Some(codec) = self.codec {
            config.server.codec = codec;
        }
        if let Some(timeout) = self.timeout {
            config.server.timeout = timeout;
        }
    }
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground
    Serve(ServeArgs),

    /// Show server identity and statistics
    Info,

    /// Check that the server answers
    Ping,

    /// Publish a payload to a channel's current subscribers
    Publish {
        /// Channel name
        channel: String,

        /// Payload as a JSON object
        #[arg(default_value = "{}")]
        payload: String,
    },

    /// Schedule a payload for delivery at a given time
    Schedule {
        /// Channel name
        channel: String,

        /// Payload as a JSON object
        #[arg(default_value = "{}")]
        payload: String,

        /// Fire time: UNIX seconds, RFC 3339, or a naive datetime in the server's timezone
        #[arg(long, conflicts_with = "delay", required_unless_present = "delay")]
        at: Option<String>,

        /// Fire this many seconds from now
        #[arg(long = "in", value_name = "SECONDS")]
        delay: Option<f64>,
    },

    /// Subscribe to channels and print deliveries
    Listen {
        /// Channels to subscribe to
        #[arg(required = true)]
        channels: Vec<String>,

        /// Exit after this many deliveries
        #[arg(long, short = 'n')]
        count: Option<usize>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Daemon flags.
#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Maximum concurrent clients
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// IANA timezone naive fire times are read in
    #[arg(long)]
    pub timezone: Option<String>,

    /// Bytes requested per socket read
    #[arg(long)]
    pub read_size: Option<usize>,

    /// Largest frame body accepted
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Refuse to start if the Unix socket path exists
    #[arg(long)]
    pub keep_stale_socket: bool,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log format (pretty, compact, json)
    #[arg(long)]
    pub log_format: Option<String>,
}

impl ServeArgs {
    /// Applies daemon flags on top of the loaded configuration.
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(max) = self.max_clients {
            config.server.max_clients = max;
        }
        if let Some(ref tz) = self.timezone {
            config.server.timezone = tz.clone();
        }
        if let Some(size) = self.read_size {
            config.server.read_size = size;
        }
        if let Some(size) = self.max_frame_size {
            config.server.max_frame_size = size;
        }
        if self.keep_stale_socket {
            config.server.cleanup_stale_socket = false;
        }
        if let Some(ref file) = self.log_file {
            config.logging.file = Some(file.clone());
        }
        if let Some(ref format) = self.log_format {
            config.logging.format = format.clone();
        }
    }
}

/// Configuration management actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump the effective configuration
    Dump,
    /// Validate the configuration
    Validate,
    /// Show the configuration file path
    Path,
}
