//! Daemon: connection manager, sessions, channel broker, time-event scheduler.
//!
//! This crate provides the timecast server that handles:
//! - TCP or Unix socket listening with a cap on concurrent clients
//! - Length-prefixed frames decoded with the configured codec
//! - Channel subscriptions with immediate fan-out on publish
//! - Payloads scheduled for delivery at a given time
//!
//! # Example
//!
//! ```rust,no_run
//! use timecast_server::{Server, ServerConfig, SignalHandler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let signals = SignalHandler::new();
//!     signals.spawn_listener()?;
//!
//!     let server = Server::bind(ServerConfig::tcp("127.0.0.1:9090")).await?;
//!     server.run_until_shutdown(signals.shutdown().wait()).await?;
//!     Ok(())
//! }
//! ```

mod broker;
mod config;
mod error;
mod handler;
mod scheduler;
mod server;
mod session;
mod signals;
mod socket;
mod transport;

pub use broker::{ChannelBroker, DeliveryReceiver, DeliverySender, SessionId};
pub use config::{
    BindAddress, DEFAULT_BIND, DEFAULT_MAX_CLIENTS, DEFAULT_OUTBOUND_CAPACITY, ServerConfig,
};
pub use error::{ServerError, ServerResult};
pub use handler::{RequestHandler, ServerState, SessionContext, SharedState};
pub use scheduler::{TimeEvent, TimeEventScheduler};
pub use server::Server;
pub use session::{Session, SessionLimits, make_connection_handler};
pub use signals::{ShutdownHandle, ShutdownSignal, SignalHandler};
pub use socket::{BoxedReader, BoxedWriter, Connection, ConnectionSlot, SocketServer};
pub use transport::{FrameReader, FrameWriter};
