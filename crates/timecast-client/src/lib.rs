//! CLI, socket client, daemon bootstrap
//!
//! This crate provides the `timecast` command-line interface: it runs the
//! daemon and talks to a running one.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod socket;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
pub use socket::{ClientConnection, ServerClient};
