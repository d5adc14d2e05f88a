//! Daemon command.

use tracing::info;

use timecast_server::{Server, SignalHandler};

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Runs the daemon in the foreground until SIGTERM or SIGINT.
pub async fn run(config: &ClientConfig) -> ClientResult<()> {
    let server_config = config.server_config()?;

    // Set up signal handling before binding so an early Ctrl-C is not lost.
    let signals = SignalHandler::new();
    signals.spawn_listener()?;

    let server = Server::bind(server_config).await?;
    info!(
        address = %server.local_addr(),
        pid = std::process::id(),
        "timecast daemon ready"
    );

    server.run_until_shutdown(signals.shutdown().wait()).await?;

    info!("timecast daemon exited");
    Ok(())
}
