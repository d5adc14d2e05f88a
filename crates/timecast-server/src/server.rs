//! Daemon bootstrap.
//!
//! [`Server`] binds the listener, builds the shared state and runs the
//! accept loop next to the scheduler loop until shutdown.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::{BindAddress, ServerConfig};
use crate::error::ServerResult;
use crate::handler::{ServerState, SharedState};
use crate::session::{SessionLimits, make_connection_handler};
use crate::socket::SocketServer;

/// A bound, not yet running, timecast server.
pub struct Server {
    socket: SocketServer,
    state: SharedState,
    limits: SessionLimits,
}

impl Server {
    /// Binds the listener described by `config`.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        let socket = SocketServer::new(config).await?;
        let config = socket.config();

        let state = Arc::new(
            ServerState::new(
                socket.local_addr().clone(),
                config.max_clients,
                config.timezone,
                config.codec.build(),
            )
            .with_max_frame_size(config.max_frame_size),
        );
        let limits = SessionLimits {
            read_size: config.read_size,
            max_frame_size: config.max_frame_size,
            outbound_capacity: config.outbound_capacity,
        };

        Ok(Self {
            socket,
            state,
            limits,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> &BindAddress {
        self.socket.local_addr()
    }

    /// Shared state, for inspection.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Serves clients until `shutdown` completes.
    ///
    /// The scheduler stops with the accept loop; pending time events are
    /// discarded. Sessions still open are left to finish on their own.
    pub async fn run_until_shutdown<S>(self, shutdown: S) -> ServerResult<()>
    where
        S: Future<Output = ()> + Send,
    {
        let (stop_scheduler, stopped) = oneshot::channel::<()>();
        let scheduler = self.state.scheduler().clone();
        let scheduler_task = tokio::spawn(async move {
            scheduler
                .run(async move {
                    let _ = stopped.await;
                })
                .await
        });

        info!(
            address = %self.socket.local_addr(),
            codec = self.state.codec().name(),
            timezone = %self.state.timezone(),
            "Server started"
        );

        let handler = make_connection_handler(self.state.clone(), self.limits);
        let result = self.socket.run_until_shutdown(handler, shutdown).await;

        let _ = stop_scheduler.send(());
        if let Err(e) = scheduler_task.await {
            warn!(error = %e, "Scheduler task failed");
        }

        info!("Server stopped");
        result
    }
}
