//! Shutdown on SIGTERM/SIGINT.
//!
//! Everything here is one latch: [`SignalHandler`] trips it when the process
//! is signalled, a [`ShutdownHandle`] trips it from code, and a
//! [`ShutdownSignal`] is the future the accept loop waits on. Once tripped
//! it stays tripped.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Trips the shutdown latch on SIGTERM or SIGINT (Ctrl+C elsewhere).
#[derive(Debug, Default)]
pub struct SignalHandler {
    latch: ShutdownHandle,
}

impl SignalHandler {
    /// Creates a handler with an untripped latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the signal handlers and spawns the listener task.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn spawn_listener(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let latch = self.latch.clone();

        tokio::spawn(async move {
            let received = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            info!(signal = received, "Shutting down");
            latch.trigger();
        });
        Ok(())
    }

    /// Installs a Ctrl+C listener.
    #[cfg(not(unix))]
    pub fn spawn_listener(&self) -> std::io::Result<()> {
        let latch = self.latch.clone();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(signal = "ctrl-c", "Shutting down");
                latch.trigger();
            }
        });
        Ok(())
    }

    /// Future that completes once the latch is tripped.
    pub fn shutdown(&self) -> ShutdownSignal {
        self.latch.signal()
    }

    /// Handle for tripping the latch without a signal.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.latch.clone()
    }
}

/// Clonable handle on the shutdown latch.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl ShutdownHandle {
    /// Trips the latch.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the latch has been tripped.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Future that completes once the latch is tripped.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Completes when shutdown is triggered.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Waits for the latch.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}
