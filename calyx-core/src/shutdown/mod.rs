//! Graceful shutdown: one broadcast channel, SIGINT/SIGTERM handlers.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Process-wide shutdown coordinator. Components subscribe and select on
/// the receiver next to their main loop.
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        ShutdownCoordinator { shutdown_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast the shutdown signal to every subscriber.
    pub fn shutdown(&self) {
        info!("initiating shutdown");
        let _ = self.shutdown_tx.send(());
    }

    /// Block until shutdown is signalled.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe();
        let _ = rx.recv().await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Translate SIGINT/SIGTERM into a coordinator shutdown.
#[cfg(unix)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        coordinator.shutdown();
    });
}

#[cfg(not(unix))]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C");
        coordinator.shutdown();
    });
}
