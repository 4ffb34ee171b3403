//! Process-wide shutdown coordination
//!
//! A single broadcast primitive observed cooperatively: the engine checks it
//! at leg boundaries and the retry policy checks it during backoff sleeps.
//! No call is abandoned mid-RPC.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Broadcasts a one-way shutdown signal to every component holding a clone
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownCoordinator {
    /// Create a coordinator in the running (not shutting down) state
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal a critical failure and begin shutdown. Idempotent.
    pub fn signal_critical(&self, reason: &str) {
        if *self.rx.borrow() {
            return;
        }
        error!(reason = %reason, "Critical failure, signaling shutdown");
        // Send only fails when every receiver is dropped, at which point
        // nobody is left to observe the signal anyway.
        let _ = self.tx.send(true);
    }

    /// Request an orderly stop without a failure reason
    pub fn signal_stop(&self) {
        if *self.rx.borrow() {
            return;
        }
        info!("Shutdown requested");
        let _ = self.tx.send(true);
    }

    /// Whether shutdown has been signaled
    pub fn is_shutting_down(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is signaled; usable inside `tokio::select!`
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // Receiver outlives the sender only after signal, so a closed
        // channel also means shutdown.
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_and_observe() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutting_down());

        coordinator.signal_critical("daemon unreachable");
        assert!(coordinator.is_shutting_down());

        // Idempotent
        coordinator.signal_critical("again");
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_clones_observe_signal() {
        let coordinator = ShutdownCoordinator::new();
        let observer = coordinator.clone();

        coordinator.signal_stop();
        assert!(observer.is_shutting_down());
    }

    #[tokio::test]
    async fn test_wait_resolves_on_signal() {
        let coordinator = ShutdownCoordinator::new();
        let observer = coordinator.clone();

        let waiter = tokio::spawn(async move { observer.wait().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.signal_critical("test");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait() did not resolve after signal")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_resolves_immediately_when_already_signaled() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.signal_stop();
        tokio::time::timeout(Duration::from_millis(100), coordinator.wait())
            .await
            .expect("wait() should resolve immediately");
    }
}
