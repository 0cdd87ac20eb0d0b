//! Graceful cancellation on SIGTERM, SIGINT and the run deadline.
//!
//! On cancellation:
//! - queued jobs are dropped and reported as not attempted
//! - running jobs finish their current attempt and stop retrying

use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the run-wide cancellation token
pub struct ShutdownCoordinator {
    cancel_token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
        }
    }

    /// Token handed to the scheduler and executors
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Cancel on SIGINT/SIGTERM and, if set, once `deadline` has elapsed.
    ///
    /// The watcher task ends when the token is cancelled by anyone.
    pub fn spawn_watchers(&self, deadline: Option<Duration>) {
        let token = self.cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_signal() => {}
                _ = wait_for_deadline(deadline) => {
                    warn!("Run timeout reached, cancelling remaining jobs");
                }
                _ = token.cancelled() => return,
            }
            token.cancel();
        });
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), letting running jobs finish their current attempt...");
        }
        _ = terminate => {
            info!("Received SIGTERM, letting running jobs finish their current attempt...");
        }
    }
}

async fn wait_for_deadline(deadline: Option<Duration>) {
    match deadline {
        Some(deadline) => tokio::time::sleep(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_cancels_token() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();
        coordinator.spawn_watchers(Some(Duration::from_millis(10)));

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
        assert!(coordinator.is_cancelled());
    }

    #[tokio::test]
    async fn test_manual_cancel() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.spawn_watchers(None);
        assert!(!coordinator.is_cancelled());

        coordinator.cancel();
        assert!(coordinator.token().is_cancelled());
    }
}
