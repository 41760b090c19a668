//! Graceful Shutdown Module
//!
//! Waits for SIGINT/SIGTERM, broadcasts the stop signal to every relay loop
//! and gives them a bounded time to finish their current pass.

use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// Maximum time to wait for the loops to stop
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Reason for shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGTERM signal received
    SigTerm,
    /// SIGINT signal received (Ctrl+C)
    SigInt,
    Unknown,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::SigTerm => write!(f, "SIGTERM"),
            ShutdownReason::SigInt => write!(f, "SIGINT (Ctrl+C)"),
            ShutdownReason::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Resolves on the first SIGINT or SIGTERM.
pub async fn wait_for_signal() -> ShutdownReason {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => ShutdownReason::SigInt,
            Err(e) => {
                tracing::error!("Failed to register ctrl-c handler: {}", e);
                std::future::pending::<ShutdownReason>().await
            }
        }
    };

    #[cfg(unix)]
    let term = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                ShutdownReason::SigTerm
            }
            Err(e) => {
                tracing::error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<ShutdownReason>().await
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<ShutdownReason>();

    tokio::select! {
        reason = ctrl_c => reason,
        reason = term => reason,
    }
}

/// Broadcasts the stop signal and waits for every task, up to `limit`.
///
/// Returns `false` when the deadline passed first.
pub async fn drain(
    shutdown_tx: &broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    limit: Duration,
) -> bool {
    // No receivers left just means every loop already exited.
    let _ = shutdown_tx.send(());

    let joined = timeout(limit, async {
        for (name, task) in tasks {
            match task.await {
                Ok(()) => info!(component = name, "Component stopped"),
                Err(e) => warn!(component = name, error = %e, "Component task failed"),
            }
        }
    })
    .await;

    match joined {
        Ok(()) => {
            info!("All components shut down gracefully");
            true
        }
        Err(_) => {
            warn!("Shutdown sequence timed out after {:?}", limit);
            false
        }
    }
}
