use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use eyre::{Result, WrapErr};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Why the gateway is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested from inside the process
    Requested,
}

/// Turns OS signals into a cancellation every listener observes.
///
/// Listeners hold a child [`CancellationToken`] from [`GracefulShutdown::token`] and stop
/// accepting once it fires; requests already in flight are allowed to finish.
#[derive(Clone)]
pub struct GracefulShutdown {
    token: CancellationToken,
    initiated: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token cancelled when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::Relaxed)
    }

    /// Start shutdown; later calls are ignored.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!("Shutdown initiated: {:?}", reason);
            self.token.cancel();
        } else {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// Wait for SIGINT or SIGTERM (or an in-process trigger) and start shutdown.
    pub async fn run_signal_handler(&self) -> Result<ShutdownReason> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        let reason = tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for SIGINT")?;
                ShutdownReason::Interrupt
            }
            result = wait_for_sigterm() => {
                result?;
                ShutdownReason::Terminate
            }
            _ = self.token.cancelled() => ShutdownReason::Requested,
        };

        if reason != ShutdownReason::Requested {
            self.trigger_shutdown(reason);
        }
        Ok(reason)
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm =
        signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
