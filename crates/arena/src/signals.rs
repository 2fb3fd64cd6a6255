//! Signal handling for graceful shutdown.
//!
//! The first SIGINT/SIGTERM (Ctrl+C on Windows) cancels the root token so
//! every component winds down, draining players if configured. A second
//! signal while that is still in progress forces an immediate stop.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Waits for one termination signal.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("📡 Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("📡 Received SIGTERM");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        info!("📡 Received Ctrl+C");
    }

    Ok(())
}

/// Cancels `cancel` on the first signal and calls `force` on the second.
///
/// Runs until `force` was called; callers abort it once shutdown finished.
pub async fn handle_signals<F>(cancel: CancellationToken, force: F)
where
    F: FnOnce(),
{
    tokio::select! {
        result = wait_for_signal() => {
            if let Err(e) = result {
                warn!("Failed to install signal handlers: {}", e);
                return;
            }
            info!("🛑 Shutting down, send the signal again to stop immediately");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }

    match wait_for_signal().await {
        Ok(()) => {
            warn!("⚡ Second signal received, stopping immediately");
            force();
        }
        Err(e) => warn!("Failed to install signal handlers: {}", e),
    }
}
