//! OS signal handling.

use feedrelay_core::ShutdownHandle;
use tracing::{info, warn};

/// Waits for SIGINT or SIGTERM and requests a drain.
#[cfg(unix)]
pub async fn shutdown_on_signal(shutdown: ShutdownHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Ctrl+C handler unavailable");
                return;
            }
            info!("received SIGINT");
        }
    }
    shutdown.request();
}

/// Waits for Ctrl+C and requests a drain.
#[cfg(not(unix))]
pub async fn shutdown_on_signal(shutdown: ShutdownHandle) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received Ctrl+C");
            shutdown.request();
        }
        Err(e) => warn!(error = %e, "Ctrl+C handler unavailable"),
    }
}
