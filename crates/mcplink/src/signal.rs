//! Translate termination signals into cancellation of the active cycle.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Spawn a task that cancels `cancel` on SIGINT or SIGTERM.
///
/// SIGTERM matters for container platforms that never send an interrupt.
pub fn spawn_listener(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("received shutdown signal");
        cancel.cancel();
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let interrupt = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                result = interrupt => {
                    if let Err(e) = result {
                        error!(error = %e, "failed to listen for interrupt");
                    }
                }
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            if let Err(e) = interrupt.await {
                error!(error = %e, "failed to listen for interrupt");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for interrupt");
    }
}
