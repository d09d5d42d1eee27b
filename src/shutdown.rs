use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::worker::SharedRegistry;

/// Install a shutdown handler that listens for SIGTERM and Ctrl-C.
///
/// Returns a `CancellationToken` that is cancelled when either arrives.
/// The HTTP server and the run registry both watch this token.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            return wait_for_ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down");
        }
        _ = wait_for_ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
        Err(e) => {
            // Never resolve; SIGTERM remains the only way out.
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await
        }
    }
}

/// Stop every tracked worker once `token` is cancelled, so no child
/// outlives the panel.
pub fn stop_runs_on_shutdown(token: CancellationToken, registry: SharedRegistry) -> JoinHandle<()> {
    tokio::spawn(async move {
        token.cancelled().await;
        match registry.write().await.stop_all() {
            Ok(stopped) => tracing::info!(stopped, "Stopping active workers"),
            Err(_) => tracing::debug!("No active workers at shutdown"),
        }
    })
}
