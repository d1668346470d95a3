//! SIGINT/SIGTERM handling.

use tokio_util::sync::CancellationToken;

/// Spawn a task that cancels the returned token on Ctrl+C or SIGTERM
pub fn install_signal_handler() -> CancellationToken {
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
            tracing::warn!(
                error = %e,
                "Failed to install SIGTERM handler, only Ctrl+C will stop the bot"
            );
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            // Without a handler there is nothing to wait for
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
