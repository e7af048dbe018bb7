use anyhow::Result;
use tokio_util::sync::CancellationToken;

/// Waits for SIGINT or SIGTERM and cancels `token`.
#[cfg(unix)]
pub async fn cancel_on_signal(token: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
        _ = token.cancelled() => return Ok(()),
    }
    token.cancel();
    Ok(())
}

/// Waits for Ctrl+C and cancels `token`.
#[cfg(not(unix))]
pub async fn cancel_on_signal(token: CancellationToken) -> Result<()> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = token.cancelled() => return Ok(()),
    }
    token.cancel();
    Ok(())
}
