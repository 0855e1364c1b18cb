//! Graceful shutdown trigger for the HTTP server.

use std::future::Future;

/// Resolve once `signal` fires.
///
/// If the listener cannot be installed the future never resolves, so the
/// server keeps running until the process is killed.
pub async fn wait_for(signal: impl Future<Output = std::io::Result<()>>) {
    match signal.await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "cannot listen for shutdown signal; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
