use tokio::signal;
use tracing;

async fn interrupt_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

pub async fn shutdown_signal() {
    tokio::select! {
        _ = interrupt_signal() => {
            tracing::info!("Ctrl+C received, shutting down gracefully");
        },
        _ = terminate_signal() => {
            tracing::info!("SIGTERM received, shutting down gracefully");
        },
    }
}
