//! Termination signal handling.
//!
//! SIGTERM and SIGINT trigger graceful shutdown. SIGKILL cannot be
//! intercepted and is deliberately not handled.

/// Blocks until SIGINT (Ctrl+C) or SIGTERM arrives.
///
/// The wait consumes no CPU; the controlling flow parks on the runtime's
/// signal primitives until the operating environment delivers a signal.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
