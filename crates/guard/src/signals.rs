//! OS signal handling

use guard_lib::observability::StructuredLogger;
use std::future::Future;
use tokio::sync::watch;
use tracing::warn;

/// Wait for SIGTERM or SIGINT, returning which one arrived
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigterm.recv() => Ok("SIGTERM received"),
            result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("SIGINT received")
    }
}

/// Request shutdown once `signal` resolves
///
/// Shutdown is also requested when listening for signals fails.
pub async fn forward_shutdown<F>(
    signal: F,
    shutdown: watch::Sender<bool>,
    logger: StructuredLogger,
) where
    F: Future<Output = std::io::Result<&'static str>>,
{
    match signal.await {
        Ok(reason) => logger.log_shutdown(reason),
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signals");
            logger.log_shutdown("signal listener failed");
        }
    }
    let _ = shutdown.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_lib::shutdown;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_requests_shutdown() {
        let (tx, mut rx) = shutdown::channel();
        let logger = StructuredLogger::new("test");

        forward_shutdown(async { Ok("SIGTERM received") }, tx, logger).await;

        tokio::time::timeout(Duration::from_secs(1), shutdown::requested(&mut rx))
            .await
            .unwrap();
        assert!(shutdown::is_requested(&rx));
    }

    #[tokio::test]
    async fn test_listener_failure_requests_shutdown() {
        let (tx, rx) = shutdown::channel();
        let logger = StructuredLogger::new("test");
        let failed = async { Err(std::io::Error::new(std::io::ErrorKind::Other, "no signals")) };

        forward_shutdown(failed, tx, logger).await;

        assert!(shutdown::is_requested(&rx));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_signal() {
        let (tx, rx) = shutdown::channel();
        let logger = StructuredLogger::new("test");
        let forwarding = tokio::spawn(forward_shutdown(
            std::future::pending(),
            tx,
            logger,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!shutdown::is_requested(&rx));
        forwarding.abort();
    }
}
