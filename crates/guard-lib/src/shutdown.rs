//! Process-wide shutdown signal

use tokio::sync::watch;

/// Receiving side of the shutdown signal, cloned into every long-running task
pub type ShutdownSignal = watch::Receiver<bool>;

/// Create the shutdown channel; send `true` to stop everything
pub fn channel() -> (watch::Sender<bool>, ShutdownSignal) {
    watch::channel(false)
}

/// True once shutdown has been requested
pub fn is_requested(signal: &ShutdownSignal) -> bool {
    *signal.borrow()
}

/// Resolve once shutdown has been requested or the sender is gone
pub async fn requested(signal: &mut ShutdownSignal) {
    let _ = signal.wait_for(|stop| *stop).await;
}
