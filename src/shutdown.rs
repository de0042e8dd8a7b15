//! Broadcast shutdown signal shared by every recorder task.

use std::sync::Arc;

use tokio::sync::watch;

/// Creates a connected trigger/listener pair.
pub fn channel() -> (ShutdownTrigger, ShutdownListener) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(Arc::new(tx)), ShutdownListener(rx))
}

/// Fires the shutdown signal. Cloning shares the same signal.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger(Arc<watch::Sender<bool>>);

impl ShutdownTrigger {
    /// Fires the signal. Firing again is a no-op.
    pub fn fire(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener(self.0.subscribe())
    }
}

/// Observes the shutdown signal. Cheap to clone, one per task.
#[derive(Debug, Clone)]
pub struct ShutdownListener(watch::Receiver<bool>);

impl ShutdownListener {
    /// Resolves once the signal has fired, immediately if it already has.
    ///
    /// Dropping every [`ShutdownTrigger`] also resolves it.
    pub async fn fired(&mut self) {
        let _ = self.0.wait_for(|fired| *fired).await;
    }
}
