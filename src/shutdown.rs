use std::time::Duration;
use tokio::sync::watch;

/// Process-wide shutdown signal.
///
/// Retry sleeps and loop waits select against this so an in-flight exchange
/// call can complete but no new waiting starts after shutdown is requested.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Shutdown {
    pub fn new() -> (ShutdownHandle, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx }, Shutdown { rx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `dur`, returning false if shutdown interrupted the sleep
    pub async fn sleep(&self, dur: Duration) -> bool {
        let mut rx = self.rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(dur) => true,
            _ = rx.wait_for(|stop| *stop) => false,
        }
    }

    /// Wait until shutdown is triggered
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // sender dropped counts as shutdown too
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_completes_without_trigger() {
        let (_handle, shutdown) = Shutdown::new();
        assert!(shutdown.sleep(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_trigger_interrupts_sleep() {
        let (handle, shutdown) = Shutdown::new();
        handle.trigger();
        assert!(!shutdown.sleep(Duration::from_secs(60)).await);
        assert!(shutdown.is_triggered());
    }
}
