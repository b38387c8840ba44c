//! Cooperative shutdown signaling shared across runtime tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Cloneable shutdown token. Once triggered it stays triggered; waiters are
/// woken through the embedded [`Notify`] so idle pollers react immediately
/// instead of finishing their sleep.
#[derive(Clone, Default)]
pub struct Shutdown {
    triggered: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, returning early (true) when shutdown fires.
    pub async fn sleep_interruptible(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_triggered(),
            _ = self.notify.notified() => true,
        }
    }

    /// Wait until shutdown is triggered.
    ///
    /// `notify_waiters` only reaches futures that were already polled, so a
    /// trigger can slip in between the flag check and the first poll. The
    /// bounded wait turns that race into a short delay instead of a hang.
    pub async fn wait(&self) {
        while !self.is_triggered() {
            let _ = tokio::time::timeout(Duration::from_millis(250), self.notify.notified()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_sleepers() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();

        let handle =
            tokio::spawn(async move { waiter.sleep_interruptible(Duration::from_secs(60)).await });
        tokio::task::yield_now().await;
        shutdown.trigger();

        assert!(tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap());
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn untriggered_sleep_completes() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.sleep_interruptible(Duration::from_millis(5)).await);
    }
}
