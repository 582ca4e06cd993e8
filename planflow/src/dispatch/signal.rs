//! Per-plan abort signal.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Cooperative abort flag for one plan execution.
///
/// Setting it is idempotent; the first reason is kept. Steps may poll
/// [`AbortSignal::is_aborted`] or await [`AbortSignal::aborted`].
#[derive(Default)]
pub struct AbortSignal {
    aborted: AtomicBool,
    reason: RwLock<Option<String>>,
    notify: Notify,
}

impl AbortSignal {
    /// Creates a signal that is not set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal. Returns false if it was already set.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        if self
            .aborted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        *self.reason.write() = Some(reason.into());
        self.notify.notify_waiters();
        true
    }

    /// Returns true once the signal is set.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// The reason given by the first abort.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Resolves once the signal is set.
    pub async fn aborted(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let signal = AbortSignal::new();
        assert!(!signal.is_aborted());
        assert!(signal.abort("user"));
        assert!(!signal.abort("timeout"));
        assert!(signal.is_aborted());
        assert_eq!(signal.reason().as_deref(), Some("user"));
    }

    #[tokio::test]
    async fn test_aborted_wakes_waiters() {
        let signal = Arc::new(AbortSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.aborted().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.abort("stop");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_aborted_returns_when_already_set() {
        let signal = AbortSignal::new();
        signal.abort("stop");
        tokio::time::timeout(Duration::from_millis(100), signal.aborted())
            .await
            .unwrap();
    }
}
