// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use parking_lot::Mutex;
use tokio::task::JoinHandle;

type CancelFn = Box<dyn FnOnce() + Send>;

/// Cancellation capability for one materialized subscription.
///
/// `cancel` runs the teardown at most once; further calls are no-ops.
/// Dropping the handle cancels it.
pub struct SubscriptionHandle {
    cancel: Mutex<Option<CancelFn>>,
}

impl SubscriptionHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Handle with nothing to tear down.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    /// Handle that aborts a spawned task (poll loops).
    #[must_use]
    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self::new(move || task.abort())
    }

    pub fn cancel(&self) {
        let teardown = self.cancel.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_none()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_cancel_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let handle = SubscriptionHandle::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!handle.is_cancelled());
        handle.cancel();
        handle.cancel();
        drop(handle);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_cancels() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        drop(SubscriptionHandle::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_noop_starts_cancelled() {
        assert!(SubscriptionHandle::noop().is_cancelled());
    }

    #[tokio::test]
    async fn test_from_task_aborts() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            let _ = tx.send(());
        });
        let handle = SubscriptionHandle::from_task(task);
        handle.cancel();
        // sender is dropped with the aborted task, never sent
        assert!(rx.await.is_err());
    }
}
