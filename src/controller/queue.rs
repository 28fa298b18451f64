//! Serialized reload queue.
//!
//! Reload triggers arrive from arbitrary execution contexts (setter
//! calls, the PAC file watcher, fetch completions) and must feed exactly
//! one worker: at most one reconciliation pass runs at a time, and at
//! most one pending trigger is held while a pass is in flight. A second
//! pending trigger coalesces into the stronger of the two rather than
//! queueing indefinitely.

use std::sync::Mutex;

use tokio::sync::Notify;

/// What kind of reconciliation pass to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReloadTrigger {
    /// Full pass: tear down, persist, rebuild, reconcile.
    Reconfigure,
    /// The PAC document changed on disk; only the system-proxy setting
    /// needs reconciling, running services are left alone.
    PacDocumentChanged,
}

impl ReloadTrigger {
    /// A full reload subsumes a document refresh.
    fn merge(self, other: ReloadTrigger) -> ReloadTrigger {
        if self == ReloadTrigger::Reconfigure || other == ReloadTrigger::Reconfigure {
            ReloadTrigger::Reconfigure
        } else {
            ReloadTrigger::PacDocumentChanged
        }
    }
}

/// Mutex-guarded coalescing slot plus a wakeup for the worker.
pub(crate) struct ReloadQueue {
    pending: Mutex<Option<ReloadTrigger>>,
    notify: Notify,
}

impl ReloadQueue {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Record a trigger, merging with any pending one.
    pub(crate) fn push(&self, trigger: ReloadTrigger) {
        let mut pending = self.pending.lock().unwrap();
        *pending = Some(match pending.take() {
            Some(existing) => existing.merge(trigger),
            None => trigger,
        });
        drop(pending);
        self.notify.notify_one();
    }

    /// Wait for the next trigger.
    pub(crate) async fn next(&self) -> ReloadTrigger {
        loop {
            // Register for a wakeup before checking, so a push landing
            // between the check and the await is not lost.
            let notified = self.notify.notified();
            if let Some(trigger) = self.pending.lock().unwrap().take() {
                return trigger;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_triggers_coalesce() {
        let queue = ReloadQueue::new();
        queue.push(ReloadTrigger::PacDocumentChanged);
        queue.push(ReloadTrigger::Reconfigure);
        queue.push(ReloadTrigger::PacDocumentChanged);

        // Three pushes, one pending trigger, and the full reload wins.
        assert_eq!(queue.next().await, ReloadTrigger::Reconfigure);
        assert!(queue.pending.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_wakes_waiter() {
        let queue = std::sync::Arc::new(ReloadQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.push(ReloadTrigger::Reconfigure);
        assert_eq!(waiter.await.unwrap(), ReloadTrigger::Reconfigure);
    }
}
