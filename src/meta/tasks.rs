//! Tracking of in-flight persistence work
//!
//! Every coordination store call and every submitted update holds a
//! [`TaskGuard`] until it completes. [`PendingTasks::wait_all`] resolves once
//! the count drops to zero.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct PendingTasks {
    count: Arc<watch::Sender<usize>>,
}

/// Marks one task as outstanding until dropped.
pub struct TaskGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Default for PendingTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTasks {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0usize);
        Self {
            count: Arc::new(tx),
        }
    }

    pub fn begin(&self) -> TaskGuard {
        self.count.send_modify(|n| *n += 1);
        TaskGuard {
            count: self.count.clone(),
        }
    }

    pub fn outstanding(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until no task is outstanding.
    pub async fn wait_all(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in self, so the channel cannot close under us.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}
