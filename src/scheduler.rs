//! Timer service: cancellable one-shot timers keyed by name, plus periodic
//! jobs. Orders and holds key their expiry timers by id so a confirm can
//! cancel the pending expiry. On restart, pending order timers are
//! rehydrated by the engine from non-terminal store rows.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::core_types::{OrderId, TimestampMs, now_ms};

/// Timer key for an order's broadcast expiry.
pub fn order_expiry_key(order_id: OrderId) -> String {
    format!("order:expiry:{order_id}")
}

#[derive(Default)]
pub struct Scheduler {
    /// Shared with timer tasks so a fired timer can remove itself.
    timers: Arc<DashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run `task` at `when_ms` (wall clock). Re-scheduling an existing key
    /// replaces (and cancels) the previous timer.
    pub fn schedule_at<F>(&self, key: impl Into<String>, when_ms: TimestampMs, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let timers = Arc::clone(&self.timers);
        let cleanup_key = key.clone();
        let handle = tokio::spawn(async move {
            let delay = (when_ms - now_ms()).max(0) as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            task.await;
            timers.remove(&cleanup_key);
        });
        if let Some(old) = self.timers.insert(key, handle) {
            old.abort();
        }
    }

    /// Cancel a pending timer. Returns whether one existed.
    pub fn cancel(&self, key: &str) -> bool {
        match self.timers.remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Spawn a repeating job. The first run happens after one full period.
    pub fn spawn_periodic<F, Fut>(&self, key: impl Into<String>, every: Duration, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                job().await;
            }
        });
        if let Some(old) = self.timers.insert(key.into(), handle) {
            old.abort();
        }
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Abort every pending timer and periodic job.
    pub fn shutdown(&self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
        self.timers.clear();
        tracing::info!("scheduler stopped, all timers cancelled");
    }
}
