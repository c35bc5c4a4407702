//! Named distributed locks with owner tokens, built on the cache's SETNX.
//!
//! Locks self-heal by TTL; release is owner-checked so a caller can never
//! drop somebody else's lock. The batch acquire used by the hold path takes
//! its keys in ascending request-number order, which is what prevents
//! deadlock between transporters grabbing overlapping subsets.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheStore;
use crate::core_types::{TruckRequestId, UserId};
use crate::error::DispatchResult;

/// Key of the per-truck reservation lock.
pub fn truck_lock_key(id: TruckRequestId) -> String {
    format!("lock:truck:{id}")
}

/// Key of the per-customer create-order lock.
pub fn create_lock_key(customer_id: UserId) -> String {
    format!("order:create:{customer_id}")
}

pub struct LockManager {
    cache: Arc<dyn CacheStore>,
}

impl LockManager {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    /// Try to take a single named lock. Returns whether we own it now.
    pub async fn acquire(&self, name: &str, owner: &str, ttl: Duration) -> DispatchResult<bool> {
        self.cache.set_nx(name, owner, ttl).await
    }

    /// Owner-checked release. Returns whether the lock was actually held by
    /// `owner` and removed.
    pub async fn release(&self, name: &str, owner: &str) -> DispatchResult<bool> {
        self.cache.delete_if_value(name, owner).await
    }

    /// All-or-nothing acquisition of a pre-sorted batch. On the first
    /// failure every lock taken so far is released and `false` is returned;
    /// the caller has written nothing yet, so losers pay no store cost.
    pub async fn acquire_many(
        &self,
        names: &[String],
        owner: &str,
        ttl: Duration,
    ) -> DispatchResult<bool> {
        let mut taken: Vec<&String> = Vec::with_capacity(names.len());
        for name in names {
            match self.acquire(name, owner, ttl).await {
                Ok(true) => taken.push(name),
                Ok(false) => {
                    for t in taken {
                        let _ = self.release(t, owner).await;
                    }
                    return Ok(false);
                }
                Err(e) => {
                    for t in taken {
                        let _ = self.release(t, owner).await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(true)
    }

    /// Release a batch; individual failures are ignored (TTL cleans up).
    pub async fn release_many(&self, names: &[String], owner: &str) {
        for name in names {
            if let Err(e) = self.release(name, owner).await {
                tracing::warn!(lock = %name, error = %e, "lock release failed, TTL will reap it");
            }
        }
    }
}
