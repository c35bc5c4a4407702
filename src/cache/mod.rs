//! TTL cache abstraction: plain values, SETNX locks, TTL sets and
//! windowed counters.
//!
//! Hold metadata, truck locks, idempotency replays and rate windows all live
//! here. The in-process implementation covers single-process deployments;
//! a multi-node install must plug a shared (Redis-shaped) implementation
//! into the same trait.

pub mod memory;

pub use memory::MemoryCacheStore;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{DispatchError, DispatchResult};

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Set `key` to `value` with a TTL, overwriting any previous value.
    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> DispatchResult<()>;

    async fn get_string(&self, key: &str) -> DispatchResult<Option<String>>;

    /// Atomic set-if-absent with TTL. Returns `true` when this call set the
    /// value; `false` when a live value already exists.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> DispatchResult<bool>;

    async fn delete(&self, key: &str) -> DispatchResult<()>;

    /// Delete `key` only if it currently holds `value` (owner-checked lock
    /// release). Returns whether a delete happened.
    async fn delete_if_value(&self, key: &str, value: &str) -> DispatchResult<bool>;

    /// Add a member to the set at `key`, refreshing the key's TTL.
    async fn sadd(&self, key: &str, member: &str, ttl: Duration) -> DispatchResult<()>;

    async fn srem(&self, key: &str, member: &str) -> DispatchResult<()>;

    async fn smembers(&self, key: &str) -> DispatchResult<Vec<String>>;

    /// Increment the counter at `key`, creating it with `ttl` on first use.
    /// The TTL is fixed at creation (fixed-window semantics).
    async fn incr(&self, key: &str, ttl: Duration) -> DispatchResult<i64>;
}

/// JSON fetch helper over the string surface.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheStore,
    key: &str,
) -> DispatchResult<Option<T>> {
    match cache.get_string(key).await? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .map_err(|e| DispatchError::internal(format!("cache decode {key}: {e}")))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// JSON store helper over the string surface.
pub async fn set_json<T: Serialize>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> DispatchResult<()> {
    let raw = serde_json::to_string(value)
        .map_err(|e| DispatchError::internal(format!("cache encode {key}: {e}")))?;
    cache.set_string(key, &raw, ttl).await
}
