//! In-process CacheStore on DashMap with lazy expiry plus a periodic purge.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{DispatchError, DispatchResult};

use super::CacheStore;

#[derive(Debug, Clone)]
enum CacheValue {
    Str(String),
    Set(HashSet<String>),
    Int(i64),
}

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    expires_at: Instant,
}

impl Entry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Wired to a periodic engine job; reads do
    /// not depend on it (they check expiry themselves).
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.live());
        before - self.entries.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> DispatchResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: CacheValue::Str(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get_string(&self, key: &str) -> DispatchResult<Option<String>> {
        match self.entries.get(key) {
            Some(entry) if entry.live() => match &entry.value {
                CacheValue::Str(s) => Ok(Some(s.clone())),
                CacheValue::Int(n) => Ok(Some(n.to_string())),
                CacheValue::Set(_) => Err(DispatchError::internal(format!(
                    "cache type mismatch on {key}: set read as string"
                ))),
            },
            _ => Ok(None),
        }
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> DispatchResult<bool> {
        // The entry guard makes check-then-set atomic per key.
        let mut won = false;
        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| {
            won = true;
            Entry {
                value: CacheValue::Str(value.to_string()),
                expires_at: Instant::now() + ttl,
            }
        });
        if !won && !slot.live() {
            // Dead entry: claim it.
            *slot = Entry {
                value: CacheValue::Str(value.to_string()),
                expires_at: Instant::now() + ttl,
            };
            won = true;
        }
        Ok(won)
    }

    async fn delete(&self, key: &str) -> DispatchResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> DispatchResult<bool> {
        let removed = self
            .entries
            .remove_if(key, |_, entry| {
                entry.live() && matches!(&entry.value, CacheValue::Str(s) if s == value)
            })
            .is_some();
        Ok(removed)
    }

    async fn sadd(&self, key: &str, member: &str, ttl: Duration) -> DispatchResult<()> {
        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: CacheValue::Set(HashSet::new()),
            expires_at: Instant::now() + ttl,
        });
        if !slot.live() {
            slot.value = CacheValue::Set(HashSet::new());
        }
        // Every add refreshes the whole set's TTL.
        slot.expires_at = Instant::now() + ttl;
        match &mut slot.value {
            CacheValue::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            _ => Err(DispatchError::internal(format!(
                "cache type mismatch on {key}: not a set"
            ))),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> DispatchResult<()> {
        if let Some(mut slot) = self.entries.get_mut(key)
            && let CacheValue::Set(members) = &mut slot.value
        {
            members.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> DispatchResult<Vec<String>> {
        match self.entries.get(key) {
            Some(entry) if entry.live() => match &entry.value {
                CacheValue::Set(members) => {
                    let mut out: Vec<String> = members.iter().cloned().collect();
                    out.sort();
                    Ok(out)
                }
                _ => Err(DispatchError::internal(format!(
                    "cache type mismatch on {key}: not a set"
                ))),
            },
            _ => Ok(vec![]),
        }
    }

    async fn incr(&self, key: &str, ttl: Duration) -> DispatchResult<i64> {
        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: CacheValue::Int(0),
            expires_at: Instant::now() + ttl,
        });
        if !slot.live() {
            // Window rolled over: restart the counter and the TTL.
            *slot = Entry {
                value: CacheValue::Int(0),
                expires_at: Instant::now() + ttl,
            };
        }
        match &mut slot.value {
            CacheValue::Int(n) => {
                *n += 1;
                Ok(*n)
            }
            _ => Err(DispatchError::internal(format!(
                "cache type mismatch on {key}: not a counter"
            ))),
        }
    }
}
