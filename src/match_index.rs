//! MatchIndex: who should hear about demand for a given (type, subtype).
//!
//! Read-through cache over the state store: transporters owning at least
//! one active matching vehicle, filtered to those currently accepting
//! broadcasts. Invalidated on fleet changes and availability toggles, so
//! the invalidating writer reads its own write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::core_types::{UserId, VehicleKey};
use crate::error::DispatchResult;
use crate::store::StateStore;

struct CachedRecipients {
    transporters: Vec<UserId>,
    cached_at: Instant,
}

pub struct MatchIndex {
    store: Arc<dyn StateStore>,
    ttl: Duration,
    cache: DashMap<VehicleKey, CachedRecipients>,
}

impl MatchIndex {
    pub fn new(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: DashMap::new(),
        }
    }

    /// Online transporters with a matching active vehicle.
    pub async fn lookup(&self, key: &VehicleKey) -> DispatchResult<Vec<UserId>> {
        if let Some(entry) = self.cache.get(key)
            && entry.cached_at.elapsed() < self.ttl
        {
            return Ok(entry.transporters.clone());
        }

        let transporters = self.load(key).await?;
        self.cache.insert(
            key.clone(),
            CachedRecipients {
                transporters: transporters.clone(),
                cached_at: Instant::now(),
            },
        );
        tracing::debug!(key = %key, recipients = transporters.len(), "match index refreshed");
        Ok(transporters)
    }

    async fn load(&self, key: &VehicleKey) -> DispatchResult<Vec<UserId>> {
        let owners = self.store.transporters_with_active_vehicle(key).await?;
        let mut online = Vec::with_capacity(owners.len());
        for owner in owners {
            if let Some(user) = self.store.get_user(owner).await?
                && user.is_available
            {
                online.push(owner);
            }
        }
        Ok(online)
    }

    /// Drop the cached set for one key.
    pub fn invalidate_key(&self, key: &VehicleKey) {
        self.cache.remove(key);
    }

    /// Fleet change: a vehicle was created/updated/deleted, its type or
    /// subtype changed, or `is_active` toggled. Both the old and new key
    /// must be passed when the key changed.
    pub fn on_vehicle_changed(&self, keys: &[VehicleKey]) {
        for key in keys {
            self.invalidate_key(key);
        }
    }

    /// Availability toggle: invalidate every key the transporter's fleet
    /// covers, whichever direction the toggle went.
    pub async fn on_availability_changed(&self, transporter_id: UserId) -> DispatchResult<()> {
        let vehicles = self.store.list_vehicles_by_transporter(transporter_id).await?;
        for vehicle in vehicles {
            self.invalidate_key(&vehicle.key());
        }
        Ok(())
    }

    #[cfg(test)]
    fn cached_keys(&self) -> usize {
        self.cache.len()
    }
}
