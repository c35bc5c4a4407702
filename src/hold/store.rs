//! Cache-backed persistence for holds.
//!
//! A hold lives at `hold:{id}` with TTL = hold duration + grace, mirrored
//! into `hold:order:{orderId}` and `hold:transporter:{transporterId}` index
//! sets (and a global active set for the sweep), each with a slightly
//! longer TTL. Locks are not stored here; they are the LockManager's.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStore, get_json, set_json};
use crate::core_types::{HoldId, OrderId, UserId, VehicleKey};
use crate::error::DispatchResult;
use crate::models::{Hold, HoldStatus};

/// Extra TTL on index sets over the hold record itself.
const INDEX_TTL_SLACK: Duration = Duration::from_secs(5);

/// TTL for terminal hold records kept around for observability.
const TERMINAL_TTL: Duration = Duration::from_secs(60);

pub fn hold_key(id: HoldId) -> String {
    format!("hold:{id}")
}

pub fn order_holds_key(order_id: OrderId) -> String {
    format!("hold:order:{order_id}")
}

pub fn transporter_holds_key(transporter_id: UserId) -> String {
    format!("hold:transporter:{transporter_id}")
}

const ACTIVE_HOLDS_KEY: &str = "holds:active";

pub struct HoldStore {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl HoldStore {
    pub fn new(cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn index_ttl(&self) -> Duration {
        self.ttl + INDEX_TTL_SLACK
    }

    /// Persist a fresh active hold and mirror it into the index sets.
    pub async fn put_active(&self, hold: &Hold) -> DispatchResult<()> {
        let id = hold.hold_id.to_string();
        set_json(self.cache.as_ref(), &hold_key(hold.hold_id), hold, self.ttl).await?;
        self.cache
            .sadd(&order_holds_key(hold.order_id), &id, self.index_ttl())
            .await?;
        self.cache
            .sadd(
                &transporter_holds_key(hold.transporter_id),
                &id,
                self.index_ttl(),
            )
            .await?;
        self.cache.sadd(ACTIVE_HOLDS_KEY, &id, self.index_ttl()).await?;
        Ok(())
    }

    pub async fn get(&self, id: HoldId) -> DispatchResult<Option<Hold>> {
        get_json(self.cache.as_ref(), &hold_key(id)).await
    }

    /// Move a hold out of `active`. The record is kept briefly for
    /// observability; index sets drop the id immediately.
    pub async fn finish(&self, hold: &mut Hold, status: HoldStatus) -> DispatchResult<()> {
        hold.status = status;
        let id = hold.hold_id.to_string();
        set_json(
            self.cache.as_ref(),
            &hold_key(hold.hold_id),
            hold,
            TERMINAL_TTL,
        )
        .await?;
        self.cache.srem(&order_holds_key(hold.order_id), &id).await?;
        self.cache
            .srem(&transporter_holds_key(hold.transporter_id), &id)
            .await?;
        self.cache.srem(ACTIVE_HOLDS_KEY, &id).await?;
        Ok(())
    }

    /// Active holds attached to an order. Dangling ids (record TTL won the
    /// race against the index) are pruned as they are seen.
    pub async fn list_active_by_order(&self, order_id: OrderId) -> DispatchResult<Vec<Hold>> {
        self.resolve_members(&order_holds_key(order_id)).await
    }

    /// The transporter's active hold for (order, type, subtype), if any.
    pub async fn find_active(
        &self,
        transporter_id: UserId,
        order_id: OrderId,
        key: &VehicleKey,
    ) -> DispatchResult<Option<Hold>> {
        let holds = self
            .resolve_members(&transporter_holds_key(transporter_id))
            .await?;
        Ok(holds.into_iter().find(|h| {
            h.order_id == order_id && h.key() == *key && h.status.is_active()
        }))
    }

    /// Every active hold, for the reconciliation sweep.
    pub async fn list_active(&self) -> DispatchResult<Vec<Hold>> {
        self.resolve_members(ACTIVE_HOLDS_KEY).await
    }

    async fn resolve_members(&self, set_key: &str) -> DispatchResult<Vec<Hold>> {
        let ids = self.cache.smembers(set_key).await?;
        let mut holds = Vec::with_capacity(ids.len());
        for id in ids {
            match get_json::<Hold>(self.cache.as_ref(), &format!("hold:{id}")).await? {
                Some(hold) if hold.status.is_active() => holds.push(hold),
                _ => {
                    // Record gone or terminal: drop the stale index member.
                    self.cache.srem(set_key, &id).await?;
                }
            }
        }
        Ok(holds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::core_types::{TruckRequestId, now_ms};

    fn sample_hold(order_id: OrderId, transporter_id: UserId) -> Hold {
        let now = now_ms();
        Hold {
            hold_id: HoldId::new(),
            order_id,
            transporter_id,
            vehicle_type: "open".to_string(),
            vehicle_subtype: "17ft".to_string(),
            quantity: 2,
            truck_request_ids: vec![TruckRequestId::new(), TruckRequestId::new()],
            status: HoldStatus::Active,
            created_at: now,
            expires_at: now + 15_000,
        }
    }

    fn store() -> HoldStore {
        HoldStore::new(Arc::new(MemoryCacheStore::new()), Duration::from_secs(20))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let holds = store();
        let hold = sample_hold(OrderId::new(), 7);
        holds.put_active(&hold).await.unwrap();

        let loaded = holds.get(hold.hold_id).await.unwrap().unwrap();
        assert_eq!(loaded.hold_id, hold.hold_id);
        assert_eq!(loaded.quantity, 2);
        assert_eq!(loaded.status, HoldStatus::Active);
    }

    #[tokio::test]
    async fn test_indices_track_active_holds() {
        let holds = store();
        let order_id = OrderId::new();
        let hold = sample_hold(order_id, 7);
        holds.put_active(&hold).await.unwrap();

        assert_eq!(holds.list_active_by_order(order_id).await.unwrap().len(), 1);
        assert_eq!(holds.list_active().await.unwrap().len(), 1);
        assert!(
            holds
                .find_active(7, order_id, &VehicleKey::new("open", "17ft"))
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            holds
                .find_active(8, order_id, &VehicleKey::new("open", "17ft"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_finish_removes_from_indices() {
        let holds = store();
        let order_id = OrderId::new();
        let mut hold = sample_hold(order_id, 7);
        holds.put_active(&hold).await.unwrap();

        holds.finish(&mut hold, HoldStatus::Released).await.unwrap();
        assert!(holds.list_active_by_order(order_id).await.unwrap().is_empty());
        assert!(holds.list_active().await.unwrap().is_empty());
        // The record itself survives briefly for observability.
        let loaded = holds.get(hold.hold_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, HoldStatus::Released);
    }

    #[tokio::test]
    async fn test_dangling_index_member_pruned() {
        let cache = Arc::new(MemoryCacheStore::new());
        let holds = HoldStore::new(cache.clone(), Duration::from_millis(30));
        let order_id = OrderId::new();
        let hold = sample_hold(order_id, 7);
        holds.put_active(&hold).await.unwrap();

        // Record TTL (30ms) expires before the index TTL (+5s slack).
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(holds.list_active_by_order(order_id).await.unwrap().is_empty());
    }
}
