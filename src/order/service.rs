//! Order lifecycle: creation with demand explosion and broadcast fan-out,
//! deterministic expiry, cancellation cascade, and the read surface.

use std::sync::Arc;

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::cache::{CacheStore, get_json, set_json};
use crate::config::EngineConfig;
use crate::core_types::{OrderId, TruckRequestId, UserId, VehicleKey, now_ms};
use crate::error::{DispatchError, DispatchResult};
use crate::events::messages::NewBroadcast;
use crate::events::{Event, EventBus, PushNotification, order_room};
use crate::hold::{HoldService, notified_union};
use crate::lock::{LockManager, create_lock_key, truck_lock_key};
use crate::match_index::MatchIndex;
use crate::models::{
    HoldStatus, Order, OrderStatus, RoutePoint, RoutePointKind, TruckRequest, TruckRequestStatus,
};
use crate::scheduler::{Scheduler, order_expiry_key};
use crate::store::{CasOutcome, StateStore};

use super::types::{
    BroadcastGroupSummary, CancelReceipt, CreateOrderCommand, CreateOrderReceipt, OrderDetails,
    OrderStatusView,
};

fn idempotency_cache_key(customer_id: UserId, key: &str) -> String {
    format!("order:idem:{customer_id}:{key}")
}

fn rate_key(customer_id: UserId) -> String {
    format!("order:rate:{customer_id}")
}

/// Cheap to clone: shared handles plus the config. Expiry timers capture a
/// clone of the service.
#[derive(Clone)]
pub struct OrderService {
    config: EngineConfig,
    store: Arc<dyn StateStore>,
    cache: Arc<dyn CacheStore>,
    locks: Arc<LockManager>,
    index: Arc<MatchIndex>,
    bus: Arc<EventBus>,
    scheduler: Arc<Scheduler>,
    holds: Arc<HoldService>,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        cache: Arc<dyn CacheStore>,
        locks: Arc<LockManager>,
        index: Arc<MatchIndex>,
        bus: Arc<EventBus>,
        scheduler: Arc<Scheduler>,
        holds: Arc<HoldService>,
    ) -> Self {
        Self {
            config,
            store,
            cache,
            locks,
            index,
            bus,
            scheduler,
            holds,
        }
    }

    // ------------------------------------------------------------
    // CreateOrder
    // ------------------------------------------------------------

    pub async fn create_order(&self, cmd: CreateOrderCommand) -> DispatchResult<CreateOrderReceipt> {
        cmd.validate()?;

        // Idempotent replay: same key within the window returns the
        // original receipt verbatim, creating nothing.
        if let Some(key) = &cmd.idempotency_key {
            let cache_key = idempotency_cache_key(cmd.customer_id, key);
            if let Some(receipt) =
                get_json::<CreateOrderReceipt>(self.cache.as_ref(), &cache_key).await?
            {
                tracing::info!(
                    customer_id = cmd.customer_id,
                    idempotency_key = %key,
                    order_id = %receipt.order.id,
                    "create order replayed from idempotency cache"
                );
                return Ok(receipt);
            }
        }

        if self.config.single_active_order
            && self
                .store
                .find_active_order_by_customer(cmd.customer_id)
                .await?
                .is_some()
        {
            return Err(DispatchError::ActiveOrderExists);
        }

        let creates = self
            .cache
            .incr(&rate_key(cmd.customer_id), self.config.create_rate_window())
            .await?;
        if creates > self.config.create_rate_limit as i64 {
            return Err(DispatchError::RateLimitExceeded);
        }

        // Per-customer create lock serializes the whole effect block.
        let lock_name = create_lock_key(cmd.customer_id);
        let lock_token = uuid::Uuid::new_v4().to_string();
        if !self
            .locks
            .acquire(&lock_name, &lock_token, self.config.create_lock_ttl())
            .await?
        {
            return Err(DispatchError::ConcurrentRequest);
        }

        let result = self.create_order_locked(&cmd).await;
        if let Err(e) = self.locks.release(&lock_name, &lock_token).await {
            tracing::warn!(error = %e, "create lock release failed, TTL will reap it");
        }

        let receipt = result?;
        if let Some(key) = &cmd.idempotency_key {
            let cache_key = idempotency_cache_key(cmd.customer_id, key);
            set_json(
                self.cache.as_ref(),
                &cache_key,
                &receipt,
                self.config.idempotency_ttl(),
            )
            .await?;
        }
        Ok(receipt)
    }

    async fn create_order_locked(
        &self,
        cmd: &CreateOrderCommand,
    ) -> DispatchResult<CreateOrderReceipt> {
        let now = now_ms();
        let total_trucks: u32 = cmd.demand.iter().map(|line| line.quantity).sum();
        let total_amount: Decimal = cmd
            .demand
            .iter()
            .map(|line| line.price_per_truck * Decimal::from(line.quantity))
            .sum();
        let expires_at = now + self.config.broadcast_timeout_ms as i64;

        let mut route_points = Vec::with_capacity(cmd.stops.len() + 2);
        route_points.push(RoutePoint {
            kind: RoutePointKind::Pickup,
            location: cmd.pickup.clone(),
        });
        for stop in &cmd.stops {
            route_points.push(RoutePoint {
                kind: RoutePointKind::Stop,
                location: stop.clone(),
            });
        }
        route_points.push(RoutePoint {
            kind: RoutePointKind::Drop,
            location: cmd.drop.clone(),
        });

        let order = Order {
            id: OrderId::new(),
            customer_id: cmd.customer_id,
            customer_phone: cmd.customer_phone.clone(),
            customer_name: cmd.customer_name.clone(),
            pickup: cmd.pickup.clone(),
            drop: cmd.drop.clone(),
            route_points,
            distance_km: cmd.distance_km,
            total_trucks,
            trucks_filled: 0,
            total_amount,
            goods_type: cmd.goods_type.clone(),
            cargo_weight_kg: cmd.cargo_weight_kg,
            status: OrderStatus::Active,
            scheduled_at: cmd.scheduled_at,
            expires_at,
            current_route_index: 0,
            stop_wait_timers: vec![],
            created_at: now,
            updated_at: now,
        };
        self.store.insert_order(order.clone()).await?;

        // Explode demand: one request per physical truck, numbered in
        // demand input order.
        let mut requests: Vec<TruckRequest> = Vec::with_capacity(total_trucks as usize);
        let mut number = 0u32;
        for line in &cmd.demand {
            for _ in 0..line.quantity {
                number += 1;
                requests.push(TruckRequest {
                    id: TruckRequestId::new(),
                    order_id: order.id,
                    request_number: number,
                    vehicle_type: line.vehicle_type.clone(),
                    vehicle_subtype: line.vehicle_subtype.clone(),
                    price_per_truck: line.price_per_truck,
                    status: TruckRequestStatus::Searching,
                    held_by: None,
                    held_at: None,
                    assigned_transporter_id: None,
                    assigned_vehicle_id: None,
                    assigned_vehicle_number: None,
                    assigned_driver_id: None,
                    assigned_driver_name: None,
                    trip_id: None,
                    notified_transporters: vec![],
                    assigned_at: None,
                    created_at: now,
                    updated_at: now,
                });
            }
        }
        self.store.insert_truck_requests(requests.clone()).await?;

        let broadcast = self.broadcast_new_order(&order, &mut requests).await?;

        // Arm the expiry timer last, after all state is in place.
        let service = self.clone();
        let order_id = order.id;
        self.scheduler
            .schedule_at(order_expiry_key(order.id), expires_at, async move {
                if let Err(e) = service.handle_order_expiry(order_id).await {
                    tracing::error!(%order_id, error = %e, "order expiry handler failed");
                }
            });

        tracing::info!(
            order_id = %order.id,
            customer_id = cmd.customer_id,
            total_trucks,
            %total_amount,
            expires_at,
            "order created"
        );

        Ok(CreateOrderReceipt {
            order,
            truck_requests: requests,
            broadcast,
            timeout_seconds: (self.config.broadcast_timeout_ms / 1000) as i64,
        })
    }

    /// Group requests by (type, subtype), resolve recipients, record the
    /// audience, and publish `new_broadcast` + push per group.
    async fn broadcast_new_order(
        &self,
        order: &Order,
        requests: &mut [TruckRequest],
    ) -> DispatchResult<Vec<BroadcastGroupSummary>> {
        let mut groups: FxHashMap<VehicleKey, Vec<usize>> = FxHashMap::default();
        let mut group_order: Vec<VehicleKey> = Vec::new();
        for (i, request) in requests.iter().enumerate() {
            let key = request.key();
            if !groups.contains_key(&key) {
                group_order.push(key.clone());
            }
            groups.entry(key).or_default().push(i);
        }

        let mut summaries = Vec::with_capacity(group_order.len());
        for key in group_order {
            let members = &groups[&key];
            let recipients = self.index.lookup(&key).await?;

            // Record the audience on each request of the group; the in-memory
            // copies are updated too so the receipt reflects it.
            for &i in members {
                let recipients = recipients.clone();
                let updated = self
                    .store
                    .update_truck_request(
                        requests[i].id,
                        Box::new(move |row| row.notified_transporters = recipients),
                    )
                    .await?;
                if let Some(row) = updated {
                    requests[i] = row;
                }
            }

            let representative = &requests[members[0]];
            let event = Event::NewBroadcast(NewBroadcast {
                order_id: order.id,
                truck_request_id: representative.id,
                customer_name: order.customer_name.clone(),
                pickup: order.pickup.clone(),
                drop: order.drop.clone(),
                vehicle_type: key.vehicle_type.clone(),
                vehicle_subtype: key.vehicle_subtype.clone(),
                price_per_truck: representative.price_per_truck,
                trucks_needed: members.len() as u32,
                total_trucks_in_order: order.total_trucks,
                created_at: order.created_at,
                expires_at: order.expires_at,
            });
            self.bus.fan_out(&recipients, event);
            self.bus.push(
                &recipients,
                PushNotification {
                    title: "New trucks needed".to_string(),
                    body: format!(
                        "{} x {}/{} from {}",
                        members.len(),
                        key.vehicle_type,
                        key.vehicle_subtype,
                        order.pickup.address
                    ),
                    data: serde_json::json!({
                        "type": "new_broadcast",
                        "order_id": order.id.to_string(),
                        "vehicle_type": key.vehicle_type,
                        "vehicle_subtype": key.vehicle_subtype,
                    }),
                },
            );

            if recipients.is_empty() {
                // Still a valid order: these units stay searching until the
                // expiry timer flips them.
                tracing::warn!(order_id = %order.id, key = %key, "no online transporters for group");
            }

            summaries.push(BroadcastGroupSummary {
                vehicle_type: key.vehicle_type,
                vehicle_subtype: key.vehicle_subtype,
                trucks_needed: members.len() as u32,
                transporters_notified: recipients.len(),
            });
        }
        Ok(summaries)
    }

    // ------------------------------------------------------------
    // Expiry
    // ------------------------------------------------------------

    /// Runs at `expires_at` (or on rehydration). Flips unfilled demand to
    /// `expired` and settles the order aggregate. A no-op if a confirm
    /// already moved the order past broadcasting.
    pub async fn handle_order_expiry(&self, order_id: OrderId) -> DispatchResult<()> {
        let Some(order) = self.store.get_order(order_id).await? else {
            return Ok(());
        };
        if !matches!(
            order.status,
            OrderStatus::Active | OrderStatus::PartiallyFilled
        ) {
            return Ok(());
        }

        let requests = self.store.list_requests_by_order(order_id).await?;
        for request in &requests {
            if !matches!(
                request.status,
                TruckRequestStatus::Searching | TruckRequestStatus::Held
            ) {
                continue;
            }
            let outcome = self
                .store
                .cas_truck_request(
                    request.id,
                    &[TruckRequestStatus::Searching, TruckRequestStatus::Held],
                    Box::new(|row| {
                        row.status = TruckRequestStatus::Expired;
                        row.clear_hold();
                    }),
                )
                .await?;
            if outcome.is_updated()
                && let Some(holder) = request.held_by
            {
                // Free the reservation lock of a held row we just expired.
                let _ = self
                    .locks
                    .release(&truck_lock_key(request.id), &holder.to_string())
                    .await;
            }
        }

        self.holds
            .detach_holds_for_order(order_id, HoldStatus::Expired)
            .await?;

        let target = if order.trucks_filled > 0 {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Expired
        };
        let outcome = self
            .store
            .cas_order_status(
                order_id,
                &[OrderStatus::Active, OrderStatus::PartiallyFilled],
                target,
            )
            .await?;
        let order = match outcome {
            CasOutcome::Updated(order) => order,
            CasOutcome::StatusMismatch(order) => {
                // A confirm raced us to fully_filled; nothing expired.
                tracing::info!(%order_id, status = %order.status, "expiry raced by confirm, no-op");
                return Ok(());
            }
            CasOutcome::Missing => return Ok(()),
        };

        tracing::info!(
            %order_id,
            status = %order.status,
            trucks_filled = order.trucks_filled,
            total_trucks = order.total_trucks,
            "order broadcast expired"
        );

        // Publish after commit: customer room + every notified transporter.
        let expired = Event::OrderExpired {
            order_id,
            status: order.status,
            trucks_filled: order.trucks_filled,
            total_trucks: order.total_trucks,
        };
        self.bus.publish_user(order.customer_id, expired.clone());
        self.bus.publish_room(&order_room(order_id), expired.clone());
        self.bus.fan_out(&notified_union(&requests), expired);
        self.bus.push(
            &[order.customer_id],
            PushNotification {
                title: "Order expired".to_string(),
                body: format!(
                    "{}/{} trucks were filled before the broadcast window closed",
                    order.trucks_filled, order.total_trucks
                ),
                data: serde_json::json!({
                    "type": "order_expired",
                    "order_id": order_id.to_string(),
                }),
            },
        );
        Ok(())
    }

    /// Re-arm expiry timers after a restart.
    pub async fn rehydrate_expiry_timers(&self) -> DispatchResult<usize> {
        let now = now_ms();
        let mut armed = 0;
        for order in self.store.list_non_terminal_orders().await? {
            if !matches!(
                order.status,
                OrderStatus::Active | OrderStatus::PartiallyFilled
            ) {
                continue;
            }
            let service = self.clone();
            let order_id = order.id;
            // Past-due timers fire immediately.
            let at = order.expires_at.max(now);
            self.scheduler
                .schedule_at(order_expiry_key(order.id), at, async move {
                    if let Err(e) = service.handle_order_expiry(order_id).await {
                        tracing::error!(%order_id, error = %e, "order expiry handler failed");
                    }
                });
            armed += 1;
        }
        if armed > 0 {
            tracing::info!(armed, "rehydrated order expiry timers");
        }
        Ok(armed)
    }

    // ------------------------------------------------------------
    // Cancel
    // ------------------------------------------------------------

    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        customer_id: UserId,
        reason: Option<String>,
    ) -> DispatchResult<CancelReceipt> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(DispatchError::NotFound("order"))?;
        if order.customer_id != customer_id {
            return Err(DispatchError::Forbidden);
        }
        if order.status.is_terminal() {
            return Err(DispatchError::CancelFailed(format!(
                "order is already {}",
                order.status
            )));
        }

        let outcome = self
            .store
            .cas_order_status(
                order_id,
                &[
                    OrderStatus::Active,
                    OrderStatus::PartiallyFilled,
                    OrderStatus::FullyFilled,
                    OrderStatus::InProgress,
                ],
                OrderStatus::Cancelled,
            )
            .await?;
        if !outcome.is_updated() {
            return Err(DispatchError::CancelFailed(
                "order state changed during cancellation".to_string(),
            ));
        }

        // Cascade: open and held demand flips to cancelled (not searching).
        let requests = self.store.list_requests_by_order(order_id).await?;
        for request in &requests {
            if !matches!(
                request.status,
                TruckRequestStatus::Searching | TruckRequestStatus::Held
            ) {
                continue;
            }
            let outcome = self
                .store
                .cas_truck_request(
                    request.id,
                    &[TruckRequestStatus::Searching, TruckRequestStatus::Held],
                    Box::new(|row| {
                        row.status = TruckRequestStatus::Cancelled;
                        row.clear_hold();
                    }),
                )
                .await?;
            if outcome.is_updated()
                && let Some(holder) = request.held_by
            {
                let _ = self
                    .locks
                    .release(&truck_lock_key(request.id), &holder.to_string())
                    .await;
            }
        }

        self.holds
            .detach_holds_for_order(order_id, HoldStatus::Released)
            .await?;
        self.scheduler.cancel(&order_expiry_key(order_id));

        let notified = notified_union(&requests);
        let cancelled = Event::OrderCancelled {
            order_id,
            reason: reason.clone(),
        };
        self.bus.publish_user(customer_id, cancelled.clone());
        self.bus.publish_room(&order_room(order_id), cancelled.clone());
        self.bus.fan_out(&notified, cancelled);
        self.bus.push(
            &notified,
            PushNotification {
                title: "Order cancelled".to_string(),
                body: "The customer cancelled this order".to_string(),
                data: serde_json::json!({
                    "type": "order_cancelled",
                    "order_id": order_id.to_string(),
                }),
            },
        );

        tracing::info!(%order_id, customer_id, "order cancelled");
        Ok(CancelReceipt {
            order_id,
            transporters_notified: notified.len(),
        })
    }

    // ------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------

    pub async fn get_order_details(&self, order_id: OrderId) -> DispatchResult<OrderDetails> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(DispatchError::NotFound("order"))?;
        let truck_requests = self.store.list_requests_by_order(order_id).await?;
        let assignments = self.store.list_assignments_by_order(order_id).await?;
        Ok(OrderDetails {
            order,
            truck_requests,
            assignments,
        })
    }

    pub async fn list_orders_by_customer(&self, customer_id: UserId) -> DispatchResult<Vec<Order>> {
        self.store.list_orders_by_customer(customer_id).await
    }

    pub async fn order_status(&self, order_id: OrderId) -> DispatchResult<OrderStatusView> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(DispatchError::NotFound("order"))?;
        let now = now_ms();
        Ok(OrderStatusView {
            order_id,
            status: order.status,
            is_active: order.status.is_open_for_holds(),
            expires_at: order.expires_at,
            remaining_seconds: order.remaining_seconds(now),
            trucks_filled: order.trucks_filled,
            total_trucks: order.total_trucks,
        })
    }

    /// The transporter's feed: searching requests matching any active
    /// vehicle in their fleet.
    pub async fn active_requests_for_transporter(
        &self,
        transporter_id: UserId,
    ) -> DispatchResult<Vec<TruckRequest>> {
        let vehicles = self.store.list_vehicles_by_transporter(transporter_id).await?;
        let mut keys: Vec<VehicleKey> = vehicles
            .iter()
            .filter(|v| v.is_active)
            .map(|v| v.key())
            .collect();
        keys.sort_by(|a, b| {
            (a.vehicle_type.as_str(), a.vehicle_subtype.as_str())
                .cmp(&(b.vehicle_type.as_str(), b.vehicle_subtype.as_str()))
        });
        keys.dedup();
        if keys.is_empty() {
            return Ok(vec![]);
        }
        self.store.list_searching_requests_for_keys(&keys).await
    }
}
