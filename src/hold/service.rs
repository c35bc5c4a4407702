//! Reservation protocol: hold, confirm, release, availability.
//!
//! The protocol is lock first, persist second: per-truck SETNX locks are
//! taken in ascending request-number order before any store write, so a
//! losing transporter costs nothing but a few cache round-trips. Locks
//! expire by TTL; the periodic sweep only reconciles state and correctness
//! does not depend on its timeliness.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheStore;
use crate::config::EngineConfig;
use crate::core_types::{HoldId, OrderId, TripId, TruckRequestId, UserId, VehicleKey, now_ms};
use crate::error::{AssignmentFailure, DispatchError, DispatchResult};
use crate::events::messages::{BroadcastUpdate, TripAssigned, TrucksConfirmed};
use crate::events::{Event, EventBus, PushNotification, order_room};
use crate::lock::{LockManager, truck_lock_key};
use crate::models::{
    Assignment, Hold, HoldStatus, Order, OrderStatus, Role, TruckRequest, TruckRequestStatus,
    User, Vehicle, VehicleStatus,
};
use crate::scheduler::{Scheduler, order_expiry_key};
use crate::store::{CasOutcome, StateStore};

use super::store::HoldStore;
use super::types::{
    AssignmentInput, ConfirmReceipt, HoldReceipt, OrderAvailability, SimpleConfirmReceipt,
    compute_availability,
};

fn muted_key(order_id: OrderId) -> String {
    format!("order:optout:{order_id}")
}

pub struct HoldService {
    config: EngineConfig,
    store: Arc<dyn StateStore>,
    cache: Arc<dyn CacheStore>,
    holds: Arc<HoldStore>,
    locks: Arc<LockManager>,
    bus: Arc<EventBus>,
    scheduler: Arc<Scheduler>,
}

impl HoldService {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        cache: Arc<dyn CacheStore>,
        holds: Arc<HoldStore>,
        locks: Arc<LockManager>,
        bus: Arc<EventBus>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            config,
            store,
            cache,
            holds,
            locks,
            bus,
            scheduler,
        }
    }

    // ------------------------------------------------------------
    // Hold
    // ------------------------------------------------------------

    /// Reserve `quantity` searching trucks of (type, subtype) on an order.
    pub async fn hold(
        &self,
        order_id: OrderId,
        transporter_id: UserId,
        key: &VehicleKey,
        quantity: u32,
    ) -> DispatchResult<HoldReceipt> {
        if quantity == 0 || quantity > self.config.max_hold_quantity {
            return Err(DispatchError::InvalidQuantity(quantity));
        }

        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(DispatchError::NotFound("order"))?;
        let now = now_ms();
        if order.status == OrderStatus::Expired || order.expires_at < now {
            return Err(DispatchError::Expired("order"));
        }
        if !order.status.is_open_for_holds() {
            return Err(DispatchError::InvalidStatusTransition(format!(
                "order is {}",
                order.status
            )));
        }

        if self
            .holds
            .find_active(transporter_id, order_id, key)
            .await?
            .is_some()
        {
            return Err(DispatchError::AlreadyHolding);
        }

        // Candidate list, ordered by request number.
        let candidates = self.store.list_searching_requests(order_id, key).await?;
        if (candidates.len() as u32) < quantity {
            return Err(DispatchError::NotEnoughAvailable);
        }
        let selected = &candidates[..quantity as usize];

        // Lock first. Ascending request-number order prevents deadlock with
        // overlapping holds; on failure the loser has written nothing.
        let lock_names: Vec<String> = selected.iter().map(|r| truck_lock_key(r.id)).collect();
        let owner = transporter_id.to_string();
        if !self
            .locks
            .acquire_many(&lock_names, &owner, self.config.hold_duration())
            .await?
        {
            tracing::debug!(%order_id, transporter_id, "hold lost the lock race");
            return Err(DispatchError::LockFailed);
        }

        // Persist second.
        let hold = Hold {
            hold_id: HoldId::new(),
            order_id,
            transporter_id,
            vehicle_type: key.vehicle_type.clone(),
            vehicle_subtype: key.vehicle_subtype.clone(),
            quantity,
            truck_request_ids: selected.iter().map(|r| r.id).collect(),
            status: HoldStatus::Active,
            created_at: now,
            expires_at: now + self.config.hold_duration_ms as i64,
        };
        if let Err(e) = self.holds.put_active(&hold).await {
            self.locks.release_many(&lock_names, &owner).await;
            return Err(e);
        }

        // CAS searching -> held. We own the per-row locks, so a miss here
        // means something bypassed the lock protocol: treat as fatal and
        // unwind completely.
        let mut flipped: Vec<TruckRequestId> = Vec::with_capacity(selected.len());
        for request in selected {
            let outcome = self
                .store
                .cas_truck_request(
                    request.id,
                    &[TruckRequestStatus::Searching],
                    Box::new(move |row| {
                        row.status = TruckRequestStatus::Held;
                        row.held_by = Some(transporter_id);
                        row.held_at = Some(now);
                    }),
                )
                .await;
            match outcome {
                Ok(CasOutcome::Updated(_)) => flipped.push(request.id),
                other => {
                    tracing::error!(
                        %order_id,
                        request_id = %request.id,
                        ?other,
                        "hold CAS failed under lock; unwinding"
                    );
                    self.revert_to_searching(&flipped, transporter_id).await;
                    let mut hold = hold.clone();
                    let _ = self.holds.finish(&mut hold, HoldStatus::Released).await;
                    self.locks.release_many(&lock_names, &owner).await;
                    return Err(DispatchError::internal(
                        "truck request mutated while locked",
                    ));
                }
            }
        }

        tracing::info!(
            %order_id,
            hold_id = %hold.hold_id,
            transporter_id,
            quantity,
            key = %key,
            "hold placed"
        );
        self.try_publish_delta(order_id).await;

        Ok(HoldReceipt {
            hold_id: hold.hold_id,
            expires_at: hold.expires_at,
            held_quantity: quantity,
        })
    }

    // ------------------------------------------------------------
    // Confirm (full, with vehicle+driver bindings)
    // ------------------------------------------------------------

    /// Atomically promote every held request of the hold into an Assignment
    /// with a concrete vehicle and driver. The whole batch is rejected on
    /// any validation failure; nothing is written in that case.
    pub async fn confirm_with_assignments(
        &self,
        hold_id: HoldId,
        transporter_id: UserId,
        assignments: Vec<AssignmentInput>,
    ) -> DispatchResult<ConfirmReceipt> {
        let mut hold = self.load_active_hold(hold_id, transporter_id).await?;

        if assignments.len() as u32 != hold.quantity {
            return Err(DispatchError::Validation(format!(
                "hold covers {} trucks but {} assignments were given",
                hold.quantity,
                assignments.len()
            )));
        }

        let resolved = self.validate_batch(&hold, transporter_id, &assignments).await?;

        // Promote pair by pair; on failure compensate everything done so far
        // so no partial state survives.
        let mut done: Vec<(TruckRequestId, Assignment)> = Vec::with_capacity(resolved.len());
        for (request_id, (vehicle, driver)) in
            hold.truck_request_ids.clone().into_iter().zip(resolved)
        {
            let trip_id = TripId::new();
            let assignment =
                Assignment::new(hold.order_id, request_id, transporter_id, &vehicle, &driver, trip_id);

            // held by us -> assigned with bindings.
            let vehicle_number = vehicle.vehicle_number.clone();
            let driver_name = driver.display_name().to_string();
            let driver_id = driver.id;
            let vehicle_id = vehicle.id;
            let outcome = self
                .store
                .cas_truck_request_where(
                    request_id,
                    Box::new(move |row| {
                        row.status == TruckRequestStatus::Held
                            && row.held_by == Some(transporter_id)
                    }),
                    Box::new(move |row| {
                        row.status = TruckRequestStatus::Assigned;
                        row.clear_hold();
                        row.assigned_transporter_id = Some(transporter_id);
                        row.assigned_vehicle_id = Some(vehicle_id);
                        row.assigned_vehicle_number = Some(vehicle_number);
                        row.assigned_driver_id = Some(driver_id);
                        row.assigned_driver_name = Some(driver_name);
                        row.trip_id = Some(trip_id);
                        row.assigned_at = Some(now_ms());
                    }),
                )
                .await?;
            if !outcome.is_updated() {
                // Expiry or sweep won the race on this row.
                self.compensate_confirm(&hold, &done).await;
                return Err(DispatchError::Expired("hold"));
            }

            self.store.insert_assignment(assignment.clone()).await?;

            let driver_id = driver.id;
            let vehicle_outcome = self
                .store
                .cas_vehicle(
                    vehicle.id,
                    &[VehicleStatus::Available],
                    Box::new(move |v| {
                        v.status = VehicleStatus::InTransit;
                        v.current_trip_id = Some(trip_id);
                        v.assigned_driver_id = Some(driver_id);
                    }),
                )
                .await?;
            if !vehicle_outcome.is_updated() {
                // A concurrent confirm grabbed the vehicle between our
                // validation and this CAS. Unwind and surface it as a
                // batch validation failure.
                let _ = self
                    .store
                    .update_assignment(
                        assignment.id,
                        Box::new(|a| a.status = crate::models::AssignmentStatus::Cancelled),
                    )
                    .await;
                self.revert_to_held(&hold, &[request_id]).await;
                self.compensate_confirm(&hold, &done).await;
                return Err(DispatchError::ValidationFailures(vec![AssignmentFailure {
                    index: done.len(),
                    vehicle_id: Some(vehicle.id),
                    driver_id: Some(driver.id),
                    reason: "vehicle was taken by a concurrent confirmation".to_string(),
                }]));
            }

            done.push((request_id, assignment));
        }

        let quantity = hold.quantity;
        let order = self.apply_fill(hold.order_id, quantity).await?;

        self.holds.finish(&mut hold, HoldStatus::Confirmed).await?;
        self.release_hold_locks(&hold).await;

        // Publish after commit.
        let fully_filled = order.status == OrderStatus::FullyFilled;
        for (_, assignment) in &done {
            self.bus.publish_user(
                assignment.driver_id,
                Event::TripAssigned(TripAssigned {
                    assignment_id: assignment.id,
                    trip_id: assignment.trip_id,
                    order_id: order.id,
                    truck_request_id: assignment.truck_request_id,
                    vehicle_number: assignment.vehicle_number.clone(),
                    pickup: order.pickup.clone(),
                    drop: order.drop.clone(),
                }),
            );
            self.bus.push(
                &[assignment.driver_id],
                PushNotification {
                    title: "New trip assigned".to_string(),
                    body: format!("{} -> {}", order.pickup.address, order.drop.address),
                    data: serde_json::json!({
                        "type": "trip_assigned",
                        "order_id": order.id.to_string(),
                        "trip_id": assignment.trip_id.to_string(),
                    }),
                },
            );
        }
        self.publish_confirmed(&order, transporter_id, quantity, &done).await;

        tracing::info!(
            order_id = %order.id,
            hold_id = %hold_id,
            transporter_id,
            quantity,
            trucks_filled = order.trucks_filled,
            "hold confirmed with assignments"
        );

        Ok(ConfirmReceipt {
            order_id: order.id,
            assignment_ids: done.iter().map(|(_, a)| a.id).collect(),
            trip_ids: done.iter().map(|(_, a)| a.trip_id).collect(),
            trucks_filled: order.trucks_filled,
            total_trucks: order.total_trucks,
            order_fully_filled: fully_filled,
        })
    }

    // ------------------------------------------------------------
    // Confirm (simple, two-phase convenience)
    // ------------------------------------------------------------

    /// Promote the held requests to `assigned` without vehicle/driver
    /// bindings. Bindings are attached out of band; no Assignment rows or
    /// vehicle transitions happen here.
    pub async fn confirm_simple(
        &self,
        hold_id: HoldId,
        transporter_id: UserId,
    ) -> DispatchResult<SimpleConfirmReceipt> {
        let mut hold = self.load_active_hold(hold_id, transporter_id).await?;

        let mut assigned: Vec<TruckRequestId> = Vec::with_capacity(hold.truck_request_ids.len());
        for request_id in hold.truck_request_ids.clone() {
            let outcome = self
                .store
                .cas_truck_request_where(
                    request_id,
                    Box::new(move |row| {
                        row.status == TruckRequestStatus::Held
                            && row.held_by == Some(transporter_id)
                    }),
                    Box::new(move |row| {
                        row.status = TruckRequestStatus::Assigned;
                        row.clear_hold();
                        row.assigned_transporter_id = Some(transporter_id);
                        row.assigned_at = Some(now_ms());
                    }),
                )
                .await?;
            if !outcome.is_updated() {
                self.revert_to_held(&hold, &assigned).await;
                return Err(DispatchError::Expired("hold"));
            }
            assigned.push(request_id);
        }

        let quantity = hold.quantity;
        let order = self.apply_fill(hold.order_id, quantity).await?;

        self.holds.finish(&mut hold, HoldStatus::Confirmed).await?;
        self.release_hold_locks(&hold).await;

        let fully_filled = order.status == OrderStatus::FullyFilled;
        self.publish_confirmed(&order, transporter_id, quantity, &[]).await;

        tracing::info!(
            order_id = %order.id,
            hold_id = %hold_id,
            transporter_id,
            quantity,
            "hold confirmed (simple)"
        );

        Ok(SimpleConfirmReceipt {
            order_id: order.id,
            assigned_truck_request_ids: assigned,
            trucks_filled: order.trucks_filled,
            total_trucks: order.total_trucks,
            order_fully_filled: fully_filled,
        })
    }

    // ------------------------------------------------------------
    // Release
    // ------------------------------------------------------------

    /// Release a hold. Idempotent: releasing a hold that is no longer
    /// active reports success.
    pub async fn release(
        &self,
        hold_id: HoldId,
        transporter_id: Option<UserId>,
    ) -> DispatchResult<()> {
        let Some(mut hold) = self.holds.get(hold_id).await? else {
            return Err(DispatchError::NotFound("hold"));
        };
        if let Some(caller) = transporter_id
            && hold.transporter_id != caller
        {
            return Err(DispatchError::Forbidden);
        }
        if !hold.status.is_active() {
            return Ok(());
        }

        self.revert_to_searching(&hold.truck_request_ids, hold.transporter_id)
            .await;
        self.release_hold_locks(&hold).await;
        self.holds.finish(&mut hold, HoldStatus::Released).await?;

        tracing::info!(hold_id = %hold_id, order_id = %hold.order_id, "hold released");
        self.try_publish_delta(hold.order_id).await;
        Ok(())
    }

    // ------------------------------------------------------------
    // Expiry sweep
    // ------------------------------------------------------------

    /// Reconcile expired holds and any stale `held` rows whose hold record
    /// was lost to cache TTL. Locks expire on their own; this only repairs
    /// store state and tells clients.
    pub async fn sweep_expired(&self) -> DispatchResult<usize> {
        let now = now_ms();
        let mut swept = 0;

        for mut hold in self.holds.list_active().await? {
            if !hold.is_expired(now) {
                continue;
            }
            self.revert_to_searching(&hold.truck_request_ids, hold.transporter_id)
                .await;
            self.release_hold_locks(&hold).await;
            self.holds.finish(&mut hold, HoldStatus::Expired).await?;
            swept += 1;

            tracing::info!(
                hold_id = %hold.hold_id,
                order_id = %hold.order_id,
                transporter_id = hold.transporter_id,
                "hold expired"
            );
            self.bus.publish_user(
                hold.transporter_id,
                Event::HoldExpired {
                    hold_id: hold.hold_id,
                    order_id: hold.order_id,
                },
            );
            self.try_publish_delta(hold.order_id).await;
        }

        // Orphaned held rows: hold record gone, per-row lock long dead.
        let cutoff = now - (self.config.hold_duration_ms + self.config.hold_grace_ms) as i64;
        for request in self.store.list_stale_held_requests(cutoff).await? {
            let outcome = self
                .store
                .cas_truck_request_where(
                    request.id,
                    Box::new(move |row| {
                        row.status == TruckRequestStatus::Held
                            && row.held_at.is_some_and(|at| at < cutoff)
                    }),
                    Box::new(|row| {
                        row.status = TruckRequestStatus::Searching;
                        row.clear_hold();
                    }),
                )
                .await?;
            if outcome.is_updated() {
                tracing::warn!(request_id = %request.id, "reconciled orphaned held request");
                self.try_publish_delta(request.order_id).await;
            }
        }

        Ok(swept)
    }

    // ------------------------------------------------------------
    // Cascades driven by the order lifecycle
    // ------------------------------------------------------------

    /// Detach every active hold of an order (cancellation/expiry cascade).
    /// The caller is responsible for flipping the request rows; this only
    /// finishes the holds and releases their locks.
    pub async fn detach_holds_for_order(
        &self,
        order_id: OrderId,
        final_status: HoldStatus,
    ) -> DispatchResult<Vec<Hold>> {
        let mut detached = Vec::new();
        for mut hold in self.holds.list_active_by_order(order_id).await? {
            self.release_hold_locks(&hold).await;
            self.holds.finish(&mut hold, final_status).await?;
            detached.push(hold);
        }
        Ok(detached)
    }

    // ------------------------------------------------------------
    // Availability
    // ------------------------------------------------------------

    pub async fn availability(&self, order_id: OrderId) -> DispatchResult<OrderAvailability> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(DispatchError::NotFound("order"))?;
        let requests = self.store.list_requests_by_order(order_id).await?;
        Ok(compute_availability(order_id, &requests))
    }

    /// Publish the personalized availability delta to every notified
    /// transporter that still has matching capacity. Failures are logged,
    /// never propagated: broadcasting must not fail a state transition.
    pub async fn publish_availability_delta(&self, order_id: OrderId) -> DispatchResult<()> {
        let Some(order) = self.store.get_order(order_id).await? else {
            return Ok(());
        };
        let requests = self.store.list_requests_by_order(order_id).await?;
        let availability = compute_availability(order_id, &requests);
        let notified = notified_union(&requests);

        if availability.is_fully_assigned {
            self.bus.fan_out(
                &notified,
                Event::BroadcastClosed {
                    order_id,
                    reason: "fully_assigned".to_string(),
                },
            );
            return Ok(());
        }

        let muted: HashSet<UserId> = self
            .cache
            .smembers(&muted_key(order_id))
            .await?
            .iter()
            .filter_map(|raw| raw.parse().ok())
            .collect();

        for recipient in notified {
            if muted.contains(&recipient) {
                continue;
            }
            let vehicles = self.store.list_vehicles_by_transporter(recipient).await?;
            let mut can_provide_total = 0u32;
            for group in &availability.groups {
                if group.available == 0 {
                    continue;
                }
                let free = vehicles
                    .iter()
                    .filter(|v| {
                        v.is_assignable()
                            && v.vehicle_type == group.vehicle_type
                            && v.vehicle_subtype == group.vehicle_subtype
                    })
                    .count() as u32;
                let cap = free.min(group.available);
                if cap > 0 {
                    can_provide_total += cap;
                    self.bus.publish_user(
                        recipient,
                        Event::BroadcastUpdate(BroadcastUpdate {
                            order_id,
                            vehicle_type: group.vehicle_type.clone(),
                            vehicle_subtype: group.vehicle_subtype.clone(),
                            total_needed: group.total_needed,
                            available: group.available,
                            held: group.held,
                            assigned: group.assigned,
                            trucks_you_can_provide: cap,
                        }),
                    );
                }
            }
            if can_provide_total == 0 {
                // Out of capacity for this order: tell them once and stop
                // targeting them with further deltas.
                self.bus
                    .publish_user(recipient, Event::NoAvailableTrucks { order_id });
                let ttl = Duration::from_millis(
                    (order.expires_at - now_ms()).max(0) as u64 + 60_000,
                );
                self.cache
                    .sadd(&muted_key(order_id), &recipient.to_string(), ttl)
                    .await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------

    async fn load_active_hold(
        &self,
        hold_id: HoldId,
        transporter_id: UserId,
    ) -> DispatchResult<Hold> {
        let hold = self
            .holds
            .get(hold_id)
            .await?
            .ok_or(DispatchError::NotFound("hold"))?;
        if hold.transporter_id != transporter_id {
            return Err(DispatchError::Forbidden);
        }
        if !hold.status.is_active() || hold.is_expired(now_ms()) {
            return Err(DispatchError::Expired("hold"));
        }
        Ok(hold)
    }

    /// Batch validation for the full confirm. All failures are collected so
    /// the transporter can fix the whole submission at once.
    async fn validate_batch(
        &self,
        hold: &Hold,
        transporter_id: UserId,
        assignments: &[AssignmentInput],
    ) -> DispatchResult<Vec<(Vehicle, User)>> {
        let mut failures: Vec<AssignmentFailure> = Vec::new();
        let mut resolved: Vec<(Vehicle, User)> = Vec::with_capacity(assignments.len());
        let mut seen_vehicles: HashSet<crate::core_types::VehicleId> = HashSet::new();
        let mut seen_drivers: HashSet<UserId> = HashSet::new();

        for (index, input) in assignments.iter().enumerate() {
            let fail = |reason: String, failures: &mut Vec<AssignmentFailure>| {
                failures.push(AssignmentFailure {
                    index,
                    vehicle_id: Some(input.vehicle_id),
                    driver_id: Some(input.driver_id),
                    reason,
                });
            };

            let vehicle = match self.store.get_vehicle(input.vehicle_id).await? {
                Some(v) => v,
                None => {
                    fail("vehicle not found".to_string(), &mut failures);
                    continue;
                }
            };
            if vehicle.transporter_id != transporter_id {
                fail("vehicle does not belong to transporter".to_string(), &mut failures);
                continue;
            }
            if !seen_vehicles.insert(vehicle.id) {
                fail("vehicle listed twice in the batch".to_string(), &mut failures);
                continue;
            }
            if vehicle.status != VehicleStatus::Available || !vehicle.is_active {
                fail(
                    format!("vehicle is not available ({:?})", vehicle.status),
                    &mut failures,
                );
                continue;
            }
            if vehicle.current_trip_id.is_some() {
                fail("vehicle is already bound to a trip".to_string(), &mut failures);
                continue;
            }
            if vehicle.vehicle_type != hold.vehicle_type {
                fail(
                    format!(
                        "vehicle type {} does not match hold type {}",
                        vehicle.vehicle_type, hold.vehicle_type
                    ),
                    &mut failures,
                );
                continue;
            }

            let driver = match self.store.get_user(input.driver_id).await? {
                Some(u) => u,
                None => {
                    fail("driver not found".to_string(), &mut failures);
                    continue;
                }
            };
            if driver.role != Role::Driver {
                fail("user is not a driver".to_string(), &mut failures);
                continue;
            }
            if driver.transporter_id != Some(transporter_id) {
                fail("driver does not belong to transporter".to_string(), &mut failures);
                continue;
            }
            if !seen_drivers.insert(driver.id) {
                fail("driver listed twice in the batch".to_string(), &mut failures);
                continue;
            }
            if self
                .store
                .find_active_assignment_by_driver(driver.id)
                .await?
                .is_some()
            {
                fail("driver already on an active trip".to_string(), &mut failures);
                continue;
            }

            resolved.push((vehicle, driver));
        }

        if failures.is_empty() {
            Ok(resolved)
        } else {
            Err(DispatchError::ValidationFailures(failures))
        }
    }

    /// Compensate a half-done confirm: cancel created assignments, free
    /// their vehicles, and put the requests back to `held`.
    async fn compensate_confirm(&self, hold: &Hold, done: &[(TruckRequestId, Assignment)]) {
        for (request_id, assignment) in done {
            let _ = self
                .store
                .update_assignment(
                    assignment.id,
                    Box::new(|a| a.status = crate::models::AssignmentStatus::Cancelled),
                )
                .await;
            let trip_id = assignment.trip_id;
            let _ = self
                .store
                .cas_vehicle(
                    assignment.vehicle_id,
                    &[VehicleStatus::InTransit],
                    Box::new(move |v| {
                        if v.current_trip_id == Some(trip_id) {
                            v.status = VehicleStatus::Available;
                            v.current_trip_id = None;
                            v.assigned_driver_id = None;
                        }
                    }),
                )
                .await;
            self.revert_to_held(hold, &[*request_id]).await;
        }
    }

    /// assigned -> held again (confirm compensation path).
    async fn revert_to_held(&self, hold: &Hold, request_ids: &[TruckRequestId]) {
        let transporter_id = hold.transporter_id;
        let held_at = hold.created_at;
        for request_id in request_ids {
            let _ = self
                .store
                .cas_truck_request(
                    *request_id,
                    &[TruckRequestStatus::Assigned],
                    Box::new(move |row| {
                        row.status = TruckRequestStatus::Held;
                        row.held_by = Some(transporter_id);
                        row.held_at = Some(held_at);
                        row.assigned_transporter_id = None;
                        row.assigned_vehicle_id = None;
                        row.assigned_vehicle_number = None;
                        row.assigned_driver_id = None;
                        row.assigned_driver_name = None;
                        row.trip_id = None;
                        row.assigned_at = None;
                    }),
                )
                .await;
        }
    }

    /// held (by this transporter) -> searching.
    async fn revert_to_searching(&self, request_ids: &[TruckRequestId], transporter_id: UserId) {
        for request_id in request_ids {
            let _ = self
                .store
                .cas_truck_request_where(
                    *request_id,
                    Box::new(move |row| {
                        row.status == TruckRequestStatus::Held
                            && row.held_by == Some(transporter_id)
                    }),
                    Box::new(|row| {
                        row.status = TruckRequestStatus::Searching;
                        row.clear_hold();
                    }),
                )
                .await;
        }
    }

    async fn release_hold_locks(&self, hold: &Hold) {
        let names: Vec<String> = hold
            .truck_request_ids
            .iter()
            .map(|id| truck_lock_key(*id))
            .collect();
        self.locks
            .release_many(&names, &hold.transporter_id.to_string())
            .await;
    }

    /// Bump the order's fill counter and settle its aggregate status. The
    /// expiry timer may race this; either CAS outcome is legal and the
    /// returned row is re-read truth.
    async fn apply_fill(&self, order_id: OrderId, quantity: u32) -> DispatchResult<Order> {
        let order = self
            .store
            .add_trucks_filled(order_id, quantity)
            .await?
            .ok_or_else(|| DispatchError::internal("order vanished during confirm"))?;

        let target = if order.trucks_filled >= order.total_trucks {
            OrderStatus::FullyFilled
        } else {
            OrderStatus::PartiallyFilled
        };
        let outcome = self
            .store
            .cas_order_status(
                order_id,
                &[OrderStatus::Active, OrderStatus::PartiallyFilled],
                target,
            )
            .await?;

        // Re-read before any user-visible publish.
        let order = match outcome {
            CasOutcome::Updated(order) => order,
            CasOutcome::StatusMismatch(order) => {
                tracing::warn!(
                    %order_id,
                    status = %order.status,
                    "order status raced during confirm; keeping store truth"
                );
                order
            }
            CasOutcome::Missing => {
                return Err(DispatchError::internal("order vanished during confirm"));
            }
        };

        if order.status == OrderStatus::FullyFilled {
            // Demand is met: stop the expiry timer and close the broadcast.
            self.scheduler.cancel(&order_expiry_key(order_id));
        }
        Ok(order)
    }

    /// Customer + audience notifications shared by both confirm variants.
    async fn publish_confirmed(
        &self,
        order: &Order,
        transporter_id: UserId,
        quantity: u32,
        done: &[(TruckRequestId, Assignment)],
    ) {
        let confirmed = Event::TrucksConfirmed(TrucksConfirmed {
            order_id: order.id,
            transporter_id,
            quantity,
            trucks_filled: order.trucks_filled,
            total_trucks: order.total_trucks,
            vehicle_numbers: done.iter().map(|(_, a)| a.vehicle_number.clone()).collect(),
        });
        self.bus.publish_user(order.customer_id, confirmed.clone());
        self.bus.publish_room(&order_room(order.id), confirmed);
        self.bus.push(
            &[order.customer_id],
            PushNotification {
                title: "Trucks confirmed".to_string(),
                body: format!(
                    "{}/{} trucks confirmed for your order",
                    order.trucks_filled, order.total_trucks
                ),
                data: serde_json::json!({
                    "type": "trucks_confirmed",
                    "order_id": order.id.to_string(),
                }),
            },
        );

        if order.status == OrderStatus::FullyFilled {
            let requests = self
                .store
                .list_requests_by_order(order.id)
                .await
                .unwrap_or_default();
            self.bus.fan_out(
                &notified_union(&requests),
                Event::BroadcastClosed {
                    order_id: order.id,
                    reason: "fully_assigned".to_string(),
                },
            );
        } else {
            self.try_publish_delta(order.id).await;
        }
    }

    async fn try_publish_delta(&self, order_id: OrderId) {
        if let Err(e) = self.publish_availability_delta(order_id).await {
            tracing::warn!(%order_id, error = %e, "availability delta publish failed");
        }
    }
}

/// Union of `notified_transporters` across an order's requests.
pub fn notified_union(requests: &[TruckRequest]) -> Vec<UserId> {
    let mut out: Vec<UserId> = requests
        .iter()
        .flat_map(|r| r.notified_transporters.iter().copied())
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}
