//! In-memory StateStore on DashMap.
//!
//! Each DashMap entry guard serializes updates to its row, which is exactly
//! the transactional guarantee the trait asks for. This is the deployment
//! story for single-process installs and the store used by the test suite.

use dashmap::DashMap;

use async_trait::async_trait;

use crate::core_types::{
    AssignmentId, OrderId, TruckRequestId, UserId, VehicleId, VehicleKey, now_ms,
};
use crate::error::DispatchResult;
use crate::models::{
    Assignment, Order, OrderStatus, TruckRequest, TruckRequestStatus, User, Vehicle, VehicleStatus,
};

use super::{CasOutcome, RowUpdate, StateStore};

#[derive(Default)]
pub struct MemoryStateStore {
    orders: DashMap<OrderId, Order>,
    requests: DashMap<TruckRequestId, TruckRequest>,
    /// order id -> child request ids, in request_number order.
    order_requests: DashMap<OrderId, Vec<TruckRequestId>>,
    vehicles: DashMap<VehicleId, Vehicle>,
    users: DashMap<UserId, User>,
    assignments: DashMap<AssignmentId, Assignment>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn requests_of(&self, order_id: OrderId) -> Vec<TruckRequest> {
        let ids = self
            .order_requests
            .get(&order_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        let mut rows: Vec<TruckRequest> = ids
            .iter()
            .filter_map(|id| self.requests.get(id).map(|r| r.clone()))
            .collect();
        rows.sort_by_key(|r| r.request_number);
        rows
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    // ------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------

    async fn insert_order(&self, order: Order) -> DispatchResult<()> {
        self.orders.insert(order.id, order);
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> DispatchResult<Option<Order>> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn list_orders_by_customer(&self, customer_id: UserId) -> DispatchResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| entry.customer_id == customer_id)
            .map(|entry| entry.clone())
            .collect();
        orders.sort_by_key(|o| std::cmp::Reverse(o.created_at));
        Ok(orders)
    }

    async fn find_active_order_by_customer(
        &self,
        customer_id: UserId,
    ) -> DispatchResult<Option<Order>> {
        Ok(self
            .orders
            .iter()
            .find(|entry| entry.customer_id == customer_id && !entry.status.is_terminal())
            .map(|entry| entry.clone()))
    }

    async fn list_non_terminal_orders(&self) -> DispatchResult<Vec<Order>> {
        Ok(self
            .orders
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| entry.clone())
            .collect())
    }

    async fn update_order(
        &self,
        id: OrderId,
        apply: RowUpdate<Order>,
    ) -> DispatchResult<Option<Order>> {
        Ok(self.orders.get_mut(&id).map(|mut entry| {
            apply(&mut entry);
            entry.updated_at = now_ms();
            entry.clone()
        }))
    }

    async fn cas_order_status(
        &self,
        id: OrderId,
        expect: &[OrderStatus],
        to: OrderStatus,
    ) -> DispatchResult<CasOutcome<Order>> {
        let Some(mut entry) = self.orders.get_mut(&id) else {
            return Ok(CasOutcome::Missing);
        };
        if expect.contains(&entry.status) {
            entry.status = to;
            entry.updated_at = now_ms();
            Ok(CasOutcome::Updated(entry.clone()))
        } else {
            Ok(CasOutcome::StatusMismatch(entry.clone()))
        }
    }

    async fn add_trucks_filled(&self, id: OrderId, delta: u32) -> DispatchResult<Option<Order>> {
        Ok(self.orders.get_mut(&id).map(|mut entry| {
            entry.trucks_filled += delta;
            entry.updated_at = now_ms();
            entry.clone()
        }))
    }

    // ------------------------------------------------------------
    // Truck requests
    // ------------------------------------------------------------

    async fn insert_truck_requests(&self, requests: Vec<TruckRequest>) -> DispatchResult<()> {
        for request in requests {
            self.order_requests
                .entry(request.order_id)
                .or_default()
                .push(request.id);
            self.requests.insert(request.id, request);
        }
        Ok(())
    }

    async fn get_truck_request(
        &self,
        id: TruckRequestId,
    ) -> DispatchResult<Option<TruckRequest>> {
        Ok(self.requests.get(&id).map(|r| r.clone()))
    }

    async fn list_requests_by_order(
        &self,
        order_id: OrderId,
    ) -> DispatchResult<Vec<TruckRequest>> {
        Ok(self.requests_of(order_id))
    }

    async fn list_searching_requests(
        &self,
        order_id: OrderId,
        key: &VehicleKey,
    ) -> DispatchResult<Vec<TruckRequest>> {
        Ok(self
            .requests_of(order_id)
            .into_iter()
            .filter(|r| r.status == TruckRequestStatus::Searching && r.key() == *key)
            .collect())
    }

    async fn list_searching_requests_for_keys(
        &self,
        keys: &[VehicleKey],
    ) -> DispatchResult<Vec<TruckRequest>> {
        let mut rows: Vec<TruckRequest> = self
            .requests
            .iter()
            .filter(|entry| {
                entry.status == TruckRequestStatus::Searching && keys.contains(&entry.value().key())
            })
            .map(|entry| entry.clone())
            .collect();
        rows.sort_by_key(|r| (r.order_id, r.request_number));
        Ok(rows)
    }

    async fn update_truck_request(
        &self,
        id: TruckRequestId,
        apply: RowUpdate<TruckRequest>,
    ) -> DispatchResult<Option<TruckRequest>> {
        Ok(self.requests.get_mut(&id).map(|mut entry| {
            apply(&mut entry);
            entry.updated_at = now_ms();
            entry.clone()
        }))
    }

    async fn cas_truck_request(
        &self,
        id: TruckRequestId,
        expect: &[TruckRequestStatus],
        apply: RowUpdate<TruckRequest>,
    ) -> DispatchResult<CasOutcome<TruckRequest>> {
        let Some(mut entry) = self.requests.get_mut(&id) else {
            return Ok(CasOutcome::Missing);
        };
        if expect.contains(&entry.status) {
            apply(&mut entry);
            entry.updated_at = now_ms();
            Ok(CasOutcome::Updated(entry.clone()))
        } else {
            Ok(CasOutcome::StatusMismatch(entry.clone()))
        }
    }

    async fn cas_truck_request_where(
        &self,
        id: TruckRequestId,
        check: super::RowCheck<TruckRequest>,
        apply: RowUpdate<TruckRequest>,
    ) -> DispatchResult<CasOutcome<TruckRequest>> {
        let Some(mut entry) = self.requests.get_mut(&id) else {
            return Ok(CasOutcome::Missing);
        };
        if check(&entry) {
            apply(&mut entry);
            entry.updated_at = now_ms();
            Ok(CasOutcome::Updated(entry.clone()))
        } else {
            Ok(CasOutcome::StatusMismatch(entry.clone()))
        }
    }

    async fn list_stale_held_requests(
        &self,
        cutoff: crate::core_types::TimestampMs,
    ) -> DispatchResult<Vec<TruckRequest>> {
        Ok(self
            .requests
            .iter()
            .filter(|entry| {
                entry.status == TruckRequestStatus::Held
                    && entry.held_at.is_some_and(|at| at < cutoff)
            })
            .map(|entry| entry.clone())
            .collect())
    }

    // ------------------------------------------------------------
    // Vehicles
    // ------------------------------------------------------------

    async fn upsert_vehicle(&self, vehicle: Vehicle) -> DispatchResult<()> {
        self.vehicles.insert(vehicle.id, vehicle);
        Ok(())
    }

    async fn get_vehicle(&self, id: VehicleId) -> DispatchResult<Option<Vehicle>> {
        Ok(self.vehicles.get(&id).map(|v| v.clone()))
    }

    async fn list_vehicles_by_transporter(
        &self,
        transporter_id: UserId,
    ) -> DispatchResult<Vec<Vehicle>> {
        Ok(self
            .vehicles
            .iter()
            .filter(|entry| entry.transporter_id == transporter_id)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn cas_vehicle(
        &self,
        id: VehicleId,
        expect: &[VehicleStatus],
        apply: RowUpdate<Vehicle>,
    ) -> DispatchResult<CasOutcome<Vehicle>> {
        let Some(mut entry) = self.vehicles.get_mut(&id) else {
            return Ok(CasOutcome::Missing);
        };
        if expect.contains(&entry.status) {
            apply(&mut entry);
            Ok(CasOutcome::Updated(entry.clone()))
        } else {
            Ok(CasOutcome::StatusMismatch(entry.clone()))
        }
    }

    async fn transporters_with_active_vehicle(
        &self,
        key: &VehicleKey,
    ) -> DispatchResult<Vec<UserId>> {
        let mut owners: Vec<UserId> = self
            .vehicles
            .iter()
            .filter(|entry| entry.is_active && entry.value().key() == *key)
            .map(|entry| entry.transporter_id)
            .collect();
        owners.sort_unstable();
        owners.dedup();
        Ok(owners)
    }

    // ------------------------------------------------------------
    // Users
    // ------------------------------------------------------------

    async fn upsert_user(&self, user: User) -> DispatchResult<()> {
        self.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> DispatchResult<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    // ------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------

    async fn insert_assignment(&self, assignment: Assignment) -> DispatchResult<()> {
        self.assignments.insert(assignment.id, assignment);
        Ok(())
    }

    async fn get_assignment(&self, id: AssignmentId) -> DispatchResult<Option<Assignment>> {
        Ok(self.assignments.get(&id).map(|a| a.clone()))
    }

    async fn list_assignments_by_order(
        &self,
        order_id: OrderId,
    ) -> DispatchResult<Vec<Assignment>> {
        let mut rows: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|entry| entry.order_id == order_id)
            .map(|entry| entry.clone())
            .collect();
        rows.sort_by_key(|a| a.assigned_at);
        Ok(rows)
    }

    async fn find_active_assignment_by_driver(
        &self,
        driver_id: UserId,
    ) -> DispatchResult<Option<Assignment>> {
        Ok(self
            .assignments
            .iter()
            .find(|entry| entry.driver_id == driver_id && entry.status.is_active())
            .map(|entry| entry.clone()))
    }

    async fn find_assignment_for_driver_on_order(
        &self,
        order_id: OrderId,
        driver_id: UserId,
    ) -> DispatchResult<Option<Assignment>> {
        Ok(self
            .assignments
            .iter()
            .find(|entry| {
                entry.order_id == order_id
                    && entry.driver_id == driver_id
                    && entry.status.is_active()
            })
            .map(|entry| entry.clone()))
    }

    async fn update_assignment(
        &self,
        id: AssignmentId,
        apply: RowUpdate<Assignment>,
    ) -> DispatchResult<Option<Assignment>> {
        Ok(self.assignments.get_mut(&id).map(|mut entry| {
            apply(&mut entry);
            entry.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Location;
    use rust_decimal::Decimal;

    fn sample_order(customer_id: UserId) -> Order {
        let now = now_ms();
        Order {
            id: OrderId::new(),
            customer_id,
            customer_phone: "+919900112233".to_string(),
            customer_name: "Acme Mills".to_string(),
            pickup: Location::new("Whitefield, Bengaluru"),
            drop: Location::new("Guntur, AP"),
            route_points: vec![],
            distance_km: 520.0,
            total_trucks: 2,
            trucks_filled: 0,
            total_amount: Decimal::from(30_000),
            goods_type: None,
            cargo_weight_kg: None,
            status: OrderStatus::Active,
            scheduled_at: None,
            expires_at: now + 60_000,
            current_route_index: 0,
            stop_wait_timers: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_request(order_id: OrderId, number: u32) -> TruckRequest {
        let now = now_ms();
        TruckRequest {
            id: TruckRequestId::new(),
            order_id,
            request_number: number,
            vehicle_type: "open".to_string(),
            vehicle_subtype: "17ft".to_string(),
            price_per_truck: Decimal::from(15_000),
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
        }
    }

    #[tokio::test]
    async fn test_cas_order_status() {
        let store = MemoryStateStore::new();
        let order = sample_order(1);
        let id = order.id;
        store.insert_order(order).await.unwrap();

        let outcome = store
            .cas_order_status(id, &[OrderStatus::Active], OrderStatus::Cancelled)
            .await
            .unwrap();
        assert!(outcome.is_updated());

        // Second CAS misses: the order is no longer active.
        let outcome = store
            .cas_order_status(id, &[OrderStatus::Active], OrderStatus::Expired)
            .await
            .unwrap();
        match outcome {
            CasOutcome::StatusMismatch(order) => {
                assert_eq!(order.status, OrderStatus::Cancelled)
            }
            other => panic!("expected StatusMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cas_missing_order() {
        let store = MemoryStateStore::new();
        let outcome = store
            .cas_order_status(OrderId::new(), &[OrderStatus::Active], OrderStatus::Expired)
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::Missing));
    }

    #[tokio::test]
    async fn test_requests_listed_in_number_order() {
        let store = MemoryStateStore::new();
        let order = sample_order(1);
        let order_id = order.id;
        store.insert_order(order).await.unwrap();

        // Insert out of order on purpose.
        let r3 = sample_request(order_id, 3);
        let r1 = sample_request(order_id, 1);
        let r2 = sample_request(order_id, 2);
        store
            .insert_truck_requests(vec![r3, r1, r2])
            .await
            .unwrap();

        let rows = store.list_requests_by_order(order_id).await.unwrap();
        let numbers: Vec<u32> = rows.iter().map(|r| r.request_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_searching_filter_by_key() {
        let store = MemoryStateStore::new();
        let order = sample_order(1);
        let order_id = order.id;
        store.insert_order(order).await.unwrap();

        let mut container = sample_request(order_id, 2);
        container.vehicle_type = "container".to_string();
        container.vehicle_subtype = "4ton".to_string();
        store
            .insert_truck_requests(vec![sample_request(order_id, 1), container])
            .await
            .unwrap();

        let open = store
            .list_searching_requests(order_id, &VehicleKey::new("open", "17ft"))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].request_number, 1);
    }

    #[tokio::test]
    async fn test_cas_truck_request_guard() {
        let store = MemoryStateStore::new();
        let order = sample_order(1);
        let order_id = order.id;
        store.insert_order(order).await.unwrap();
        let request = sample_request(order_id, 1);
        let rid = request.id;
        store.insert_truck_requests(vec![request]).await.unwrap();

        let outcome = store
            .cas_truck_request(
                rid,
                &[TruckRequestStatus::Searching],
                Box::new(|r| {
                    r.status = TruckRequestStatus::Held;
                    r.held_by = Some(77);
                }),
            )
            .await
            .unwrap();
        let updated = outcome.updated().unwrap();
        assert_eq!(updated.status, TruckRequestStatus::Held);
        assert_eq!(updated.held_by, Some(77));

        // Guard now fails.
        let outcome = store
            .cas_truck_request(
                rid,
                &[TruckRequestStatus::Searching],
                Box::new(|r| r.status = TruckRequestStatus::Held),
            )
            .await
            .unwrap();
        assert!(!outcome.is_updated());
    }

    #[tokio::test]
    async fn test_transporters_with_active_vehicle_dedups() {
        let store = MemoryStateStore::new();
        for (id_owner, active) in [(10, true), (10, true), (11, false)] {
            store
                .upsert_vehicle(Vehicle {
                    id: VehicleId::new(),
                    transporter_id: id_owner,
                    vehicle_number: format!("KA01-{id_owner}"),
                    vehicle_type: "open".to_string(),
                    vehicle_subtype: "17ft".to_string(),
                    capacity_kg: None,
                    status: VehicleStatus::Available,
                    current_trip_id: None,
                    assigned_driver_id: None,
                    is_active: active,
                })
                .await
                .unwrap();
        }

        let owners = store
            .transporters_with_active_vehicle(&VehicleKey::new("open", "17ft"))
            .await
            .unwrap();
        assert_eq!(owners, vec![10]);
    }

    #[tokio::test]
    async fn test_add_trucks_filled_is_atomic_increment() {
        let store = std::sync::Arc::new(MemoryStateStore::new());
        let order = sample_order(1);
        let id = order.id;
        store.insert_order(order).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.add_trucks_filled(id, 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let order = store.get_order(id).await.unwrap().unwrap();
        assert_eq!(order.trucks_filled, 8);
    }
}
