//! Abstract persistent state: row-keyed collections with single-row
//! serialized updates and compare-and-set on status.
//!
//! The physical database is an external collaborator; the engine only ever
//! talks to this trait. Single-row updates must be serialized per row by the
//! implementation (the per-customer create lock and per-truck SETNX locks
//! are the only cross-row serialization the engine relies on).

pub mod memory;

pub use memory::MemoryStateStore;

use async_trait::async_trait;

use crate::core_types::{AssignmentId, OrderId, TruckRequestId, UserId, VehicleId, VehicleKey};
use crate::error::DispatchResult;
use crate::models::{
    Assignment, Order, OrderStatus, TruckRequest, TruckRequestStatus, User, Vehicle, VehicleStatus,
};

/// Single-row mutation applied under the row's serialization.
pub type RowUpdate<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Row predicate for predicate-guarded CAS.
pub type RowCheck<T> = Box<dyn FnOnce(&T) -> bool + Send>;

/// Result of a status-guarded compare-and-set.
#[derive(Debug, Clone)]
pub enum CasOutcome<T> {
    /// Guard matched; the row was mutated. Carries the updated row.
    Updated(T),
    /// Row exists but its status did not match the guard. Carries the
    /// current row so callers can re-check and decide.
    StatusMismatch(T),
    /// No such row.
    Missing,
}

impl<T> CasOutcome<T> {
    /// The updated row, if the guard matched.
    pub fn updated(self) -> Option<T> {
        match self {
            CasOutcome::Updated(row) => Some(row),
            _ => None,
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, CasOutcome::Updated(_))
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    // ------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------

    async fn insert_order(&self, order: Order) -> DispatchResult<()>;

    async fn get_order(&self, id: OrderId) -> DispatchResult<Option<Order>>;

    async fn list_orders_by_customer(&self, customer_id: UserId) -> DispatchResult<Vec<Order>>;

    /// The customer's order in a non-terminal status, if any
    /// (single-active-order policy).
    async fn find_active_order_by_customer(
        &self,
        customer_id: UserId,
    ) -> DispatchResult<Option<Order>>;

    /// All non-terminal orders; used for timer rehydration on restart.
    async fn list_non_terminal_orders(&self) -> DispatchResult<Vec<Order>>;

    /// Unconditional single-row update. Returns the updated row, or `None`
    /// if the row does not exist.
    async fn update_order(
        &self,
        id: OrderId,
        apply: RowUpdate<Order>,
    ) -> DispatchResult<Option<Order>>;

    /// Set status iff the current status is in `expect`.
    async fn cas_order_status(
        &self,
        id: OrderId,
        expect: &[OrderStatus],
        to: OrderStatus,
    ) -> DispatchResult<CasOutcome<Order>>;

    /// Atomically add to `trucks_filled`, returning the updated row.
    async fn add_trucks_filled(&self, id: OrderId, delta: u32) -> DispatchResult<Option<Order>>;

    // ------------------------------------------------------------
    // Truck requests
    // ------------------------------------------------------------

    async fn insert_truck_requests(&self, requests: Vec<TruckRequest>) -> DispatchResult<()>;

    async fn get_truck_request(&self, id: TruckRequestId)
    -> DispatchResult<Option<TruckRequest>>;

    /// All requests of an order, ordered by `request_number`.
    async fn list_requests_by_order(&self, order_id: OrderId)
    -> DispatchResult<Vec<TruckRequest>>;

    /// `searching` requests of an order for one (type, subtype), ordered by
    /// `request_number`. This is the hold candidate list.
    async fn list_searching_requests(
        &self,
        order_id: OrderId,
        key: &VehicleKey,
    ) -> DispatchResult<Vec<TruckRequest>>;

    /// `searching` requests across all orders matching any of `keys`:
    /// the transporter's active-request feed.
    async fn list_searching_requests_for_keys(
        &self,
        keys: &[VehicleKey],
    ) -> DispatchResult<Vec<TruckRequest>>;

    async fn update_truck_request(
        &self,
        id: TruckRequestId,
        apply: RowUpdate<TruckRequest>,
    ) -> DispatchResult<Option<TruckRequest>>;

    /// Status-guarded CAS; `apply` runs only when the guard matched and is
    /// responsible for setting the new status and bindings.
    async fn cas_truck_request(
        &self,
        id: TruckRequestId,
        expect: &[TruckRequestStatus],
        apply: RowUpdate<TruckRequest>,
    ) -> DispatchResult<CasOutcome<TruckRequest>>;

    /// Predicate-guarded CAS for transitions that must also check bindings
    /// (e.g. held and held_by = X), not just the status.
    async fn cas_truck_request_where(
        &self,
        id: TruckRequestId,
        check: RowCheck<TruckRequest>,
        apply: RowUpdate<TruckRequest>,
    ) -> DispatchResult<CasOutcome<TruckRequest>>;

    /// Requests still `held` whose `held_at` is older than `cutoff`. Hold
    /// records lost to cache TTL leave these behind; the sweep reconciles
    /// them back to `searching`.
    async fn list_stale_held_requests(
        &self,
        cutoff: crate::core_types::TimestampMs,
    ) -> DispatchResult<Vec<TruckRequest>>;

    // ------------------------------------------------------------
    // Vehicles
    // ------------------------------------------------------------

    async fn upsert_vehicle(&self, vehicle: Vehicle) -> DispatchResult<()>;

    async fn get_vehicle(&self, id: VehicleId) -> DispatchResult<Option<Vehicle>>;

    async fn list_vehicles_by_transporter(
        &self,
        transporter_id: UserId,
    ) -> DispatchResult<Vec<Vehicle>>;

    async fn cas_vehicle(
        &self,
        id: VehicleId,
        expect: &[VehicleStatus],
        apply: RowUpdate<Vehicle>,
    ) -> DispatchResult<CasOutcome<Vehicle>>;

    /// Transporter ids owning at least one active vehicle of `key`.
    /// Availability filtering happens in the match index.
    async fn transporters_with_active_vehicle(
        &self,
        key: &VehicleKey,
    ) -> DispatchResult<Vec<UserId>>;

    // ------------------------------------------------------------
    // Users
    // ------------------------------------------------------------

    async fn upsert_user(&self, user: User) -> DispatchResult<()>;

    async fn get_user(&self, id: UserId) -> DispatchResult<Option<User>>;

    // ------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------

    async fn insert_assignment(&self, assignment: Assignment) -> DispatchResult<()>;

    async fn get_assignment(&self, id: AssignmentId) -> DispatchResult<Option<Assignment>>;

    async fn list_assignments_by_order(&self, order_id: OrderId)
    -> DispatchResult<Vec<Assignment>>;

    /// The driver's assignment in a non-terminal status, if any (a driver
    /// has at most one active trip).
    async fn find_active_assignment_by_driver(
        &self,
        driver_id: UserId,
    ) -> DispatchResult<Option<Assignment>>;

    /// Non-terminal assignment binding `driver_id` to `order_id`.
    async fn find_assignment_for_driver_on_order(
        &self,
        order_id: OrderId,
        driver_id: UserId,
    ) -> DispatchResult<Option<Assignment>>;

    async fn update_assignment(
        &self,
        id: AssignmentId,
        apply: RowUpdate<Assignment>,
    ) -> DispatchResult<Option<Assignment>>;
}
