//! Dispatch domain entities and their status machines.
//!
//! Relationships are unidirectional: an Order owns its TruckRequests by id,
//! a TruckRequest points back to its Order by id only, Assignments point to
//! everything by id. Joins happen at read time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{
    AssignmentId, HoldId, OrderId, TimestampMs, TripId, TruckRequestId, UserId, VehicleId,
    VehicleKey, now_ms,
};

// ============================================================
// STATUS ENUMS
// ============================================================

/// Order lifecycle. Terminal states are `completed`, `cancelled`, `expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    PartiallyFilled,
    FullyFilled,
    InProgress,
    Completed,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Terminal orders accept no further mutation.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }

    /// Still accepting holds/broadcast traffic.
    #[inline]
    pub fn is_open_for_holds(&self) -> bool {
        matches!(self, OrderStatus::Active | OrderStatus::PartiallyFilled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "active",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::FullyFilled => "fully_filled",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One physical truck unit's lifecycle.
///
/// Legal transitions:
/// `searching -> held -> {searching | assigned}`,
/// `assigned -> {in_progress -> completed | cancelled}`,
/// `searching/held -> expired` (parent order expiry only),
/// `searching/held -> cancelled` (parent order cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruckRequestStatus {
    Searching,
    Held,
    Assigned,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
    Expired,
}

impl TruckRequestStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TruckRequestStatus::Completed
                | TruckRequestStatus::Cancelled
                | TruckRequestStatus::Expired
        )
    }

    /// Counts toward `Order.trucks_filled`.
    #[inline]
    pub fn is_filled(&self) -> bool {
        matches!(
            self,
            TruckRequestStatus::Assigned
                | TruckRequestStatus::Accepted
                | TruckRequestStatus::InProgress
                | TruckRequestStatus::Completed
        )
    }

    /// Whether `self -> to` is a legal single step.
    pub fn can_transition_to(&self, to: TruckRequestStatus) -> bool {
        use TruckRequestStatus::*;
        matches!(
            (self, to),
            (Searching, Held)
                | (Held, Searching)
                | (Held, Assigned)
                | (Assigned, Accepted)
                | (Assigned, InProgress)
                | (Assigned, Cancelled)
                | (Accepted, InProgress)
                | (Accepted, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
                | (Searching, Expired)
                | (Held, Expired)
                | (Searching, Cancelled)
                | (Held, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TruckRequestStatus::Searching => "searching",
            TruckRequestStatus::Held => "held",
            TruckRequestStatus::Assigned => "assigned",
            TruckRequestStatus::Accepted => "accepted",
            TruckRequestStatus::InProgress => "in_progress",
            TruckRequestStatus::Completed => "completed",
            TruckRequestStatus::Cancelled => "cancelled",
            TruckRequestStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for TruckRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hold lifecycle: a hold is `active` exactly while its requests are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    Active,
    Confirmed,
    Expired,
    Released,
}

impl HoldStatus {
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, HoldStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    InTransit,
    Maintenance,
    Inactive,
}

/// Assignment (trip) lifecycle for one truck+driver binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    DriverAccepted,
    EnRoutePickup,
    AtPickup,
    InTransit,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    /// Non-terminal assignments block the driver and the vehicle.
    #[inline]
    pub fn is_active(&self) -> bool {
        !matches!(self, AssignmentStatus::Completed | AssignmentStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Transporter,
    Driver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Transporter => "transporter",
            Role::Driver => "driver",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "transporter" => Ok(Role::Transporter),
            "driver" => Ok(Role::Driver),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

// ============================================================
// ROUTE
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutePointKind {
    Pickup,
    Stop,
    Drop,
}

/// A named location; coordinates are optional (geocoding is upstream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

impl Location {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            lat: None,
            lng: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub kind: RoutePointKind,
    pub location: Location,
}

/// Wait accounting for one intermediate stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopWaitTimer {
    pub stop_index: u32,
    pub arrived_at: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departed_at: Option<TimestampMs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<i64>,
}

// ============================================================
// ENTITIES
// ============================================================

/// A customer's parent request: one route, heterogeneous truck demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: UserId,
    pub customer_phone: String,
    pub customer_name: String,
    pub pickup: Location,
    pub drop: Location,
    /// Full ordered route: pickup, intermediate stops, drop.
    pub route_points: Vec<RoutePoint>,
    pub distance_km: f64,
    pub total_trucks: u32,
    pub trucks_filled: u32,
    pub total_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goods_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cargo_weight_kg: Option<f64>,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<TimestampMs>,
    pub expires_at: TimestampMs,
    pub current_route_index: u32,
    #[serde(default)]
    pub stop_wait_timers: Vec<StopWaitTimer>,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl Order {
    /// Seconds until broadcast expiry, clamped at zero.
    pub fn remaining_seconds(&self, now: TimestampMs) -> i64 {
        ((self.expires_at - now) / 1000).max(0)
    }

    /// Whether the route index sits on the final (drop) point.
    pub fn at_final_point(&self) -> bool {
        self.route_points.is_empty()
            || self.current_route_index as usize >= self.route_points.len() - 1
    }
}

/// One physical truck unit. The atom of reservation and assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruckRequest {
    pub id: TruckRequestId,
    pub order_id: OrderId,
    /// 1-based position within the order, in demand input order.
    pub request_number: u32,
    pub vehicle_type: String,
    pub vehicle_subtype: String,
    pub price_per_truck: Decimal,
    pub status: TruckRequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub held_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub held_at: Option<TimestampMs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_transporter_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_vehicle_id: Option<VehicleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_vehicle_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_driver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_driver_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<TripId>,
    #[serde(default)]
    pub notified_transporters: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<TimestampMs>,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl TruckRequest {
    pub fn key(&self) -> VehicleKey {
        VehicleKey::new(self.vehicle_type.clone(), self.vehicle_subtype.clone())
    }

    /// Clear reservation bookkeeping (hold release / expiry).
    pub fn clear_hold(&mut self) {
        self.held_by = None;
        self.held_at = None;
    }
}

/// Transient reservation over a set of TruckRequests. Lives in the cache
/// with TTL = hold duration + grace; mirrored into order/transporter
/// index sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hold {
    pub hold_id: HoldId,
    pub order_id: OrderId,
    pub transporter_id: UserId,
    pub vehicle_type: String,
    pub vehicle_subtype: String,
    pub quantity: u32,
    pub truck_request_ids: Vec<TruckRequestId>,
    pub status: HoldStatus,
    pub created_at: TimestampMs,
    pub expires_at: TimestampMs,
}

impl Hold {
    pub fn key(&self) -> VehicleKey {
        VehicleKey::new(self.vehicle_type.clone(), self.vehicle_subtype.clone())
    }

    pub fn is_expired(&self, now: TimestampMs) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub transporter_id: UserId,
    pub vehicle_number: String,
    pub vehicle_type: String,
    pub vehicle_subtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_kg: Option<f64>,
    pub status: VehicleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_trip_id: Option<TripId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_driver_id: Option<UserId>,
    pub is_active: bool,
}

impl Vehicle {
    pub fn key(&self) -> VehicleKey {
        VehicleKey::new(self.vehicle_type.clone(), self.vehicle_subtype.clone())
    }

    /// Free for a new trip: active fleet entry, available, unbound.
    pub fn is_assignable(&self) -> bool {
        self.is_active && self.status == VehicleStatus::Available && self.current_trip_id.is_none()
    }
}

/// Minimal user view the core needs. Profiles live upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub phone: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// For drivers: the transporter they drive for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transporter_id: Option<UserId>,
    /// Accepting broadcasts.
    pub is_available: bool,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// Concrete truck+driver binding for one TruckRequest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub order_id: OrderId,
    pub truck_request_id: TruckRequestId,
    pub transporter_id: UserId,
    pub vehicle_id: VehicleId,
    pub vehicle_number: String,
    pub driver_id: UserId,
    pub driver_name: String,
    pub driver_phone: String,
    pub trip_id: TripId,
    pub status: AssignmentStatus,
    pub assigned_at: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<TimestampMs>,
}

impl Assignment {
    pub fn new(
        order_id: OrderId,
        truck_request_id: TruckRequestId,
        transporter_id: UserId,
        vehicle: &Vehicle,
        driver: &User,
        trip_id: TripId,
    ) -> Self {
        Self {
            id: AssignmentId::new(),
            order_id,
            truck_request_id,
            transporter_id,
            vehicle_id: vehicle.id,
            vehicle_number: vehicle.vehicle_number.clone(),
            driver_id: driver.id,
            driver_name: driver.display_name().to_string(),
            driver_phone: driver.phone.clone(),
            trip_id,
            status: AssignmentStatus::Pending,
            assigned_at: now_ms(),
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_terminal() {
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::Active.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(!OrderStatus::FullyFilled.is_terminal());
    }

    #[test]
    fn test_request_transitions() {
        use TruckRequestStatus::*;
        assert!(Searching.can_transition_to(Held));
        assert!(Held.can_transition_to(Searching));
        assert!(Held.can_transition_to(Assigned));
        assert!(Held.can_transition_to(Expired));
        assert!(!Searching.can_transition_to(Assigned));
        assert!(!Assigned.can_transition_to(Searching));
        assert!(!Expired.can_transition_to(Searching));
    }

    #[test]
    fn test_request_filled_states() {
        assert!(TruckRequestStatus::Assigned.is_filled());
        assert!(TruckRequestStatus::InProgress.is_filled());
        assert!(TruckRequestStatus::Completed.is_filled());
        assert!(!TruckRequestStatus::Searching.is_filled());
        assert!(!TruckRequestStatus::Held.is_filled());
        assert!(!TruckRequestStatus::Expired.is_filled());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::PartiallyFilled).unwrap(),
            "\"partially_filled\""
        );
        assert_eq!(
            serde_json::to_string(&TruckRequestStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&RoutePointKind::Pickup).unwrap(),
            "\"PICKUP\""
        );
    }

    #[test]
    fn test_assignment_status_active() {
        assert!(AssignmentStatus::Pending.is_active());
        assert!(AssignmentStatus::InTransit.is_active());
        assert!(!AssignmentStatus::Completed.is_active());
        assert!(!AssignmentStatus::Cancelled.is_active());
    }

    #[test]
    fn test_vehicle_assignable() {
        let mut v = Vehicle {
            id: VehicleId::new(),
            transporter_id: 42,
            vehicle_number: "KA01AB1234".to_string(),
            vehicle_type: "open".to_string(),
            vehicle_subtype: "17ft".to_string(),
            capacity_kg: Some(9_000.0),
            status: VehicleStatus::Available,
            current_trip_id: None,
            assigned_driver_id: None,
            is_active: true,
        };
        assert!(v.is_assignable());

        v.status = VehicleStatus::InTransit;
        assert!(!v.is_assignable());

        v.status = VehicleStatus::Available;
        v.is_active = false;
        assert!(!v.is_assignable());
    }

    #[test]
    fn test_order_remaining_seconds() {
        let now = now_ms();
        let order = Order {
            id: OrderId::new(),
            customer_id: 1,
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
        };
        assert_eq!(order.remaining_seconds(now), 60);
        assert_eq!(order.remaining_seconds(now + 120_000), 0);
    }
}
