//! Request/response shapes of the reservation protocol.

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::core_types::{
    AssignmentId, HoldId, OrderId, TimestampMs, TripId, TruckRequestId, UserId, VehicleId,
    VehicleKey,
};
use crate::models::TruckRequest;

/// Successful `hold` result.
#[derive(Debug, Clone, Serialize)]
pub struct HoldReceipt {
    pub hold_id: HoldId,
    pub expires_at: TimestampMs,
    pub held_quantity: u32,
}

/// One vehicle+driver pair of a confirm batch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignmentInput {
    pub vehicle_id: VehicleId,
    pub driver_id: UserId,
}

/// Successful full confirm.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmReceipt {
    pub order_id: OrderId,
    pub assignment_ids: Vec<AssignmentId>,
    pub trip_ids: Vec<TripId>,
    pub trucks_filled: u32,
    pub total_trucks: u32,
    pub order_fully_filled: bool,
}

/// Successful simple confirm (no vehicle/driver bindings yet).
#[derive(Debug, Clone, Serialize)]
pub struct SimpleConfirmReceipt {
    pub order_id: OrderId,
    pub assigned_truck_request_ids: Vec<TruckRequestId>,
    pub trucks_filled: u32,
    pub total_trucks: u32,
    pub order_fully_filled: bool,
}

/// Availability of one (type, subtype) group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailabilityGroup {
    pub vehicle_type: String,
    pub vehicle_subtype: String,
    pub total_needed: u32,
    pub available: u32,
    pub held: u32,
    pub assigned: u32,
    pub fare_per_truck: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderAvailability {
    pub order_id: OrderId,
    pub groups: Vec<AvailabilityGroup>,
    pub is_fully_assigned: bool,
}

/// Group an order's requests into the availability snapshot.
pub fn compute_availability(order_id: OrderId, requests: &[TruckRequest]) -> OrderAvailability {
    // Preserve demand-line order: groups sorted by first request number.
    let mut first_seen: FxHashMap<VehicleKey, u32> = FxHashMap::default();
    let mut groups: FxHashMap<VehicleKey, AvailabilityGroup> = FxHashMap::default();

    for request in requests {
        let key = request.key();
        first_seen
            .entry(key.clone())
            .or_insert(request.request_number);
        let group = groups.entry(key.clone()).or_insert_with(|| AvailabilityGroup {
            vehicle_type: key.vehicle_type.clone(),
            vehicle_subtype: key.vehicle_subtype.clone(),
            total_needed: 0,
            available: 0,
            held: 0,
            assigned: 0,
            fare_per_truck: request.price_per_truck,
        });
        group.total_needed += 1;
        use crate::models::TruckRequestStatus::*;
        match request.status {
            Searching => group.available += 1,
            Held => group.held += 1,
            Assigned | Accepted | InProgress | Completed => group.assigned += 1,
            Cancelled | Expired => {}
        }
    }

    let mut ordered: Vec<(u32, AvailabilityGroup)> = groups
        .into_iter()
        .map(|(key, group)| (first_seen[&key], group))
        .collect();
    ordered.sort_by_key(|(first, _)| *first);

    let groups: Vec<AvailabilityGroup> = ordered.into_iter().map(|(_, g)| g).collect();
    let is_fully_assigned = groups.iter().all(|g| g.available == 0 && g.held == 0);

    OrderAvailability {
        order_id,
        groups,
        is_fully_assigned,
    }
}
