//! Order lifecycle commands and read models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{OrderId, TimestampMs, UserId, VehicleKey};
use crate::error::{DispatchError, DispatchResult};
use crate::models::{Assignment, Location, Order, TruckRequest};

/// Demand-line bounds.
pub const MAX_DEMAND_LINES: usize = 20;
pub const MAX_LINE_QUANTITY: u32 = 100;

/// One line of heterogeneous demand: N trucks of a (type, subtype) at a
/// per-truck price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandLine {
    pub vehicle_type: String,
    pub vehicle_subtype: String,
    pub quantity: u32,
    pub price_per_truck: Decimal,
}

impl DemandLine {
    pub fn key(&self) -> VehicleKey {
        VehicleKey::new(self.vehicle_type.clone(), self.vehicle_subtype.clone())
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrderCommand {
    pub customer_id: UserId,
    pub customer_phone: String,
    pub customer_name: String,
    pub pickup: Location,
    pub drop: Location,
    /// Intermediate stops between pickup and drop, in travel order.
    pub stops: Vec<Location>,
    pub distance_km: f64,
    pub demand: Vec<DemandLine>,
    pub goods_type: Option<String>,
    pub cargo_weight_kg: Option<f64>,
    pub scheduled_at: Option<TimestampMs>,
    pub idempotency_key: Option<String>,
}

impl CreateOrderCommand {
    /// Fail-fast input validation; bounds are part of the contract.
    pub fn validate(&self) -> DispatchResult<()> {
        if self.demand.is_empty() || self.demand.len() > MAX_DEMAND_LINES {
            return Err(DispatchError::Validation(format!(
                "demand must have 1..{MAX_DEMAND_LINES} lines"
            )));
        }
        for (i, line) in self.demand.iter().enumerate() {
            if line.quantity == 0 || line.quantity > MAX_LINE_QUANTITY {
                return Err(DispatchError::Validation(format!(
                    "demand line {i}: quantity must be 1..{MAX_LINE_QUANTITY}"
                )));
            }
            if line.price_per_truck.is_sign_negative() {
                return Err(DispatchError::Validation(format!(
                    "demand line {i}: price must not be negative"
                )));
            }
            if line.vehicle_type.trim().is_empty() || line.vehicle_subtype.trim().is_empty() {
                return Err(DispatchError::Validation(format!(
                    "demand line {i}: vehicle type and subtype are required"
                )));
            }
        }
        if self.customer_phone.trim().is_empty() {
            return Err(DispatchError::Validation("customer phone is required".into()));
        }
        if self.pickup.address.trim().is_empty() || self.drop.address.trim().is_empty() {
            return Err(DispatchError::Validation(
                "pickup and drop addresses are required".into(),
            ));
        }
        if self.distance_km <= 0.0 {
            return Err(DispatchError::Validation("distance must be positive".into()));
        }
        Ok(())
    }
}

/// Per-(type, subtype) broadcast summary returned to the customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastGroupSummary {
    pub vehicle_type: String,
    pub vehicle_subtype: String,
    pub trucks_needed: u32,
    pub transporters_notified: usize,
}

/// Create-order result; also the replay payload for idempotent retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderReceipt {
    pub order: Order,
    pub truck_requests: Vec<TruckRequest>,
    pub broadcast: Vec<BroadcastGroupSummary>,
    pub timeout_seconds: i64,
}

/// Full order read model.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub truck_requests: Vec<TruckRequest>,
    pub assignments: Vec<Assignment>,
}

/// Lightweight status poll.
#[derive(Debug, Clone, Serialize)]
pub struct OrderStatusView {
    pub order_id: OrderId,
    pub status: crate::models::OrderStatus,
    pub is_active: bool,
    pub expires_at: TimestampMs,
    pub remaining_seconds: i64,
    pub trucks_filled: u32,
    pub total_trucks: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelReceipt {
    pub order_id: OrderId,
    pub transporters_notified: usize,
}
