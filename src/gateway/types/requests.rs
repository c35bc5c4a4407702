//! Request DTOs with edge validation.
//!
//! Bodies are validated before the core sees them; the core re-checks its
//! own invariants (the edge bounds are a convenience, not the source of
//! truth for hold quantity, which is config-driven).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core_types::{HoldId, OrderId, TimestampMs};
use crate::hold::AssignmentInput;
use crate::models::Location;
use crate::order::{CreateOrderCommand, DemandLine};

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct DemandLineRequest {
    #[validate(length(min = 1))]
    pub vehicle_type: String,
    #[validate(length(min = 1))]
    pub vehicle_subtype: String,
    #[validate(range(min = 1, max = 100))]
    pub quantity: u32,
    pub price_per_truck: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1))]
    pub customer_phone: String,
    #[validate(length(min = 1))]
    pub customer_name: String,
    pub pickup: Location,
    pub drop: Location,
    #[serde(default)]
    pub stops: Vec<Location>,
    #[validate(range(min = 0.1))]
    pub distance_km: f64,
    #[validate(length(min = 1, max = 20), nested)]
    pub demand: Vec<DemandLineRequest>,
    #[serde(default)]
    pub goods_type: Option<String>,
    #[serde(default)]
    pub cargo_weight_kg: Option<f64>,
    #[serde(default)]
    pub scheduled_at: Option<TimestampMs>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl CreateOrderRequest {
    pub fn into_command(self, customer_id: u64) -> CreateOrderCommand {
        CreateOrderCommand {
            customer_id,
            customer_phone: self.customer_phone,
            customer_name: self.customer_name,
            pickup: self.pickup,
            drop: self.drop,
            stops: self.stops,
            distance_km: self.distance_km,
            demand: self
                .demand
                .into_iter()
                .map(|line| DemandLine {
                    vehicle_type: line.vehicle_type,
                    vehicle_subtype: line.vehicle_subtype,
                    quantity: line.quantity,
                    price_per_truck: line.price_per_truck,
                })
                .collect(),
            goods_type: self.goods_type,
            cargo_weight_kg: self.cargo_weight_kg,
            scheduled_at: self.scheduled_at,
            idempotency_key: self.idempotency_key,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct HoldRequest {
    pub order_id: OrderId,
    #[validate(length(min = 1))]
    pub vehicle_type: String,
    #[validate(length(min = 1))]
    pub vehicle_subtype: String,
    /// Upper bound enforced by the engine against its configured maximum.
    #[validate(range(min = 1))]
    pub quantity: u32,
}

/// Confirm with `assignments` present is the atomic full variant; without,
/// the two-phase simple variant.
#[derive(Debug, Deserialize)]
pub struct ConfirmHoldRequest {
    pub hold_id: HoldId,
    #[serde(default)]
    pub assignments: Option<Vec<AssignmentInput>>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseHoldRequest {
    pub hold_id: HoldId,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub order_id: OrderId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RouteStopRequest {
    pub order_id: OrderId,
    /// For `reached`: the index the driver reports arriving at. Re-sending
    /// an index that was already recorded is a no-op success.
    #[serde(default)]
    pub route_index: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_order_json() -> serde_json::Value {
        serde_json::json!({
            "customer_phone": "+919900112233",
            "customer_name": "Acme Mills",
            "pickup": {"address": "Whitefield, Bengaluru"},
            "drop": {"address": "Guntur, AP"},
            "distance_km": 520.0,
            "demand": [
                {"vehicle_type": "open", "vehicle_subtype": "17ft", "quantity": 2, "price_per_truck": "15000"}
            ]
        })
    }

    #[test]
    fn test_create_order_request_validates() {
        let req: CreateOrderRequest = serde_json::from_value(create_order_json()).unwrap();
        assert!(req.validate().is_ok());
        let cmd = req.into_command(42);
        assert_eq!(cmd.customer_id, 42);
        assert_eq!(cmd.demand.len(), 1);
        assert_eq!(cmd.demand[0].quantity, 2);
    }

    #[test]
    fn test_zero_quantity_fails_validation() {
        let mut body = create_order_json();
        body["demand"][0]["quantity"] = serde_json::json!(0);
        let req: CreateOrderRequest = serde_json::from_value(body).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_empty_demand_fails_validation() {
        let mut body = create_order_json();
        body["demand"] = serde_json::json!([]);
        let req: CreateOrderRequest = serde_json::from_value(body).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_confirm_variants_parse() {
        let simple: ConfirmHoldRequest = serde_json::from_value(serde_json::json!({
            "hold_id": HoldId::new().to_string(),
        }))
        .unwrap();
        assert!(simple.assignments.is_none());

        let full: ConfirmHoldRequest = serde_json::from_value(serde_json::json!({
            "hold_id": HoldId::new().to_string(),
            "assignments": [
                {"vehicle_id": crate::core_types::VehicleId::new().to_string(), "driver_id": 7}
            ]
        }))
        .unwrap();
        assert_eq!(full.assignments.unwrap().len(), 1);
    }
}
