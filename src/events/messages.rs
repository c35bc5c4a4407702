//! Realtime event shapes pushed to customers, transporters and drivers.
//!
//! Events are JSON with an `event` discriminator; names are part of the
//! wire contract. Broadcast deltas are personalized per recipient.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{
    AssignmentId, HoldId, OrderId, TimestampMs, TripId, TruckRequestId, UserId,
};
use crate::models::{Location, OrderStatus, RoutePointKind, StopWaitTimer};

/// First notification a transporter gets about new matching demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBroadcast {
    pub order_id: OrderId,
    /// Representative unit of the (type, subtype) group.
    pub truck_request_id: TruckRequestId,
    pub customer_name: String,
    pub pickup: Location,
    pub drop: Location,
    pub vehicle_type: String,
    pub vehicle_subtype: String,
    pub price_per_truck: Decimal,
    /// Demand of this (type, subtype) group.
    pub trucks_needed: u32,
    pub total_trucks_in_order: u32,
    pub created_at: TimestampMs,
    pub expires_at: TimestampMs,
}

/// Personalized availability delta for one notified transporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastUpdate {
    pub order_id: OrderId,
    pub vehicle_type: String,
    pub vehicle_subtype: String,
    pub total_needed: u32,
    pub available: u32,
    pub held: u32,
    pub assigned: u32,
    /// min(recipient's free matching vehicles, trucks still searching).
    pub trucks_you_can_provide: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripAssigned {
    pub assignment_id: AssignmentId,
    pub trip_id: TripId,
    pub order_id: OrderId,
    pub truck_request_id: TruckRequestId,
    pub vehicle_number: String,
    pub pickup: Location,
    pub drop: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrucksConfirmed {
    pub order_id: OrderId,
    pub transporter_id: UserId,
    pub quantity: u32,
    pub trucks_filled: u32,
    pub total_trucks: u32,
    pub vehicle_numbers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteProgress {
    pub order_id: OrderId,
    pub current_route_index: u32,
    pub point_kind: RoutePointKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<i64>,
}

/// Server -> client event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    NewBroadcast(NewBroadcast),
    BroadcastUpdate(BroadcastUpdate),
    BroadcastClosed {
        order_id: OrderId,
        reason: String,
    },
    NoAvailableTrucks {
        order_id: OrderId,
    },
    TrucksConfirmed(TrucksConfirmed),
    TripAssigned(TripAssigned),
    OrderExpired {
        order_id: OrderId,
        status: OrderStatus,
        trucks_filled: u32,
        total_trucks: u32,
    },
    OrderCancelled {
        order_id: OrderId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    OrderCompleted {
        order_id: OrderId,
        #[serde(default)]
        stop_wait_timers: Vec<StopWaitTimer>,
    },
    RouteProgressUpdated(RouteProgress),
    HoldExpired {
        hold_id: HoldId,
        order_id: OrderId,
    },
    // Connection lifecycle
    Connected {
        user_id: UserId,
    },
    Subscribed {
        rooms: Vec<String>,
    },
    Unsubscribed {
        rooms: Vec<String>,
    },
    Pong,
}

impl Event {
    /// The wire name of this event (the `event` field value).
    pub fn name(&self) -> &'static str {
        match self {
            Event::NewBroadcast(_) => "new_broadcast",
            Event::BroadcastUpdate(_) => "broadcast_update",
            Event::BroadcastClosed { .. } => "broadcast_closed",
            Event::NoAvailableTrucks { .. } => "no_available_trucks",
            Event::TrucksConfirmed(_) => "trucks_confirmed",
            Event::TripAssigned(_) => "trip_assigned",
            Event::OrderExpired { .. } => "order_expired",
            Event::OrderCancelled { .. } => "order_cancelled",
            Event::OrderCompleted { .. } => "order_completed",
            Event::RouteProgressUpdated(_) => "route_progress_updated",
            Event::HoldExpired { .. } => "hold_expired",
            Event::Connected { .. } => "connected",
            Event::Subscribed { .. } => "subscribed",
            Event::Unsubscribed { .. } => "unsubscribed",
            Event::Pong => "pong",
        }
    }
}

/// Client -> server commands over the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WsCommand {
    Subscribe { rooms: Vec<String> },
    Unsubscribe { rooms: Vec<String> },
    Ping,
}

/// Room naming. Only the core publishes to these.
pub fn order_room(order_id: OrderId) -> String {
    format!("order:{order_id}")
}

pub fn trip_room(trip_id: TripId) -> String {
    format!("trip:{trip_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_names() {
        let event = Event::NoAvailableTrucks {
            order_id: OrderId::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"no_available_trucks\""));

        let event = Event::BroadcastClosed {
            order_id: OrderId::new(),
            reason: "fully_assigned".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"broadcast_closed\""));
        assert!(json.contains("\"reason\":\"fully_assigned\""));
    }

    #[test]
    fn test_payload_variant_flattens_inline() {
        let event = Event::BroadcastUpdate(BroadcastUpdate {
            order_id: OrderId::new(),
            vehicle_type: "open".to_string(),
            vehicle_subtype: "17ft".to_string(),
            total_needed: 2,
            available: 1,
            held: 1,
            assigned: 0,
            trucks_you_can_provide: 1,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"broadcast_update\""));
        assert!(json.contains("\"trucks_you_can_provide\":1"));
    }

    #[test]
    fn test_name_matches_serialized_tag() {
        let event = Event::Pong;
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(event.name()));
    }

    #[test]
    fn test_ws_command_parse() {
        let cmd: WsCommand =
            serde_json::from_str(r#"{"op":"subscribe","rooms":["order:x"]}"#).unwrap();
        match cmd {
            WsCommand::Subscribe { rooms } => assert_eq!(rooms, vec!["order:x"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_room_names() {
        let order_id = OrderId::new();
        assert_eq!(order_room(order_id), format!("order:{order_id}"));
    }
}
