//! End-to-end dispatch scenarios against the in-memory engine: the full
//! order -> broadcast -> hold -> confirm -> route flow, the failure
//! cascades, and the concurrency properties of the reservation protocol.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use haulnet::config::EngineConfig;
use haulnet::core_types::{UserId, VehicleId, VehicleKey};
use haulnet::engine::DispatchEngine;
use haulnet::error::DispatchError;
use haulnet::events::Event;
use haulnet::models::{
    Assignment, AssignmentStatus, Location, OrderStatus, Role, TruckRequestStatus, User, Vehicle,
    VehicleStatus,
};
use haulnet::order::{CreateOrderCommand, CreateOrderReceipt, DemandLine};

// ------------------------------------------------------------
// Fixtures
// ------------------------------------------------------------

const CUSTOMER: UserId = 1000;

fn engine() -> Arc<DispatchEngine> {
    DispatchEngine::in_memory(EngineConfig::default())
}

fn engine_with(config: EngineConfig) -> Arc<DispatchEngine> {
    DispatchEngine::in_memory(config)
}

async fn seed_customer(engine: &DispatchEngine, id: UserId) {
    engine
        .store()
        .upsert_user(User {
            id,
            phone: format!("+9199000{id}"),
            role: Role::Customer,
            name: Some("Acme Mills".to_string()),
            transporter_id: None,
            is_available: true,
        })
        .await
        .unwrap();
}

async fn seed_transporter(
    engine: &DispatchEngine,
    id: UserId,
    fleet: &[(&str, &str)],
) -> Vec<VehicleId> {
    engine
        .store()
        .upsert_user(User {
            id,
            phone: format!("+9198000{id}"),
            role: Role::Transporter,
            name: Some(format!("Transporter {id}")),
            transporter_id: None,
            is_available: true,
        })
        .await
        .unwrap();
    let mut vehicle_ids = Vec::new();
    for (i, (vehicle_type, vehicle_subtype)) in fleet.iter().enumerate() {
        let vehicle = Vehicle {
            id: VehicleId::new(),
            transporter_id: id,
            vehicle_number: format!("KA01-{id}-{i}"),
            vehicle_type: vehicle_type.to_string(),
            vehicle_subtype: vehicle_subtype.to_string(),
            capacity_kg: Some(9_000.0),
            status: VehicleStatus::Available,
            current_trip_id: None,
            assigned_driver_id: None,
            is_active: true,
        };
        vehicle_ids.push(vehicle.id);
        engine.store().upsert_vehicle(vehicle).await.unwrap();
    }
    vehicle_ids
}

async fn seed_driver(engine: &DispatchEngine, id: UserId, transporter_id: UserId) {
    engine
        .store()
        .upsert_user(User {
            id,
            phone: format!("+9197000{id}"),
            role: Role::Driver,
            name: Some(format!("Driver {id}")),
            transporter_id: Some(transporter_id),
            is_available: true,
        })
        .await
        .unwrap();
}

fn demand(lines: &[(&str, &str, u32, i64)]) -> Vec<DemandLine> {
    lines
        .iter()
        .map(|(vehicle_type, vehicle_subtype, quantity, price)| DemandLine {
            vehicle_type: vehicle_type.to_string(),
            vehicle_subtype: vehicle_subtype.to_string(),
            quantity: *quantity,
            price_per_truck: Decimal::from(*price),
        })
        .collect()
}

fn order_command(lines: &[(&str, &str, u32, i64)]) -> CreateOrderCommand {
    CreateOrderCommand {
        customer_id: CUSTOMER,
        customer_phone: "+919900112233".to_string(),
        customer_name: "Acme Mills".to_string(),
        pickup: Location::new("Whitefield, Bengaluru"),
        drop: Location::new("Guntur, AP"),
        stops: vec![],
        distance_km: 520.0,
        demand: demand(lines),
        goods_type: Some("steel coils".to_string()),
        cargo_weight_kg: Some(18_000.0),
        scheduled_at: None,
        idempotency_key: None,
    }
}

async fn create_order(
    engine: &Arc<DispatchEngine>,
    lines: &[(&str, &str, u32, i64)],
) -> CreateOrderReceipt {
    engine
        .orders()
        .create_order(order_command(lines))
        .await
        .unwrap()
}

/// Attach a live event channel for a user.
fn listen(engine: &DispatchEngine, user_id: UserId) -> UnboundedReceiver<Event> {
    let (tx, rx) = unbounded_channel();
    engine.bus().connection_manager().add_connection(user_id, tx);
    rx
}

fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn count_events(events: &[Event], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}

// ------------------------------------------------------------
// S1 - Simple happy path
// ------------------------------------------------------------

#[tokio::test]
async fn s1_two_transporters_fill_order() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    let v1 = seed_transporter(&engine, 2001, &[("open", "17ft")]).await;
    let v2 = seed_transporter(&engine, 2002, &[("open", "17ft")]).await;
    seed_driver(&engine, 3001, 2001).await;
    seed_driver(&engine, 3002, 2002).await;

    let mut customer_rx = listen(&engine, CUSTOMER);
    let mut t1_rx = listen(&engine, 2001);

    let receipt = create_order(&engine, &[("open", "17ft", 2, 15_000)]).await;
    let order_id = receipt.order.id;
    assert_eq!(receipt.order.total_trucks, 2);
    assert_eq!(receipt.order.total_amount, Decimal::from(30_000));
    assert_eq!(receipt.truck_requests.len(), 2);
    assert_eq!(receipt.broadcast[0].transporters_notified, 2);

    // Both transporters heard the broadcast.
    let t1_events = drain(&mut t1_rx);
    assert_eq!(count_events(&t1_events, "new_broadcast"), 1);

    let key = VehicleKey::new("open", "17ft");
    let h1 = engine.holds().hold(order_id, 2001, &key, 1).await.unwrap();
    let h2 = engine.holds().hold(order_id, 2002, &key, 1).await.unwrap();
    assert_eq!(h1.held_quantity, 1);

    let c1 = engine
        .holds()
        .confirm_with_assignments(
            h1.hold_id,
            2001,
            vec![haulnet::hold::AssignmentInput {
                vehicle_id: v1[0],
                driver_id: 3001,
            }],
        )
        .await
        .unwrap();
    assert!(!c1.order_fully_filled);
    assert_eq!(c1.trucks_filled, 1);

    let c2 = engine
        .holds()
        .confirm_with_assignments(
            h2.hold_id,
            2002,
            vec![haulnet::hold::AssignmentInput {
                vehicle_id: v2[0],
                driver_id: 3002,
            }],
        )
        .await
        .unwrap();
    assert!(c2.order_fully_filled);

    // Order aggregate settled.
    let order = engine.store().get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::FullyFilled);
    assert_eq!(order.trucks_filled, 2);

    // Two assignments, both vehicles in transit with matching trips.
    let assignments = engine
        .store()
        .list_assignments_by_order(order_id)
        .await
        .unwrap();
    assert_eq!(assignments.len(), 2);
    for assignment in &assignments {
        let vehicle = engine
            .store()
            .get_vehicle(assignment.vehicle_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(vehicle.status, VehicleStatus::InTransit);
        assert_eq!(vehicle.current_trip_id, Some(assignment.trip_id));
    }

    // Customer saw both confirmations; the audience saw the closure.
    let customer_events = drain(&mut customer_rx);
    assert_eq!(count_events(&customer_events, "trucks_confirmed"), 2);
    let t1_events = drain(&mut t1_rx);
    assert!(count_events(&t1_events, "broadcast_closed") >= 1);

    // The expiry timer was cancelled when the order filled.
    assert!(!engine.scheduler().cancel(&haulnet::scheduler::order_expiry_key(order_id)));
}

// ------------------------------------------------------------
// S2 - Mixed demand, partial fill at expiry
// ------------------------------------------------------------

#[tokio::test]
async fn s2_mixed_demand_partial_fill_at_expiry() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    let v1 = seed_transporter(&engine, 2001, &[("open", "17ft"), ("open", "17ft")]).await;
    seed_driver(&engine, 3001, 2001).await;
    seed_driver(&engine, 3002, 2001).await;

    let mut customer_rx = listen(&engine, CUSTOMER);

    let receipt = create_order(
        &engine,
        &[("open", "17ft", 2, 15_000), ("container", "4ton", 3, 20_000)],
    )
    .await;
    let order_id = receipt.order.id;
    assert_eq!(receipt.order.total_trucks, 5);
    assert_eq!(receipt.order.total_amount, Decimal::from(90_000));

    // One transporter fills the two open trucks.
    let key = VehicleKey::new("open", "17ft");
    let hold = engine.holds().hold(order_id, 2001, &key, 2).await.unwrap();
    engine
        .holds()
        .confirm_with_assignments(
            hold.hold_id,
            2001,
            vec![
                haulnet::hold::AssignmentInput {
                    vehicle_id: v1[0],
                    driver_id: 3001,
                },
                haulnet::hold::AssignmentInput {
                    vehicle_id: v1[1],
                    driver_id: 3002,
                },
            ],
        )
        .await
        .unwrap();

    // Broadcast window closes with the containers unfilled.
    engine.orders().handle_order_expiry(order_id).await.unwrap();

    let order = engine.store().get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.trucks_filled, 2);

    let requests = engine
        .store()
        .list_requests_by_order(order_id)
        .await
        .unwrap();
    let expired = requests
        .iter()
        .filter(|r| r.status == TruckRequestStatus::Expired)
        .count();
    assert_eq!(expired, 3);
    assert!(
        requests
            .iter()
            .filter(|r| r.vehicle_type == "container")
            .all(|r| r.status == TruckRequestStatus::Expired)
    );

    let events = drain(&mut customer_rx);
    let expired_event = events
        .iter()
        .find(|e| e.name() == "order_expired")
        .expect("customer should hear order_expired");
    match expired_event {
        Event::OrderExpired {
            trucks_filled,
            total_trucks,
            ..
        } => {
            assert_eq!((*trucks_filled, *total_trucks), (2, 5));
        }
        other => panic!("unexpected event {other:?}"),
    }

    // No new hold succeeds against the expired demand.
    let err = engine
        .holds()
        .hold(order_id, 2001, &VehicleKey::new("container", "4ton"), 1)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_ENOUGH_AVAILABLE");
}

// ------------------------------------------------------------
// S3 - Race on holds
// ------------------------------------------------------------

#[tokio::test]
async fn s3_ten_transporters_race_for_one_truck() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    for id in 0..10u64 {
        seed_transporter(&engine, 2100 + id, &[("open", "17ft")]).await;
    }

    let receipt = create_order(&engine, &[("open", "17ft", 1, 15_000)]).await;
    let order_id = receipt.order.id;

    let mut handles = Vec::new();
    for id in 0..10u64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .holds()
                .hold(order_id, 2100 + id, &VehicleKey::new("open", "17ft"), 1)
                .await
        }));
    }

    let mut winners = 0;
    let mut losers = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) => {
                winners += 1;
                assert_eq!(receipt.held_quantity, 1);
            }
            Err(err) => {
                losers += 1;
                // Contention class only, retryable, no store writes.
                assert!(err.retryable(), "unexpected failure kind: {err}");
            }
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(losers, 9);

    // Exactly one request, held by exactly one transporter.
    let requests = engine
        .store()
        .list_requests_by_order(order_id)
        .await
        .unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].status, TruckRequestStatus::Held);
    assert!(requests[0].held_by.is_some());
}

// ------------------------------------------------------------
// S4 - Hold expiry reverts
// ------------------------------------------------------------

#[tokio::test]
async fn s4_unconfirmed_hold_expires_and_reverts() {
    // Short hold, generous grace so the hold record outlives the sleep and
    // the sweep (not just the record TTL) does the reverting.
    let config = EngineConfig {
        hold_duration_ms: 50,
        hold_grace_ms: 300,
        ..EngineConfig::default()
    };
    let engine = engine_with(config);
    seed_customer(&engine, CUSTOMER).await;
    seed_transporter(&engine, 2001, &[("open", "17ft"); 3]).await;

    let receipt = create_order(&engine, &[("open", "17ft", 3, 15_000)]).await;
    let order_id = receipt.order.id;
    let key = VehicleKey::new("open", "17ft");

    let hold = engine.holds().hold(order_id, 2001, &key, 3).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(120)).await;

    let swept = engine.holds().sweep_expired().await.unwrap();
    assert_eq!(swept, 1);

    let requests = engine
        .store()
        .list_requests_by_order(order_id)
        .await
        .unwrap();
    assert!(
        requests
            .iter()
            .all(|r| r.status == TruckRequestStatus::Searching && r.held_by.is_none())
    );

    // No assignment was ever created.
    assert!(
        engine
            .store()
            .list_assignments_by_order(order_id)
            .await
            .unwrap()
            .is_empty()
    );

    // Confirming the dead hold fails.
    let err = engine
        .holds()
        .confirm_simple(hold.hold_id, 2001)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EXPIRED");

    // The second attempt succeeds.
    let second = engine.holds().hold(order_id, 2001, &key, 3).await.unwrap();
    assert_eq!(second.held_quantity, 3);
}

// ------------------------------------------------------------
// S5 - Confirm validation rollback
// ------------------------------------------------------------

#[tokio::test]
async fn s5_batch_rejected_when_one_driver_is_busy() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    let vehicles = seed_transporter(&engine, 2001, &[("open", "17ft"), ("open", "17ft")]).await;
    seed_driver(&engine, 3001, 2001).await;
    seed_driver(&engine, 3002, 2001).await;

    // Driver 3002 is already out on a trip.
    let busy_vehicle = Vehicle {
        id: VehicleId::new(),
        transporter_id: 2001,
        vehicle_number: "KA01-BUSY".to_string(),
        vehicle_type: "open".to_string(),
        vehicle_subtype: "17ft".to_string(),
        capacity_kg: None,
        status: VehicleStatus::InTransit,
        current_trip_id: None,
        assigned_driver_id: Some(3002),
        is_active: true,
    };
    engine.store().upsert_vehicle(busy_vehicle.clone()).await.unwrap();
    let busy_driver = User {
        id: 3002,
        phone: "+91970003002".to_string(),
        role: Role::Driver,
        name: Some("Driver 3002".to_string()),
        transporter_id: Some(2001),
        is_available: true,
    };
    let other_order = create_order(&engine, &[("open", "17ft", 1, 1_000)]).await;
    engine
        .store()
        .insert_assignment(Assignment::new(
            other_order.order.id,
            other_order.truck_requests[0].id,
            2001,
            &busy_vehicle,
            &busy_driver,
            haulnet::core_types::TripId::new(),
        ))
        .await
        .unwrap();
    engine
        .orders()
        .cancel_order(other_order.order.id, CUSTOMER, None)
        .await
        .unwrap();

    let receipt = create_order(&engine, &[("open", "17ft", 2, 15_000)]).await;
    let order_id = receipt.order.id;
    let key = VehicleKey::new("open", "17ft");
    let hold = engine.holds().hold(order_id, 2001, &key, 2).await.unwrap();

    let err = engine
        .holds()
        .confirm_with_assignments(
            hold.hold_id,
            2001,
            vec![
                haulnet::hold::AssignmentInput {
                    vehicle_id: vehicles[0],
                    driver_id: 3001,
                },
                haulnet::hold::AssignmentInput {
                    vehicle_id: vehicles[1],
                    driver_id: 3002,
                },
            ],
        )
        .await
        .unwrap_err();

    match err {
        DispatchError::ValidationFailures(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 1);
            assert!(failures[0].reason.contains("active trip"));
        }
        other => panic!("expected ValidationFailures, got {other}"),
    }

    // Nothing was written: no assignments for this order, both requests
    // still held by the transporter.
    assert!(
        engine
            .store()
            .list_assignments_by_order(order_id)
            .await
            .unwrap()
            .is_empty()
    );
    let requests = engine
        .store()
        .list_requests_by_order(order_id)
        .await
        .unwrap();
    assert!(
        requests
            .iter()
            .all(|r| r.status == TruckRequestStatus::Held && r.held_by == Some(2001))
    );
}

// ------------------------------------------------------------
// S6 - Cancellation cascade
// ------------------------------------------------------------

#[tokio::test]
async fn s6_cancel_mid_broadcast_with_active_hold() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    seed_transporter(&engine, 2001, &[("open", "17ft"), ("open", "17ft")]).await;

    let receipt = create_order(&engine, &[("open", "17ft", 3, 15_000)]).await;
    let order_id = receipt.order.id;
    let key = VehicleKey::new("open", "17ft");
    let hold = engine.holds().hold(order_id, 2001, &key, 2).await.unwrap();

    let mut transporter_rx = listen(&engine, 2001);

    let cancel = engine
        .orders()
        .cancel_order(order_id, CUSTOMER, Some("plans changed".to_string()))
        .await
        .unwrap();
    assert_eq!(cancel.transporters_notified, 1);

    let order = engine.store().get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    // Held requests flip to cancelled, not searching.
    let requests = engine
        .store()
        .list_requests_by_order(order_id)
        .await
        .unwrap();
    assert!(
        requests
            .iter()
            .all(|r| r.status == TruckRequestStatus::Cancelled)
    );

    // The hold is no longer active; releasing it again is a no-op success.
    engine.holds().release(hold.hold_id, Some(2001)).await.unwrap();

    let events = drain(&mut transporter_rx);
    assert_eq!(count_events(&events, "order_cancelled"), 1);

    // No further holds on a cancelled order.
    let err = engine.holds().hold(order_id, 2001, &key, 1).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidStatusTransition(_)));
}

// ------------------------------------------------------------
// Properties and boundary behavior
// ------------------------------------------------------------

#[tokio::test]
async fn create_order_is_idempotent_per_key() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    seed_transporter(&engine, 2001, &[("open", "17ft")]).await;

    let mut cmd = order_command(&[("open", "17ft", 2, 15_000)]);
    cmd.idempotency_key = Some("req-abc".to_string());

    let first = engine.orders().create_order(cmd.clone()).await.unwrap();
    let second = engine.orders().create_order(cmd).await.unwrap();
    assert_eq!(first.order.id, second.order.id);

    // No second order row was created.
    let orders = engine
        .orders()
        .list_orders_by_customer(CUSTOMER)
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
}

#[tokio::test]
async fn single_active_order_policy() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    seed_transporter(&engine, 2001, &[("open", "17ft")]).await;

    create_order(&engine, &[("open", "17ft", 1, 15_000)]).await;
    let err = engine
        .orders()
        .create_order(order_command(&[("open", "17ft", 1, 15_000)]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ACTIVE_ORDER_EXISTS");
}

#[tokio::test]
async fn create_rate_limit_enforced() {
    let config = EngineConfig {
        single_active_order: false,
        create_rate_limit: 2,
        ..EngineConfig::default()
    };
    let engine = engine_with(config);
    seed_customer(&engine, CUSTOMER).await;

    create_order(&engine, &[("open", "17ft", 1, 15_000)]).await;
    create_order(&engine, &[("open", "17ft", 1, 15_000)]).await;
    let err = engine
        .orders()
        .create_order(order_command(&[("open", "17ft", 1, 15_000)]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn hold_quantity_bounds() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    seed_transporter(&engine, 2001, &[("open", "17ft")]).await;
    let receipt = create_order(&engine, &[("open", "17ft", 1, 15_000)]).await;
    let key = VehicleKey::new("open", "17ft");

    let err = engine
        .holds()
        .hold(receipt.order.id, 2001, &key, 0)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_QUANTITY");

    let err = engine
        .holds()
        .hold(receipt.order.id, 2001, &key, 51)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_QUANTITY");
}

#[tokio::test]
async fn order_with_no_matching_transporters_still_created() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    // Nobody owns a container/4ton.
    seed_transporter(&engine, 2001, &[("open", "17ft")]).await;

    let receipt = create_order(&engine, &[("container", "4ton", 2, 20_000)]).await;
    assert_eq!(receipt.broadcast[0].transporters_notified, 0);

    let requests = engine
        .store()
        .list_requests_by_order(receipt.order.id)
        .await
        .unwrap();
    assert!(
        requests
            .iter()
            .all(|r| r.status == TruckRequestStatus::Searching)
    );

    engine
        .orders()
        .handle_order_expiry(receipt.order.id)
        .await
        .unwrap();
    let order = engine
        .store()
        .get_order(receipt.order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Expired);
    let requests = engine
        .store()
        .list_requests_by_order(receipt.order.id)
        .await
        .unwrap();
    assert!(
        requests
            .iter()
            .all(|r| r.status == TruckRequestStatus::Expired)
    );
}

#[tokio::test]
async fn already_holding_rejected_but_second_group_allowed() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    seed_transporter(&engine, 2001, &[("open", "17ft"), ("container", "4ton")]).await;

    let receipt = create_order(
        &engine,
        &[("open", "17ft", 2, 15_000), ("container", "4ton", 1, 20_000)],
    )
    .await;
    let order_id = receipt.order.id;

    engine
        .holds()
        .hold(order_id, 2001, &VehicleKey::new("open", "17ft"), 1)
        .await
        .unwrap();
    let err = engine
        .holds()
        .hold(order_id, 2001, &VehicleKey::new("open", "17ft"), 1)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_HOLDING");

    // A different (type, subtype) on the same order is fine.
    engine
        .holds()
        .hold(order_id, 2001, &VehicleKey::new("container", "4ton"), 1)
        .await
        .unwrap();
}

#[tokio::test]
async fn availability_snapshot_tracks_protocol() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    let vehicles = seed_transporter(&engine, 2001, &[("open", "17ft")]).await;
    seed_driver(&engine, 3001, 2001).await;

    let receipt = create_order(&engine, &[("open", "17ft", 2, 15_000)]).await;
    let order_id = receipt.order.id;
    let key = VehicleKey::new("open", "17ft");

    let snapshot = engine.holds().availability(order_id).await.unwrap();
    assert_eq!(snapshot.groups[0].available, 2);
    assert!(!snapshot.is_fully_assigned);

    let hold = engine.holds().hold(order_id, 2001, &key, 1).await.unwrap();
    let snapshot = engine.holds().availability(order_id).await.unwrap();
    assert_eq!(snapshot.groups[0].available, 1);
    assert_eq!(snapshot.groups[0].held, 1);

    engine
        .holds()
        .confirm_with_assignments(
            hold.hold_id,
            2001,
            vec![haulnet::hold::AssignmentInput {
                vehicle_id: vehicles[0],
                driver_id: 3001,
            }],
        )
        .await
        .unwrap();
    let snapshot = engine.holds().availability(order_id).await.unwrap();
    assert_eq!(snapshot.groups[0].assigned, 1);
    assert_eq!(snapshot.groups[0].held, 0);
    assert_eq!(snapshot.groups[0].fare_per_truck, Decimal::from(15_000));
}

#[tokio::test]
async fn released_hold_frees_requests_for_others() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    seed_transporter(&engine, 2001, &[("open", "17ft")]).await;
    seed_transporter(&engine, 2002, &[("open", "17ft")]).await;

    let receipt = create_order(&engine, &[("open", "17ft", 1, 15_000)]).await;
    let order_id = receipt.order.id;
    let key = VehicleKey::new("open", "17ft");

    let hold = engine.holds().hold(order_id, 2001, &key, 1).await.unwrap();
    // The other transporter is boxed out while the hold is live.
    let err = engine.holds().hold(order_id, 2002, &key, 1).await.unwrap_err();
    assert!(err.retryable());

    engine.holds().release(hold.hold_id, Some(2001)).await.unwrap();
    let requests = engine
        .store()
        .list_requests_by_order(order_id)
        .await
        .unwrap();
    assert_eq!(requests[0].status, TruckRequestStatus::Searching);
    assert!(requests[0].held_by.is_none());

    // Now the second transporter can take it.
    engine.holds().hold(order_id, 2002, &key, 1).await.unwrap();
}

#[tokio::test]
async fn route_progression_completes_order_and_frees_fleet() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    let vehicles = seed_transporter(&engine, 2001, &[("open", "17ft")]).await;
    seed_driver(&engine, 3001, 2001).await;

    let mut cmd = order_command(&[("open", "17ft", 1, 15_000)]);
    cmd.stops = vec![Location::new("Kurnool bypass")];
    let receipt = engine.orders().create_order(cmd).await.unwrap();
    let order_id = receipt.order.id;
    assert_eq!(receipt.order.route_points.len(), 3);

    let key = VehicleKey::new("open", "17ft");
    let hold = engine.holds().hold(order_id, 2001, &key, 1).await.unwrap();
    engine
        .holds()
        .confirm_with_assignments(
            hold.hold_id,
            2001,
            vec![haulnet::hold::AssignmentInput {
                vehicle_id: vehicles[0],
                driver_id: 3001,
            }],
        )
        .await
        .unwrap();

    // Stranger cannot read the route; participants can.
    assert!(engine.routes().get_route(order_id, 9999).await.is_err());
    assert!(engine.routes().get_route(order_id, CUSTOMER).await.is_ok());
    assert!(engine.routes().get_route(order_id, 3001).await.is_ok());

    // Reach the intermediate stop.
    let view = engine
        .routes()
        .reached_stop(order_id, 3001, None)
        .await
        .unwrap();
    assert_eq!(view.current_route_index, 1);
    assert_eq!(view.status, OrderStatus::InProgress);
    assert_eq!(view.stop_wait_timers.len(), 1);

    // Re-reporting the same arrival is a no-op.
    let view = engine
        .routes()
        .reached_stop(order_id, 3001, Some(1))
        .await
        .unwrap();
    assert_eq!(view.current_route_index, 1);
    assert_eq!(view.stop_wait_timers.len(), 1);

    // Departure closes the wait timer.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let view = engine.routes().departed_stop(order_id, 3001).await.unwrap();
    let timer = &view.stop_wait_timers[0];
    assert!(timer.departed_at.is_some());
    assert!(timer.wait_seconds.unwrap() >= 0);

    // Reaching the drop completes everything.
    let view = engine
        .routes()
        .reached_stop(order_id, 3001, None)
        .await
        .unwrap();
    assert_eq!(view.status, OrderStatus::Completed);

    let vehicle = engine
        .store()
        .get_vehicle(vehicles[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(vehicle.status, VehicleStatus::Available);
    assert!(vehicle.current_trip_id.is_none());

    let assignments = engine
        .store()
        .list_assignments_by_order(order_id)
        .await
        .unwrap();
    assert_eq!(assignments[0].status, AssignmentStatus::Completed);

    let requests = engine
        .store()
        .list_requests_by_order(order_id)
        .await
        .unwrap();
    assert_eq!(requests[0].status, TruckRequestStatus::Completed);

    // A further report at the final point is a no-op success.
    let view = engine
        .routes()
        .reached_stop(order_id, 3001, None)
        .await
        .unwrap();
    assert_eq!(view.current_route_index, 2);
}

#[tokio::test]
async fn transporter_feed_filters_by_fleet() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    seed_transporter(&engine, 2001, &[("open", "17ft")]).await;
    seed_transporter(&engine, 2002, &[("container", "4ton")]).await;

    let receipt = create_order(
        &engine,
        &[("open", "17ft", 2, 15_000), ("container", "4ton", 1, 20_000)],
    )
    .await;

    let feed = engine
        .orders()
        .active_requests_for_transporter(2001)
        .await
        .unwrap();
    assert_eq!(feed.len(), 2);
    assert!(feed.iter().all(|r| r.vehicle_type == "open"));

    let feed = engine
        .orders()
        .active_requests_for_transporter(2002)
        .await
        .unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].vehicle_type, "container");

    // Held units leave the feed.
    engine
        .holds()
        .hold(receipt.order.id, 2001, &VehicleKey::new("open", "17ft"), 2)
        .await
        .unwrap();
    let feed = engine
        .orders()
        .active_requests_for_transporter(2001)
        .await
        .unwrap();
    assert!(feed.is_empty());
}

#[tokio::test]
async fn confirm_after_order_expiry_is_rejected() {
    let engine = engine();
    seed_customer(&engine, CUSTOMER).await;
    let vehicles = seed_transporter(&engine, 2001, &[("open", "17ft")]).await;
    seed_driver(&engine, 3001, 2001).await;

    let receipt = create_order(&engine, &[("open", "17ft", 1, 15_000)]).await;
    let order_id = receipt.order.id;
    let key = VehicleKey::new("open", "17ft");
    let hold = engine.holds().hold(order_id, 2001, &key, 1).await.unwrap();

    // The expiry timer fires while the transporter is picking a driver.
    engine.orders().handle_order_expiry(order_id).await.unwrap();

    let err = engine
        .holds()
        .confirm_with_assignments(
            hold.hold_id,
            2001,
            vec![haulnet::hold::AssignmentInput {
                vehicle_id: vehicles[0],
                driver_id: 3001,
            }],
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EXPIRED");

    // The request ended expired, not assigned.
    let requests = engine
        .store()
        .list_requests_by_order(order_id)
        .await
        .unwrap();
    assert_eq!(requests[0].status, TruckRequestStatus::Expired);
}
