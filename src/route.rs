//! Trip route progression and stop wait-time accounting.
//!
//! `current_route_index` advances monotonically over the order's route
//! points, driven by the assigned driver. Reaching the drop completes the
//! order and releases every bound vehicle and assignment.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::core_types::{OrderId, TimestampMs, UserId, now_ms};
use crate::error::{DispatchError, DispatchResult};
use crate::events::messages::RouteProgress;
use crate::events::{Event, EventBus, PushNotification, order_room};
use crate::models::{
    AssignmentStatus, Order, OrderStatus, RoutePoint, RoutePointKind, StopWaitTimer,
    TruckRequestStatus, VehicleStatus,
};
use crate::store::StateStore;

/// Route read model for customers, assigned drivers and transporters.
#[derive(Debug, Clone, Serialize)]
pub struct RouteView {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub current_route_index: u32,
    pub route_points: Vec<RoutePoint>,
    pub stop_wait_timers: Vec<StopWaitTimer>,
}

impl RouteView {
    fn of(order: &Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            current_route_index: order.current_route_index,
            route_points: order.route_points.clone(),
            stop_wait_timers: order.stop_wait_timers.clone(),
        }
    }
}

pub struct RouteProgressService {
    store: Arc<dyn StateStore>,
    bus: Arc<EventBus>,
}

impl RouteProgressService {
    pub fn new(store: Arc<dyn StateStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Advance to the next route point. Idempotent per index: a re-call
    /// reporting an index that is already current (or behind) is a no-op
    /// success, as is a call at the final point.
    pub async fn reached_stop(
        &self,
        order_id: OrderId,
        driver_id: UserId,
        reported_index: Option<u32>,
    ) -> DispatchResult<RouteView> {
        self.require_assigned_driver(order_id, driver_id).await?;
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(DispatchError::NotFound("order"))?;

        if let Some(reported) = reported_index
            && reported <= order.current_route_index
        {
            // Retry of an arrival we already recorded.
            return Ok(RouteView::of(&order));
        }
        if order.at_final_point() || order.status == OrderStatus::Completed {
            return Ok(RouteView::of(&order));
        }

        let now = now_ms();
        let expected = order.current_route_index;
        let advanced = Arc::new(AtomicBool::new(false));
        let advanced_flag = advanced.clone();
        let updated = self
            .store
            .update_order(
                order_id,
                Box::new(move |o| {
                    // Serialized per row; only one concurrent caller moves
                    // the index from `expected`.
                    if o.current_route_index != expected || o.status.is_terminal() {
                        return;
                    }
                    let next = o.current_route_index + 1;
                    if (next as usize) >= o.route_points.len() {
                        return;
                    }
                    o.current_route_index = next;
                    match o.route_points[next as usize].kind {
                        RoutePointKind::Stop => o.stop_wait_timers.push(StopWaitTimer {
                            stop_index: next,
                            arrived_at: now,
                            departed_at: None,
                            wait_seconds: None,
                        }),
                        RoutePointKind::Drop => o.status = OrderStatus::Completed,
                        RoutePointKind::Pickup => {}
                    }
                    if o.status != OrderStatus::Completed && expected == 0 {
                        // Left the pickup: the order is now under way.
                        o.status = OrderStatus::InProgress;
                    }
                    advanced_flag.store(true, Ordering::SeqCst);
                }),
            )
            .await?
            .ok_or(DispatchError::NotFound("order"))?;

        if !advanced.load(Ordering::SeqCst) {
            // Lost the race to another report of the same arrival.
            return Ok(RouteView::of(&updated));
        }

        if expected == 0 {
            self.mark_trip_started(order_id).await;
        }
        if updated.status == OrderStatus::Completed {
            self.complete_order(&updated).await;
        } else {
            let progress = Event::RouteProgressUpdated(RouteProgress {
                order_id,
                current_route_index: updated.current_route_index,
                point_kind: updated.route_points[updated.current_route_index as usize].kind,
                wait_seconds: None,
            });
            self.bus.publish_user(updated.customer_id, progress.clone());
            self.bus.publish_room(&order_room(order_id), progress);
        }

        tracing::info!(
            %order_id,
            driver_id,
            index = updated.current_route_index,
            status = %updated.status,
            "route point reached"
        );
        Ok(RouteView::of(&updated))
    }

    /// Close the wait timer of the stop currently being visited.
    pub async fn departed_stop(
        &self,
        order_id: OrderId,
        driver_id: UserId,
    ) -> DispatchResult<RouteView> {
        self.require_assigned_driver(order_id, driver_id).await?;
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(DispatchError::NotFound("order"))?;

        let now = now_ms();
        let current = order.current_route_index;
        let closed_wait: Arc<std::sync::Mutex<Option<i64>>> =
            Arc::new(std::sync::Mutex::new(None));
        let closed_flag = closed_wait.clone();
        let updated = self
            .store
            .update_order(
                order_id,
                Box::new(move |o| {
                    if let Some(timer) = o
                        .stop_wait_timers
                        .iter_mut()
                        .rev()
                        .find(|t| t.stop_index == current && t.departed_at.is_none())
                    {
                        let wait = wait_seconds(timer.arrived_at, now);
                        timer.departed_at = Some(now);
                        timer.wait_seconds = Some(wait);
                        *closed_flag.lock().unwrap() = Some(wait);
                    }
                }),
            )
            .await?
            .ok_or(DispatchError::NotFound("order"))?;

        let wait = *closed_wait.lock().unwrap();
        if let Some(wait_secs) = wait {
            let progress = Event::RouteProgressUpdated(RouteProgress {
                order_id,
                current_route_index: updated.current_route_index,
                point_kind: updated.route_points[updated.current_route_index as usize].kind,
                wait_seconds: Some(wait_secs),
            });
            self.bus.publish_user(updated.customer_id, progress.clone());
            self.bus.publish_room(&order_room(order_id), progress);
            tracing::info!(%order_id, driver_id, wait_secs, "stop departed");
        }
        Ok(RouteView::of(&updated))
    }

    /// Route read, restricted to the customer, an assigned driver, or an
    /// assigned transporter.
    pub async fn get_route(&self, order_id: OrderId, requester: UserId) -> DispatchResult<RouteView> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(DispatchError::NotFound("order"))?;
        if order.customer_id != requester {
            let assignments = self.store.list_assignments_by_order(order_id).await?;
            let involved = assignments
                .iter()
                .any(|a| a.driver_id == requester || a.transporter_id == requester);
            if !involved {
                return Err(DispatchError::Forbidden);
            }
        }
        Ok(RouteView::of(&order))
    }

    // ------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------

    async fn require_assigned_driver(
        &self,
        order_id: OrderId,
        driver_id: UserId,
    ) -> DispatchResult<()> {
        self.store
            .find_assignment_for_driver_on_order(order_id, driver_id)
            .await?
            .ok_or(DispatchError::NotAssigned)?;
        Ok(())
    }

    /// First advance off the pickup: assignments and filled requests move
    /// to in-transit.
    async fn mark_trip_started(&self, order_id: OrderId) {
        let assignments = self
            .store
            .list_assignments_by_order(order_id)
            .await
            .unwrap_or_default();
        for assignment in assignments {
            if assignment.status.is_active() {
                let _ = self
                    .store
                    .update_assignment(
                        assignment.id,
                        Box::new(|a| a.status = AssignmentStatus::InTransit),
                    )
                    .await;
            }
        }
        let requests = self
            .store
            .list_requests_by_order(order_id)
            .await
            .unwrap_or_default();
        for request in requests {
            if matches!(
                request.status,
                TruckRequestStatus::Assigned | TruckRequestStatus::Accepted
            ) {
                let _ = self
                    .store
                    .cas_truck_request(
                        request.id,
                        &[TruckRequestStatus::Assigned, TruckRequestStatus::Accepted],
                        Box::new(|row| row.status = TruckRequestStatus::InProgress),
                    )
                    .await;
            }
        }
    }

    /// Drop reached: complete assignments and requests, free the vehicles,
    /// tell the customer.
    async fn complete_order(&self, order: &Order) {
        let now = now_ms();
        let assignments = self
            .store
            .list_assignments_by_order(order.id)
            .await
            .unwrap_or_default();
        for assignment in assignments {
            if !assignment.status.is_active() {
                continue;
            }
            let _ = self
                .store
                .update_assignment(
                    assignment.id,
                    Box::new(move |a| {
                        a.status = AssignmentStatus::Completed;
                        a.completed_at = Some(now);
                    }),
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
        }

        let requests = self
            .store
            .list_requests_by_order(order.id)
            .await
            .unwrap_or_default();
        for request in requests {
            if matches!(
                request.status,
                TruckRequestStatus::Assigned
                    | TruckRequestStatus::Accepted
                    | TruckRequestStatus::InProgress
            ) {
                let _ = self
                    .store
                    .cas_truck_request(
                        request.id,
                        &[
                            TruckRequestStatus::Assigned,
                            TruckRequestStatus::Accepted,
                            TruckRequestStatus::InProgress,
                        ],
                        Box::new(|row| row.status = TruckRequestStatus::Completed),
                    )
                    .await;
            }
        }

        let completed = Event::OrderCompleted {
            order_id: order.id,
            stop_wait_timers: order.stop_wait_timers.clone(),
        };
        self.bus.publish_user(order.customer_id, completed.clone());
        self.bus.publish_room(&order_room(order.id), completed);
        self.bus.push(
            &[order.customer_id],
            PushNotification {
                title: "Order completed".to_string(),
                body: format!("Delivery at {} is complete", order.drop.address),
                data: serde_json::json!({
                    "type": "order_completed",
                    "order_id": order.id.to_string(),
                }),
            },
        );
        tracing::info!(order_id = %order.id, "order completed");
    }
}

fn wait_seconds(arrived_at: TimestampMs, departed_at: TimestampMs) -> i64 {
    ((departed_at - arrived_at) / 1000).max(0)
}
