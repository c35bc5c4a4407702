//! Route progress operations.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};

use crate::core_types::OrderId;
use crate::models::Role;
use crate::route::RouteView;

use super::super::auth::Identity;
use super::super::state::AppState;
use super::super::types::{ApiResult, RouteStopRequest, ok};

/// POST /api/v1/route/reached (driver)
pub async fn reached_stop(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<RouteStopRequest>,
) -> ApiResult<RouteView> {
    let identity = identity.require(Role::Driver)?;
    let view = state
        .engine
        .routes()
        .reached_stop(req.order_id, identity.user_id, req.route_index)
        .await?;
    ok(view)
}

/// POST /api/v1/route/departed (driver)
pub async fn departed_stop(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<RouteStopRequest>,
) -> ApiResult<RouteView> {
    let identity = identity.require(Role::Driver)?;
    let view = state
        .engine
        .routes()
        .departed_stop(req.order_id, identity.user_id)
        .await?;
    ok(view)
}

/// GET /api/v1/orders/{order_id}/route (customer, assigned driver or
/// assigned transporter; enforced by the service)
pub async fn get_route(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(order_id): Path<OrderId>,
) -> ApiResult<RouteView> {
    let view = state
        .engine
        .routes()
        .get_route(order_id, identity.user_id)
        .await?;
    ok(view)
}
