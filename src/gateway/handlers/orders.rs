//! Order control operations.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use validator::Validate;

use crate::core_types::OrderId;
use crate::models::{Order, Role, TruckRequest};
use crate::order::{CancelReceipt, CreateOrderReceipt, OrderDetails, OrderStatusView};

use super::super::auth::Identity;
use super::super::state::AppState;
use super::super::types::response::with_timeout;
use super::super::types::{
    ApiError, ApiResult, CancelOrderRequest, CreateOrderRequest, created, ok,
};

/// POST /api/v1/orders (customer)
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<CreateOrderReceipt> {
    let identity = identity.require(Role::Customer)?;
    req.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let receipt = with_timeout(
        state.engine.config().create_order_timeout_ms,
        state
            .engine
            .orders()
            .create_order(req.into_command(identity.user_id)),
    )
    .await?;
    created(receipt)
}

#[derive(Debug, Serialize)]
pub struct OrderListData {
    pub orders: Vec<Order>,
}

/// GET /api/v1/orders (customer)
pub async fn list_my_orders(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> ApiResult<OrderListData> {
    let identity = identity.require(Role::Customer)?;
    let orders = state
        .engine
        .orders()
        .list_orders_by_customer(identity.user_id)
        .await?;
    ok(OrderListData { orders })
}

/// GET /api/v1/orders/{order_id} (any involved role)
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    _identity: Identity,
    Path(order_id): Path<OrderId>,
) -> ApiResult<OrderDetails> {
    let details = state.engine.orders().get_order_details(order_id).await?;
    ok(details)
}

/// GET /api/v1/orders/{order_id}/status (customer)
pub async fn order_status(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(order_id): Path<OrderId>,
) -> ApiResult<OrderStatusView> {
    let identity = identity.require(Role::Customer)?;
    let details = state.engine.orders().get_order_details(order_id).await?;
    if details.order.customer_id != identity.user_id {
        return Err(ApiError::forbidden("not your order"));
    }
    let view = state.engine.orders().order_status(order_id).await?;
    ok(view)
}

/// POST /api/v1/orders/cancel (customer)
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<CancelOrderRequest>,
) -> ApiResult<CancelReceipt> {
    let identity = identity.require(Role::Customer)?;
    let receipt = state
        .engine
        .orders()
        .cancel_order(req.order_id, identity.user_id, req.reason)
        .await?;
    ok(receipt)
}

#[derive(Debug, Serialize)]
pub struct ActiveRequestsData {
    pub truck_requests: Vec<TruckRequest>,
}

/// GET /api/v1/requests/active (transporter)
pub async fn list_active_requests(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> ApiResult<ActiveRequestsData> {
    let identity = identity.require(Role::Transporter)?;
    let truck_requests = state
        .engine
        .orders()
        .active_requests_for_transporter(identity.user_id)
        .await?;
    ok(ActiveRequestsData { truck_requests })
}
