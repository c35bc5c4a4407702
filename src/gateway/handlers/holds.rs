//! Reservation protocol operations.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use validator::Validate;

use crate::core_types::{OrderId, VehicleKey};
use crate::hold::{ConfirmReceipt, HoldReceipt, OrderAvailability, SimpleConfirmReceipt};
use crate::models::Role;

use super::super::auth::Identity;
use super::super::state::AppState;
use super::super::types::response::with_timeout;
use super::super::types::{
    ApiError, ApiResult, ConfirmHoldRequest, HoldRequest, ReleaseHoldRequest, ok,
};

/// POST /api/v1/holds (transporter)
pub async fn place_hold(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<HoldRequest>,
) -> ApiResult<HoldReceipt> {
    let identity = identity.require(Role::Transporter)?;
    req.validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let key = VehicleKey::new(req.vehicle_type, req.vehicle_subtype);
    let receipt = with_timeout(
        state.engine.config().hold_timeout_ms,
        state
            .engine
            .holds()
            .hold(req.order_id, identity.user_id, &key, req.quantity),
    )
    .await?;
    ok(receipt)
}

/// Either confirm shape, depending on whether assignments were attached.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ConfirmData {
    Full(ConfirmReceipt),
    Simple(SimpleConfirmReceipt),
}

/// POST /api/v1/holds/confirm (transporter)
///
/// With `assignments` this is the atomic confirm-with-bindings; without,
/// the two-phase simple confirm.
pub async fn confirm_hold(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<ConfirmHoldRequest>,
) -> ApiResult<ConfirmData> {
    let identity = identity.require(Role::Transporter)?;
    let timeout_ms = state.engine.config().confirm_timeout_ms;
    let data = match req.assignments {
        Some(assignments) => ConfirmData::Full(
            with_timeout(
                timeout_ms,
                state.engine.holds().confirm_with_assignments(
                    req.hold_id,
                    identity.user_id,
                    assignments,
                ),
            )
            .await?,
        ),
        None => ConfirmData::Simple(
            with_timeout(
                timeout_ms,
                state.engine.holds().confirm_simple(req.hold_id, identity.user_id),
            )
            .await?,
        ),
    };
    ok(data)
}

#[derive(Debug, Serialize)]
pub struct ReleaseData {
    pub released: bool,
}

/// POST /api/v1/holds/release (transporter)
pub async fn release_hold(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<ReleaseHoldRequest>,
) -> ApiResult<ReleaseData> {
    let identity = identity.require(Role::Transporter)?;
    state
        .engine
        .holds()
        .release(req.hold_id, Some(identity.user_id))
        .await?;
    ok(ReleaseData { released: true })
}

/// GET /api/v1/orders/{order_id}/availability (transporter)
pub async fn availability(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(order_id): Path<OrderId>,
) -> ApiResult<OrderAvailability> {
    identity.require(Role::Transporter)?;
    let snapshot = state.engine.holds().availability(order_id).await?;
    ok(snapshot)
}
