//! Engine-wide error taxonomy.
//!
//! Every core operation returns `DispatchResult<T>`. Each variant maps to a
//! stable machine-readable code surfaced on the wire; the contention class
//! is retryable by clients after a short backoff.

use serde::Serialize;
use thiserror::Error;

use crate::core_types::{UserId, VehicleId};

pub type DispatchResult<T> = Result<T, DispatchError>;

/// One rejected entry of an atomic confirm batch.
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentFailure {
    /// Index into the submitted assignments array.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<VehicleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<UserId>,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    // Validation
    #[error("{0}")]
    Validation(String),
    #[error("quantity {0} out of range")]
    InvalidQuantity(u32),

    // Policy
    #[error("customer already has an active order")]
    ActiveOrderExists,
    #[error("order create rate exceeded")]
    RateLimitExceeded,
    #[error("transporter already holds trucks of this type on this order")]
    AlreadyHolding,
    #[error("illegal status transition: {0}")]
    InvalidStatusTransition(String),

    // Contention (retryable)
    #[error("another request for this customer is already in flight")]
    ConcurrentRequest,
    #[error("could not lock the requested trucks")]
    LockFailed,
    #[error("not enough trucks available")]
    NotEnoughAvailable,

    // Not-found / authorization
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("forbidden")]
    Forbidden,
    #[error("caller is not assigned to this order")]
    NotAssigned,

    // Expiry
    #[error("{0} has expired")]
    Expired(&'static str),

    // Batch confirm rejection: the whole batch is refused, nothing written.
    #[error("assignment validation failed ({} failure(s))", .0.len())]
    ValidationFailures(Vec<AssignmentFailure>),

    #[error("cancel failed: {0}")]
    CancelFailed(String),

    // Fatal: the engine guarantees no persisted partial state on this path.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Stable machine-readable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "VALIDATION_ERROR",
            DispatchError::InvalidQuantity(_) => "INVALID_QUANTITY",
            DispatchError::ActiveOrderExists => "ACTIVE_ORDER_EXISTS",
            DispatchError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            DispatchError::AlreadyHolding => "ALREADY_HOLDING",
            DispatchError::InvalidStatusTransition(_) => "INVALID_STATUS_TRANSITION",
            DispatchError::ConcurrentRequest => "CONCURRENT_REQUEST",
            DispatchError::LockFailed => "LOCK_FAILED",
            DispatchError::NotEnoughAvailable => "NOT_ENOUGH_AVAILABLE",
            DispatchError::NotFound(_) => "NOT_FOUND",
            DispatchError::Forbidden => "FORBIDDEN",
            DispatchError::NotAssigned => "NOT_ASSIGNED",
            DispatchError::Expired(_) => "EXPIRED",
            DispatchError::ValidationFailures(_) => "VALIDATION_FAILURES",
            DispatchError::CancelFailed(_) => "CANCEL_FAILED",
            DispatchError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Contention errors are safe to retry after a short backoff.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::ConcurrentRequest
                | DispatchError::LockFailed
                | DispatchError::NotEnoughAvailable
        )
    }

    /// Shorthand used by store/cache adapters.
    pub fn internal(msg: impl Into<String>) -> Self {
        DispatchError::Internal(msg.into())
    }
}
