//! API response envelope and error mapping.
//!
//! All responses follow `{ code, msg, data }`: code is "OK" on success and
//! the stable machine-readable error code otherwise. Contention errors mark
//! themselves retryable so clients can back off and try again.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::error::DispatchError;

/// Unified API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// "OK" for success, stable error code otherwise.
    pub code: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: "OK".to_string(),
            msg: "ok".to_string(),
            data: Some(data),
        }
    }
}

/// Handler return type.
pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

/// 200 OK helper.
#[inline]
pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

/// 201 Created helper.
#[inline]
pub fn created<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

/// Wire error with status, stable code and optional structured details.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retryable: false,
            details: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
    }
}

/// Soft operation timeout. The TTLs on every lock mean a cancelled request
/// leaves nothing behind that will not self-heal.
pub async fn with_timeout<T>(
    timeout_ms: u64,
    fut: impl std::future::Future<Output = Result<T, DispatchError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => {
            let mut err = ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "TIMEOUT",
                "operation timed out, retry after a short backoff",
            );
            err.retryable = true;
            Err(err)
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    msg: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ErrorBody {
            code: self.code,
            msg: self.message,
            retryable: self.retryable,
            details: self.details,
        });
        (self.status, body).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let code = err.code();
        let retryable = err.retryable();
        let status = match &err {
            DispatchError::Validation(_) | DispatchError::InvalidQuantity(_) => {
                StatusCode::BAD_REQUEST
            }
            DispatchError::ActiveOrderExists
            | DispatchError::AlreadyHolding
            | DispatchError::InvalidStatusTransition(_)
            | DispatchError::ConcurrentRequest
            | DispatchError::LockFailed
            | DispatchError::NotEnoughAvailable
            | DispatchError::CancelFailed(_) => StatusCode::CONFLICT,
            DispatchError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::Forbidden | DispatchError::NotAssigned => StatusCode::FORBIDDEN,
            DispatchError::Expired(_) => StatusCode::GONE,
            DispatchError::ValidationFailures(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let details = match &err {
            DispatchError::ValidationFailures(failures) => {
                serde_json::to_value(failures).ok()
            }
            _ => None,
        };

        // Internal detail stays in the logs, not on the wire.
        let message = match &err {
            DispatchError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error surfaced to client");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        Self {
            status,
            code,
            message,
            retryable,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_mapping() {
        let err: ApiError = DispatchError::ActiveOrderExists.into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "ACTIVE_ORDER_EXISTS");
        assert!(!err.retryable);

        let err: ApiError = DispatchError::LockFailed.into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert!(err.retryable);

        let err: ApiError = DispatchError::RateLimitExceeded.into();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);

        let err: ApiError = DispatchError::Expired("hold").into();
        assert_eq!(err.status, StatusCode::GONE);
    }

    #[test]
    fn test_internal_error_is_masked() {
        let err: ApiError = DispatchError::internal("row 42 corrupted").into();
        assert_eq!(err.message, "internal error");
        assert_eq!(err.code, "INTERNAL_ERROR");
    }

    #[test]
    fn test_validation_failures_carry_details() {
        let err: ApiError = DispatchError::ValidationFailures(vec![
            crate::error::AssignmentFailure {
                index: 0,
                vehicle_id: None,
                driver_id: Some(9),
                reason: "driver already on an active trip".to_string(),
            },
        ])
        .into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.details.is_some());
    }
}
