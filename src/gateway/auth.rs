//! Resolved-identity extraction and the capability check at the edge.
//!
//! Sign-in (OTP/JWT) is an external collaborator: requests arrive with the
//! identity already resolved into `x-user-id` and `x-user-role` headers.
//! The core only ever sees `(user_id, role)`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::core_types::UserId;
use crate::models::Role;

use super::types::ApiError;

#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    /// Capability check: the operation requires `role`.
    pub fn require(self, role: Role) -> Result<Self, ApiError> {
        if self.role == role {
            Ok(self)
        } else {
            Err(ApiError::forbidden(format!(
                "operation requires the {} role",
                role.as_str()
            )))
        }
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id: UserId = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ApiError::unauthorized("missing or invalid x-user-id header"))?;
        let role: Role = parts
            .headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ApiError::unauthorized("missing or invalid x-user-role header"))?;
        Ok(Identity { user_id, role })
    }
}
