//! Caller identity
//!
//! Authentication happens upstream; these routes trust the user ID they are
//! handed in the `x-user-id` header.

use axum::{extract::FromRequestParts, http::request::Parts, http::StatusCode, Json};

use super::ErrorResponse;

/// Header carrying the authenticated user ID
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated user ID extracted from the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(|user| UserId(user.to_string()))
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse {
                        error: format!("missing {} header", USER_ID_HEADER),
                    }),
                )
            })
    }
}
