use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use uuid::Uuid;

/// Header set by the upstream auth gateway once the caller is authenticated.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller. Authentication itself happens upstream; this only
/// reads the identity it forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser { user_id })
    }
}
