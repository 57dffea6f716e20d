// Caller identity
//
// Beacon sits behind an authenticating gateway that resolves the session
// and forwards the caller's numeric user id in a trusted header. Requests
// without a parsable id are rejected before any handler runs.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

/// Header carrying the gateway-authenticated user id
pub const USER_HEADER: &str = "x-beacon-user";

/// The authenticated caller's user id
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<i64>().ok())
            .map(AuthUser)
            .ok_or((StatusCode::UNAUTHORIZED, "missing or invalid user identity"))
    }
}
