use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::caller::{CallerContext, Role};
use crate::state::AppState;

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| AppError::Unauthorized(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| AppError::Unauthorized(format!("malformed {name} header")))
}

/// The identity provider in front of this service authenticates the caller
/// and forwards a stable (id, role) pair in trusted headers.
#[async_trait]
impl<S> FromRequestParts<S> for CallerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, CALLER_ID_HEADER)?
            .trim()
            .parse::<Uuid>()
            .map_err(|_| AppError::Unauthorized("caller id is not a uuid".to_string()))?;

        let role = match header(parts, CALLER_ROLE_HEADER)?.trim().to_ascii_lowercase().as_str() {
            "user" => Role::User,
            "driver" => Role::Driver,
            other => {
                return Err(AppError::Unauthorized(format!("unknown caller role {other}")));
            }
        };

        Ok(CallerContext { id, role })
    }
}

/// Proof that the request carries the operator credential from `ADMIN_TOKEN`.
/// Caller headers alone never grant it.
pub struct AdminAccess;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAccess {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let presented = header(parts, ADMIN_TOKEN_HEADER)?.trim();

        match state.config.admin_token.as_deref() {
            Some(expected) if expected == presented => Ok(AdminAccess),
            Some(_) => Err(AppError::Forbidden("invalid admin token".to_string())),
            None => Err(AppError::Forbidden(
                "admin operations are disabled".to_string(),
            )),
        }
    }
}
