use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("code expired or not issued")]
    Expired,

    #[error("too many attempts, request a new code")]
    RateLimited,

    #[error("invalid code")]
    InvalidCode { remaining_attempts: Option<u32> },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wire-level taxonomy string reported alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Expired => "EXPIRED",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::InvalidCode { .. } => "INVALID_CODE",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Expired => StatusCode::GONE,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::InvalidCode { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message without the variant prefix, as shown to clients.
    pub fn message(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::Unauthorized(msg)
            | AppError::NotFound(msg)
            | AppError::Forbidden(msg)
            | AppError::Conflict(msg)
            | AppError::Internal(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message(),
            "code": self.code(),
        });

        if let AppError::InvalidCode {
            remaining_attempts: Some(remaining),
        } = &self
        {
            body["remaining_attempts"] = json!(remaining);
        }

        (self.status(), Json(body)).into_response()
    }
}
