use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::json::ApiJson;
use crate::engine::checkpoint::{self, OtpIssued, OtpVerified};
use crate::error::AppError;
use crate::models::otp::{normalize_mobile, CodeInput, OtpTarget};
use crate::models::user::User;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", post(create_user))
        .route("/auth/otp", post(request_otp))
        .route("/auth/otp/verify", post(verify_otp))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub mobile: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    #[serde(flatten)]
    pub target: OtpTarget,
    pub code: CodeInput,
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<CreateUserRequest>,
) -> Result<Json<User>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }
    if payload.mobile.trim().is_empty() {
        return Err(AppError::Validation("mobile cannot be empty".to_string()));
    }

    let user = User {
        id: Uuid::new_v4(),
        name: payload.name.trim().to_string(),
        mobile: normalize_mobile(&payload.mobile),
        email: payload.email.map(|email| email.trim().to_lowercase()),
        created_at: Utc::now(),
    };

    state.users.insert(user.id, user.clone());
    Ok(Json(user))
}

async fn request_otp(
    State(state): State<Arc<AppState>>,
    ApiJson(target): ApiJson<OtpTarget>,
) -> Result<Json<OtpIssued>, AppError> {
    Ok(Json(checkpoint::issue(&state, &target)?))
}

async fn verify_otp(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<VerifyOtpRequest>,
) -> Result<Json<OtpVerified>, AppError> {
    Ok(Json(checkpoint::verify(&state, &payload.target, &payload.code)?))
}
