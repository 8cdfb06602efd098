use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::rest::caller::AdminAccess;
use crate::api::rest::json::ApiJson;
use crate::engine::presence;
use crate::error::AppError;
use crate::models::caller::{CallerContext, Role};
use crate::models::driver::{Driver, VerificationStatus, Vehicle};
use crate::models::earning::Earning;
use crate::models::otp::normalize_mobile;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver))
        .route("/drivers/online", get(list_online))
        .route("/drivers/me", get(current_driver))
        .route("/drivers/me/offline", post(go_offline))
        .route("/drivers/me/earnings", get(list_earnings))
        .route("/drivers/:id/verification", patch(update_verification))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    pub mobile: String,
    #[serde(default)]
    pub email: Option<String>,
    pub vehicle: Vehicle,
    #[serde(default)]
    pub rating: Option<f64>,
}

#[derive(Deserialize)]
pub struct UpdateVerificationRequest {
    pub status: VerificationStatus,
}

#[derive(Serialize)]
pub struct OnlineDriversResponse {
    pub count: usize,
    pub drivers: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct EarningsResponse {
    pub total_orders: u64,
    pub total_earnings: f64,
    pub earnings: Vec<Earning>,
}

fn require_driver(caller: CallerContext) -> Result<(), AppError> {
    if caller.role != Role::Driver {
        return Err(AppError::Forbidden("drivers only".to_string()));
    }
    Ok(())
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<CreateDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }
    if payload.mobile.trim().is_empty() {
        return Err(AppError::Validation("mobile cannot be empty".to_string()));
    }
    if payload.vehicle.plate_number.trim().is_empty() {
        return Err(AppError::Validation("plate number cannot be empty".to_string()));
    }

    let now = Utc::now();
    let driver = Driver {
        id: Uuid::new_v4(),
        name: payload.name.trim().to_string(),
        mobile: normalize_mobile(&payload.mobile),
        email: payload.email.map(|email| email.trim().to_lowercase()),
        vehicle: payload.vehicle,
        rating: payload.rating.unwrap_or(5.0).clamp(0.0, 5.0),
        verification_status: VerificationStatus::Pending,
        is_online: false,
        location: None,
        location_updated_at: None,
        total_orders: 0,
        total_earnings: 0.0,
        created_at: now,
        updated_at: now,
    };

    state.drivers.insert(driver.id, driver.clone());
    Ok(Json(driver))
}

/// Outcome of document review, which happens outside this service.
async fn update_verification(
    State(state): State<Arc<AppState>>,
    _admin: AdminAccess,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<UpdateVerificationRequest>,
) -> Result<Json<Driver>, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    driver.verification_status = payload.status;
    driver.updated_at = Utc::now();
    let snapshot = driver.clone();
    drop(driver);

    info!(driver_id = %id, status = ?payload.status, "driver verification updated");

    if payload.status != VerificationStatus::Approved {
        return Ok(Json(presence::go_offline(&state, id)?));
    }
    Ok(Json(snapshot))
}

async fn list_online(State(state): State<Arc<AppState>>) -> Json<OnlineDriversResponse> {
    let drivers = presence::online_drivers(&state);
    Json(OnlineDriversResponse {
        count: drivers.len(),
        drivers,
    })
}

async fn current_driver(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
) -> Result<Json<Driver>, AppError> {
    require_driver(caller)?;
    state
        .driver(caller.id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("driver {} not found", caller.id)))
}

async fn go_offline(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
) -> Result<Json<Driver>, AppError> {
    require_driver(caller)?;
    Ok(Json(presence::go_offline(&state, caller.id)?))
}

async fn list_earnings(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
) -> Result<Json<EarningsResponse>, AppError> {
    require_driver(caller)?;
    let driver = state
        .driver(caller.id)
        .ok_or_else(|| AppError::NotFound(format!("driver {} not found", caller.id)))?;

    let mut earnings: Vec<Earning> = state
        .earnings
        .iter()
        .filter(|entry| entry.driver_id == caller.id)
        .map(|entry| entry.value().clone())
        .collect();
    earnings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(EarningsResponse {
        total_orders: driver.total_orders,
        total_earnings: driver.total_earnings,
        earnings,
    }))
}
