use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::json::ApiJson;
use crate::engine::acceptance::{self, AvailableOrder};
use crate::engine::checkpoint;
use crate::engine::lifecycle::{self, CreateOrder};
use crate::error::AppError;
use crate::models::caller::CallerContext;
use crate::models::history::StatusHistoryEntry;
use crate::models::order::{OrderStatus, OrderView};
use crate::models::otp::CodeInput;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/available", get(available_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/history", get(order_history))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/status", patch(update_status))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/verify-pickup", post(verify_pickup))
        .route("/orders/:id/verify-delivery", post(verify_delivery))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct CheckpointRequest {
    pub code: CodeInput,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
    ApiJson(payload): ApiJson<CreateOrder>,
) -> Result<Json<OrderView>, AppError> {
    let order = lifecycle::create_order(&state, caller, payload).await?;
    Ok(Json(order.view(true)))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
) -> Json<Vec<OrderView>> {
    Json(lifecycle::orders_for(&state, caller))
}

async fn available_orders(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
) -> Result<Json<Vec<AvailableOrder>>, AppError> {
    Ok(Json(acceptance::available_orders(&state, caller)?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderView>, AppError> {
    Ok(Json(lifecycle::get_order(&state, caller, id)?))
}

async fn order_history(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StatusHistoryEntry>>, AppError> {
    Ok(Json(lifecycle::history(&state, caller, id)?))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderView>, AppError> {
    let order = acceptance::accept_order(&state, caller, id).await?;
    Ok(Json(order.view(false)))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<UpdateStatusRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = lifecycle::advance(&state, caller, id, payload.status).await?;
    Ok(Json(order.view(false)))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<CancelRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = lifecycle::cancel(&state, caller, id, payload.reason).await?;
    let reveal_codes = order.user_id == caller.id;
    Ok(Json(order.view(reveal_codes)))
}

async fn verify_pickup(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<CheckpointRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = checkpoint::verify_pickup(&state, caller, id, &payload.code).await?;
    Ok(Json(order.view(false)))
}

async fn verify_delivery(
    State(state): State<Arc<AppState>>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<CheckpointRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = checkpoint::verify_delivery(&state, caller, id, &payload.code).await?;
    Ok(Json(order.view(false)))
}
