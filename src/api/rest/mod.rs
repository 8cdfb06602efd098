pub mod caller;
pub mod drivers;
pub mod json;
pub mod orders;
pub mod users;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::models::order::OrderStatus;
use crate::state::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(users::router())
        .merge(drivers::router())
        .merge(orders::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    users: usize,
    drivers: usize,
    online_drivers: usize,
    orders: usize,
    searching_orders: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    let searching_orders = state
        .orders
        .iter()
        .filter(|order| order.status == OrderStatus::SearchingDriver)
        .count();

    Json(Health {
        status: "ok",
        users: state.users.len(),
        drivers: state.drivers.len(),
        online_drivers: state.hub.online_driver_ids().len(),
        orders: state.orders.len(),
        searching_orders,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    state.metrics.encode().map_or_else(
        |err| (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
        |body| ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
    )
}
