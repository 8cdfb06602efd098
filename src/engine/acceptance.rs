use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::{apply_transition, commit, notify_user, publish_status};
use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::caller::{CallerContext, Role};
use crate::models::driver::Driver;
use crate::models::history::ActorRole;
use crate::models::order::{Order, OrderStatus, OrderSummary};
use crate::realtime::events::{DriverAssigned, RealtimeEvent};
use crate::realtime::hub::Channel;
use crate::state::AppState;

pub const ALREADY_ASSIGNED: &str = "order already assigned to another driver";

/// Binds the calling driver to `order_id`. At most one driver ever wins;
/// every loser gets a `Conflict`.
pub async fn accept_order(
    state: &AppState,
    caller: CallerContext,
    order_id: Uuid,
) -> Result<Order, AppError> {
    let start = Instant::now();
    let result = bind_driver(state, caller, order_id).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(AppError::Conflict(_)) => "conflict",
        Err(_) => "rejected",
    };
    state
        .metrics
        .acceptance_latency_seconds
        .with_label_values(&[outcome])
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .acceptances_total
        .with_label_values(&[outcome])
        .inc();

    let (order, driver) = result?;
    announce_assignment(state, &order, &driver).await;
    Ok(order)
}

fn eligible_driver(state: &AppState, caller: CallerContext) -> Result<Driver, AppError> {
    if caller.role != Role::Driver {
        return Err(AppError::Forbidden("only drivers can accept orders".to_string()));
    }

    let driver = state
        .driver(caller.id)
        .ok_or_else(|| AppError::NotFound(format!("driver {} not found", caller.id)))?;

    if !driver.is_approved() {
        return Err(AppError::Forbidden("driver is not verified".to_string()));
    }
    if !driver.is_online {
        return Err(AppError::Forbidden(
            "driver must be online to accept orders".to_string(),
        ));
    }

    Ok(driver)
}

/// The acceptance unit of work. The driver lock keeps one driver from
/// winning two orders at once; the order lock serializes competing drivers.
/// Both are released when this returns, before any broadcast.
async fn bind_driver(
    state: &AppState,
    caller: CallerContext,
    order_id: Uuid,
) -> Result<(Order, Driver), AppError> {
    let driver = eligible_driver(state, caller)?;

    let _driver_guard = state.driver_locks.acquire(driver.id).await?;
    if let Some(active) = state.active_order_for_driver(driver.id) {
        return Err(AppError::Conflict(format!(
            "driver already has an active order {active}"
        )));
    }

    let _order_guard = state.order_locks.acquire(order_id).await?;
    let mut order = state
        .order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if order.driver_id.is_some() {
        return Err(AppError::Conflict(ALREADY_ASSIGNED.to_string()));
    }
    if order.status != OrderStatus::SearchingDriver {
        return Err(AppError::Conflict(format!(
            "order is no longer available ({})",
            order.status
        )));
    }

    let now = Utc::now();
    order.driver_id = Some(driver.id);
    order.assignment_attempts += 1;
    let metadata = json!({ "assignment_attempt": order.assignment_attempts });
    let entry = apply_transition(
        &mut order,
        OrderStatus::DriverAssigned,
        ActorRole::Driver,
        Some(driver.id),
        metadata,
        now,
    )?;
    commit(state, order.clone(), entry);

    info!(order_id = %order.id, driver_id = %driver.id, "order accepted");
    Ok((order, driver))
}

async fn announce_assignment(state: &AppState, order: &Order, driver: &Driver) {
    let eta_minutes = match driver.location {
        Some(origin) => match state.routing.estimate(origin, order.pickup.location).await {
            Ok(estimate) => Some(estimate.duration_minutes),
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "eta lookup failed");
                None
            }
        },
        None => None,
    };

    state.hub.publish(
        Channel::User(order.user_id),
        RealtimeEvent::DriverAssigned(DriverAssigned {
            order_id: order.id,
            order_number: order.order_number.clone(),
            status: order.status,
            pickup_otp: order.pickup_otp.clone(),
            delivery_otp: order.delivery_otp.clone(),
            eta_minutes,
            driver: driver.summary(),
        }),
    );
    state.hub.publish(
        Channel::OnlineDrivers,
        RealtimeEvent::OrderTaken { order_id: order.id },
    );
    publish_status(state, order);

    notify_user(
        state,
        order.user_id,
        format!(
            "{} ({} {}) accepted order {}. Share pickup code {} with the driver.",
            driver.name,
            driver.vehicle.kind,
            driver.vehicle.plate_number,
            order.order_number,
            order.pickup_otp
        ),
    );
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableOrder {
    #[serde(flatten)]
    pub order: OrderSummary,
    pub distance_km: Option<f64>,
}

/// Orders still searching for a driver, nearest first, within the match
/// radius of the driver's last known position.
pub fn available_orders(
    state: &AppState,
    caller: CallerContext,
) -> Result<Vec<AvailableOrder>, AppError> {
    let driver = eligible_driver(state, caller)?;
    let radius_km = state.config.match_radius_km;

    let mut available: Vec<AvailableOrder> = state
        .orders
        .iter()
        .filter(|entry| entry.status == OrderStatus::SearchingDriver)
        .filter_map(|entry| {
            let distance_km = driver
                .location
                .map(|position| haversine_km(&position, &entry.pickup.location));
            if distance_km.is_some_and(|distance| distance > radius_km) {
                return None;
            }
            Some(AvailableOrder {
                order: entry.summary(),
                distance_km,
            })
        })
        .collect();

    available.sort_by(|a, b| match (a.distance_km, b.distance_km) {
        (Some(a_km), Some(b_km)) => a_km.total_cmp(&b_km),
        _ => a.order.created_at.cmp(&b.order.created_at),
    });

    Ok(available)
}
