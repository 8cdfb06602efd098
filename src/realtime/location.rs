use chrono::{Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::order::OrderStatus;
use crate::realtime::events::{DriverLocation, EtaTarget, RealtimeEvent};
use crate::realtime::hub::Channel;
use crate::state::AppState;

/// Stores the driver's latest position (last writer wins) and, when the
/// ping names an active order, relays it with a fresh ETA to the order's
/// channel.
pub async fn record_ping(
    state: &AppState,
    driver_id: Uuid,
    order_id: Option<Uuid>,
    position: GeoPoint,
) -> Result<Option<DriverLocation>, AppError> {
    if !position.is_valid() {
        return Err(AppError::Validation("coordinates out of range".to_string()));
    }

    let now = Utc::now();
    {
        let mut driver = state
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
        driver.location = Some(position);
        driver.location_updated_at = Some(now);
    }

    let Some(order_id) = order_id else {
        return Ok(None);
    };

    let order = state
        .order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    if order.driver_id != Some(driver_id) {
        return Err(AppError::Forbidden(
            "only the assigned driver can share location for this order".to_string(),
        ));
    }
    if !order.status.is_active() {
        debug!(%order_id, status = %order.status, "location ping for inactive order ignored");
        return Ok(None);
    }

    let (eta_type, destination) = match order.status {
        OrderStatus::DriverAssigned | OrderStatus::DriverArrived => {
            (EtaTarget::Pickup, order.pickup.location)
        }
        _ => (EtaTarget::Delivery, order.dropoff.location),
    };

    let eta_minutes = match state.routing.estimate(position, destination).await {
        Ok(estimate) => Some(estimate.duration_minutes),
        Err(err) => {
            warn!(%order_id, error = %err, "eta lookup failed");
            None
        }
    };

    let update = DriverLocation {
        order_id,
        driver_id,
        lat: position.lat,
        lng: position.lng,
        eta_minutes,
        eta_type,
        estimated_arrival: eta_minutes.map(|minutes| now + Duration::minutes(i64::from(minutes))),
        timestamp: now,
    };

    state.hub.publish(
        Channel::Order(order_id),
        RealtimeEvent::DriverLocation(update.clone()),
    );

    Ok(Some(update))
}
