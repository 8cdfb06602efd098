use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::Driver;
use crate::realtime::hub::EventSink;
use crate::state::AppState;

// Pool membership and the `is_online` flag change together while the
// driver's record is held, so concurrent connections cannot split them.

/// Marks the driver online and adds them to the shared pool channel.
/// Returns the pool membership id of this connection.
pub fn go_online(state: &AppState, driver_id: Uuid, sink: EventSink) -> Result<u64, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    if !driver.is_approved() {
        return Err(AppError::Forbidden("driver is not verified".to_string()));
    }

    let membership = state.hub.join_online_pool(driver_id, sink);
    driver.is_online = true;
    driver.updated_at = Utc::now();
    drop(driver);

    info!(%driver_id, membership, "driver online");
    Ok(membership)
}

/// Clears the online flag and leaves the pool, whichever connection joined it.
pub fn go_offline(state: &AppState, driver_id: Uuid) -> Result<Driver, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    state.hub.leave_online_pool(driver_id);
    driver.is_online = false;
    driver.updated_at = Utc::now();
    let snapshot = driver.clone();
    drop(driver);

    info!(%driver_id, "driver offline");
    Ok(snapshot)
}

/// Disconnect of the connection that holds `membership`. A driver who has
/// since come online through another connection stays online.
pub fn disconnect(state: &AppState, driver_id: Uuid, membership: u64) -> Result<bool, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    if !state.hub.leave_online_pool_if(driver_id, membership) {
        debug!(%driver_id, membership, "stale connection closed; newer membership kept");
        return Ok(false);
    }

    driver.is_online = false;
    driver.updated_at = Utc::now();
    drop(driver);

    info!(%driver_id, "driver offline after disconnect");
    Ok(true)
}

pub fn online_drivers(state: &AppState) -> Vec<Uuid> {
    let mut ids = state.hub.online_driver_ids();
    ids.sort();
    ids
}
