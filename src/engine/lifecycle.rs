use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborators::notify;
use crate::engine::checkpoint::generate_code;
use crate::error::AppError;
use crate::models::caller::{CallerContext, Role};
use crate::models::earning::{Earning, EarningsSplit};
use crate::models::history::{ActorRole, StatusHistoryEntry};
use crate::models::order::{Order, OrderStatus, OrderTimeline, OrderView, Place, PriceBreakdown};
use crate::realtime::events::RealtimeEvent;
use crate::realtime::hub::Channel;
use crate::state::AppState;

const MAX_REASON_LEN: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    pub pickup: Place,
    pub dropoff: Place,
    #[serde(default)]
    pub package: serde_json::Value,
    pub price: PriceBreakdown,
}

/// Legality of moving from `current` to `target`, ignoring who asks.
pub fn check_transition(current: OrderStatus, target: OrderStatus) -> Result<(), AppError> {
    if current.is_terminal() {
        return Err(AppError::Conflict(format!("order is already {current}")));
    }

    if target == OrderStatus::Cancelled || current.successor() == Some(target) {
        return Ok(());
    }

    Err(AppError::Conflict(format!(
        "cannot move order from {current} to {target}"
    )))
}

/// Applies a legal transition to a working copy and returns the audit row.
/// Nothing is visible until [`commit`] stores both.
pub(crate) fn apply_transition(
    order: &mut Order,
    target: OrderStatus,
    actor: ActorRole,
    actor_id: Option<Uuid>,
    metadata: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<StatusHistoryEntry, AppError> {
    check_transition(order.status, target)?;

    order.status = target;
    order.timeline.stamp(target, now);
    order.updated_at = now;

    Ok(StatusHistoryEntry::new(
        order.id, target, actor, actor_id, metadata, now,
    ))
}

pub(crate) fn commit(state: &AppState, order: Order, entry: StatusHistoryEntry) {
    state
        .metrics
        .order_transitions_total
        .with_label_values(&[entry.status.as_str()])
        .inc();
    state.history.entry(order.id).or_default().push(entry);
    state.orders.insert(order.id, order);
}

pub(crate) fn publish_status(state: &AppState, order: &Order) {
    state.hub.publish(
        Channel::Order(order.id),
        RealtimeEvent::OrderStatusUpdate {
            order_id: order.id,
            status: order.status,
            timestamp: order.updated_at,
        },
    );
}

fn validate_place(label: &str, place: &Place) -> Result<(), AppError> {
    if place.address.trim().is_empty() {
        return Err(AppError::Validation(format!("{label} address cannot be empty")));
    }
    if !place.location.is_valid() {
        return Err(AppError::Validation(format!(
            "{label} coordinates out of range"
        )));
    }
    Ok(())
}

fn validate_price(price: &PriceBreakdown) -> Result<(), AppError> {
    let amounts = [price.total, price.driver_earning, price.platform_fee];
    if amounts.iter().any(|amount| !amount.is_finite() || *amount < 0.0) {
        return Err(AppError::Validation(
            "price amounts must be non-negative numbers".to_string(),
        ));
    }
    if price.driver_earning > price.total {
        return Err(AppError::Validation(
            "driver earning cannot exceed the order total".to_string(),
        ));
    }
    Ok(())
}

/// Order creation: the order enters `SEARCHING_DRIVER` with both checkpoint
/// codes generated and is announced to the online pool.
pub async fn create_order(
    state: &AppState,
    caller: CallerContext,
    request: CreateOrder,
) -> Result<Order, AppError> {
    if caller.role != Role::User {
        return Err(AppError::Forbidden("only users can place orders".to_string()));
    }
    if state.user(caller.id).is_none() {
        return Err(AppError::NotFound(format!("user {} not found", caller.id)));
    }
    validate_place("pickup", &request.pickup)?;
    validate_place("dropoff", &request.dropoff)?;
    validate_price(&request.price)?;

    let length = state.config.otp_length;
    let pickup_otp = generate_code(length);
    let mut delivery_otp = generate_code(length);
    while delivery_otp == pickup_otp {
        delivery_otp = generate_code(length);
    }

    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4(),
        order_number: state.next_order_number(now),
        user_id: caller.id,
        driver_id: None,
        status: OrderStatus::SearchingDriver,
        pickup: request.pickup,
        dropoff: request.dropoff,
        package: request.package,
        price: request.price,
        pickup_otp,
        delivery_otp,
        pickup_otp_verified: false,
        delivery_otp_verified: false,
        assignment_attempts: 0,
        cancelled_by: None,
        cancellation_reason: None,
        timeline: OrderTimeline::default(),
        created_at: now,
        updated_at: now,
    };

    let entry = StatusHistoryEntry::new(
        order.id,
        OrderStatus::SearchingDriver,
        ActorRole::User,
        Some(caller.id),
        json!({ "order_number": order.order_number }),
        now,
    );
    commit(state, order.clone(), entry);

    info!(
        order_id = %order.id,
        order_number = %order.order_number,
        user_id = %caller.id,
        "order created"
    );

    state.hub.publish(
        Channel::OnlineDrivers,
        RealtimeEvent::NewOrderAlert(order.summary()),
    );

    Ok(order)
}

/// Plain status update by the bound driver. Checkpoint-gated statuses are
/// only reachable through code verification.
pub async fn advance(
    state: &AppState,
    caller: CallerContext,
    order_id: Uuid,
    target: OrderStatus,
) -> Result<Order, AppError> {
    if target.is_checkpoint_gated() {
        return Err(AppError::Conflict(format!(
            "{target} requires checkpoint code verification"
        )));
    }
    if !target.is_driver_advanceable() {
        return Err(AppError::Conflict(format!(
            "{target} cannot be set through a status update"
        )));
    }
    if caller.role != Role::Driver {
        return Err(AppError::Forbidden(
            "only the assigned driver can update order status".to_string(),
        ));
    }

    let guard = state.order_locks.acquire(order_id).await?;
    let mut order = state
        .order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if order.driver_id != Some(caller.id) {
        return Err(AppError::Forbidden(
            "only the assigned driver can update order status".to_string(),
        ));
    }

    let now = Utc::now();
    let entry = apply_transition(
        &mut order,
        target,
        ActorRole::Driver,
        Some(caller.id),
        json!({}),
        now,
    )?;
    commit(state, order.clone(), entry);
    drop(guard);

    info!(order_id = %order.id, status = %order.status, driver_id = %caller.id, "order advanced");
    publish_status(state, &order);

    Ok(order)
}

/// Cancels from any non-terminal status. Callable by the owning user or the
/// bound driver.
pub async fn cancel(
    state: &AppState,
    caller: CallerContext,
    order_id: Uuid,
    reason: Option<String>,
) -> Result<Order, AppError> {
    let reason = reason
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty());
    if reason
        .as_ref()
        .is_some_and(|reason| reason.chars().count() > MAX_REASON_LEN)
    {
        return Err(AppError::Validation(format!(
            "reason cannot exceed {MAX_REASON_LEN} characters"
        )));
    }

    let guard = state.order_locks.acquire(order_id).await?;
    let mut order = state
        .order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    let allowed = match caller.role {
        Role::User => order.user_id == caller.id,
        Role::Driver => order.driver_id == Some(caller.id),
    };
    if !allowed {
        return Err(AppError::Forbidden(
            "only parties to the order can cancel it".to_string(),
        ));
    }

    let previous = order.status;
    let now = Utc::now();
    let entry = apply_transition(
        &mut order,
        OrderStatus::Cancelled,
        caller.actor_role(),
        Some(caller.id),
        json!({ "reason": reason, "previous_status": previous }),
        now,
    )?;
    order.cancelled_by = Some(caller.actor_role());
    order.cancellation_reason = reason;
    commit(state, order.clone(), entry);
    drop(guard);

    info!(
        order_id = %order.id,
        previous_status = %previous,
        cancelled_by = %caller.role,
        "order cancelled"
    );

    publish_status(state, &order);

    if previous == OrderStatus::SearchingDriver {
        state.hub.publish(
            Channel::OnlineDrivers,
            RealtimeEvent::OrderTaken { order_id: order.id },
        );
    }

    if let Some(driver_id) = order.driver_id.filter(|driver_id| *driver_id != caller.id) {
        state.hub.publish(
            Channel::Driver(driver_id),
            RealtimeEvent::OrderCancelled {
                order_id: order.id,
                order_number: order.order_number.clone(),
            },
        );

        if let Some(driver) = state.driver(driver_id) {
            notify::dispatch(
                state.notifier.clone(),
                driver.mobile,
                format!("Order {} was cancelled by the sender.", order.order_number),
            );
        }
    }

    Ok(order)
}

/// Marks the order delivered, credits the bound driver and writes the
/// earning record. Runs under the caller's order lock; the delivery code
/// must already be flagged verified on the working copy.
pub(crate) fn record_terminal_delivery(
    state: &AppState,
    mut order: Order,
    split: EarningsSplit,
    now: DateTime<Utc>,
) -> Result<(Order, Earning), AppError> {
    if !order.pickup_otp_verified || !order.delivery_otp_verified {
        return Err(AppError::Conflict(
            "both checkpoint codes must be verified before delivery".to_string(),
        ));
    }

    let driver_id = order
        .driver_id
        .ok_or_else(|| AppError::Conflict("order has no assigned driver".to_string()))?;
    let mut driver = state
        .drivers
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    let entry = apply_transition(
        &mut order,
        OrderStatus::Delivered,
        ActorRole::Driver,
        Some(driver_id),
        json!({ "checkpoint": "delivery", "driver_amount": split.driver_amount }),
        now,
    )?;

    let earning = Earning {
        id: Uuid::new_v4(),
        order_id: order.id,
        driver_id,
        amount: split.driver_amount,
        platform_fee: split.platform_fee,
        created_at: now,
    };

    driver.total_orders += 1;
    driver.total_earnings += split.driver_amount;
    driver.updated_at = now;
    drop(driver);

    state.earnings.insert(earning.id, earning.clone());
    commit(state, order.clone(), entry);

    Ok((order, earning))
}

pub fn get_order(
    state: &AppState,
    caller: CallerContext,
    order_id: Uuid,
) -> Result<OrderView, AppError> {
    let order = state
        .order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    match caller.role {
        Role::User if order.user_id == caller.id => Ok(order.view(true)),
        Role::Driver if order.driver_id == Some(caller.id) => Ok(order.view(false)),
        _ => Err(AppError::Forbidden(
            "not a party to this order".to_string(),
        )),
    }
}

pub fn orders_for(state: &AppState, caller: CallerContext) -> Vec<OrderView> {
    let mut orders: Vec<OrderView> = state
        .orders
        .iter()
        .filter_map(|entry| {
            let order = entry.value();
            match caller.role {
                Role::User if order.user_id == caller.id => Some(order.view(true)),
                Role::Driver if order.driver_id == Some(caller.id) => Some(order.view(false)),
                _ => None,
            }
        })
        .collect();

    orders.sort_by(|a, b| b.order.created_at.cmp(&a.order.created_at));
    orders
}

pub fn history(
    state: &AppState,
    caller: CallerContext,
    order_id: Uuid,
) -> Result<Vec<StatusHistoryEntry>, AppError> {
    let order = state
        .order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if !order.is_party(caller.id) {
        return Err(AppError::Forbidden(
            "not a party to this order".to_string(),
        ));
    }

    Ok(state.history_for(order_id))
}

/// Logged and skipped when the user record is gone; notifications are advisory.
pub(crate) fn notify_user(state: &AppState, user_id: Uuid, message: String) {
    match state.user(user_id) {
        Some(user) => notify::dispatch(state.notifier.clone(), user.mobile, message),
        None => warn!(%user_id, "cannot notify unknown user"),
    }
}
