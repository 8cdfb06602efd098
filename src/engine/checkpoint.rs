use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::notify;
use crate::engine::lifecycle::{
    apply_transition, check_transition, commit, notify_user, publish_status,
    record_terminal_delivery,
};
use crate::error::AppError;
use crate::models::caller::{CallerContext, Role};
use crate::models::earning::EarningsSplit;
use crate::models::history::ActorRole;
use crate::models::order::{Order, OrderStatus};
use crate::models::otp::{CodeInput, OtpAttempt, OtpTarget};
use crate::state::AppState;

/// Numeric code of exactly `length` digits, never starting with zero so a
/// numeric submission compares equal to the stored string.
pub fn generate_code(length: u32) -> String {
    let low = 10u64.pow(length.saturating_sub(1));
    let high = 10u64.pow(length);
    let code: u64 = rand::thread_rng().gen_range(low..high);
    code.to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct OtpIssued {
    pub target: OtpTarget,
    pub expires_at: DateTime<Utc>,
    /// Only populated in development mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OtpVerified {
    pub target: OtpTarget,
    pub user_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
}

fn validate_target(target: &OtpTarget) -> Result<OtpTarget, AppError> {
    let target = target.normalized();
    match &target {
        OtpTarget::Mobile(mobile) => {
            let digits = mobile.strip_prefix('+').unwrap_or(mobile);
            let valid = (7..=15).contains(&digits.len())
                && digits.chars().all(|c| c.is_ascii_digit());
            if !valid {
                return Err(AppError::Validation("invalid mobile number".to_string()));
            }
        }
        OtpTarget::Email(email) => {
            let valid = email
                .split_once('@')
                .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
            if !valid {
                return Err(AppError::Validation("invalid email address".to_string()));
            }
        }
    }
    Ok(target)
}

fn linked_accounts(state: &AppState, target: &OtpTarget) -> (Option<Uuid>, Option<Uuid>) {
    let is_match = |mobile: &str, email: Option<&str>| match target {
        OtpTarget::Mobile(wanted) => mobile == wanted.as_str(),
        OtpTarget::Email(wanted) => email.is_some_and(|email| email.eq_ignore_ascii_case(wanted)),
    };

    let user_id = state
        .users
        .iter()
        .find(|entry| is_match(&entry.mobile, entry.email.as_deref()))
        .map(|entry| entry.id);
    let driver_id = state
        .drivers
        .iter()
        .find(|entry| is_match(&entry.mobile, entry.email.as_deref()))
        .map(|entry| entry.id);

    (user_id, driver_id)
}

pub fn issue(state: &AppState, target: &OtpTarget) -> Result<OtpIssued, AppError> {
    issue_at(state, target, Utc::now())
}

/// Stores a fresh login code for `target`. Earlier records stay in place and
/// are superseded, not deleted.
pub fn issue_at(
    state: &AppState,
    target: &OtpTarget,
    now: DateTime<Utc>,
) -> Result<OtpIssued, AppError> {
    let target = validate_target(target)?;
    let (user_id, driver_id) = linked_accounts(state, &target);

    let record = OtpAttempt {
        id: Uuid::new_v4(),
        target: target.clone(),
        code: generate_code(state.config.otp_length),
        expires_at: now + Duration::minutes(state.config.otp_expiry_minutes),
        verified: false,
        attempts: 0,
        user_id,
        driver_id,
        created_at: now,
    };

    let message = format!(
        "Your verification code is {}. It expires in {} minutes.",
        record.code, state.config.otp_expiry_minutes
    );
    notify::dispatch(
        state.notifier.clone(),
        target.destination().to_string(),
        message,
    );

    let issued = OtpIssued {
        target: target.clone(),
        expires_at: record.expires_at,
        code: state.config.otp_expose_codes.then(|| record.code.clone()),
    };

    state.otps.entry(target.clone()).or_default().push(record);
    info!(%target, "login code issued");

    Ok(issued)
}

pub fn verify(
    state: &AppState,
    target: &OtpTarget,
    code: &CodeInput,
) -> Result<OtpVerified, AppError> {
    verify_at(state, target, code, Utc::now())
}

/// Checks `code` against the most recent unexpired, unverified record.
/// A verified record never verifies again.
pub fn verify_at(
    state: &AppState,
    target: &OtpTarget,
    code: &CodeInput,
    now: DateTime<Utc>,
) -> Result<OtpVerified, AppError> {
    let target = validate_target(target)?;
    let submitted = code.normalized();
    if submitted.is_empty() {
        return Err(AppError::Validation("code cannot be empty".to_string()));
    }

    let result = check_login_code(state, &target, &submitted, now);
    record_verification(state, "login", &result);
    result
}

fn check_login_code(
    state: &AppState,
    target: &OtpTarget,
    submitted: &str,
    now: DateTime<Utc>,
) -> Result<OtpVerified, AppError> {
    let max_attempts = state.config.otp_max_attempts;
    let mut records = state
        .otps
        .get_mut(target)
        .ok_or_else(|| AppError::NotFound(format!("no code issued for {target}")))?;

    let record = records
        .iter_mut()
        .rev()
        .find(|record| record.is_usable_at(now))
        .ok_or(AppError::Expired)?;

    if record.attempts >= max_attempts {
        return Err(AppError::RateLimited);
    }

    if record.code != submitted {
        record.attempts += 1;
        debug!(%target, attempts = record.attempts, "login code mismatch");
        return Err(AppError::InvalidCode {
            remaining_attempts: Some(max_attempts - record.attempts),
        });
    }

    record.verified = true;
    Ok(OtpVerified {
        target: target.clone(),
        user_id: record.user_id,
        driver_id: record.driver_id,
    })
}

fn record_verification<T>(state: &AppState, kind: &str, result: &Result<T, AppError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(AppError::InvalidCode { .. }) => "invalid",
        Err(AppError::Expired) => "expired",
        Err(AppError::RateLimited) => "rate_limited",
        Err(AppError::Conflict(_)) => "conflict",
        Err(_) => "error",
    };
    state
        .metrics
        .otp_verifications_total
        .with_label_values(&[kind, outcome])
        .inc();
}

/// Pickup checkpoint: the bound driver submits the code the sender holds.
/// Success moves the order to `PICKED_UP`.
pub async fn verify_pickup(
    state: &AppState,
    caller: CallerContext,
    order_id: Uuid,
    code: &CodeInput,
) -> Result<Order, AppError> {
    let result = confirm_pickup(state, caller, order_id, code).await;
    record_verification(state, "pickup", &result);

    let order = result?;
    info!(order_id = %order.id, driver_id = %caller.id, "pickup confirmed");
    publish_status(state, &order);
    Ok(order)
}

async fn confirm_pickup(
    state: &AppState,
    caller: CallerContext,
    order_id: Uuid,
    code: &CodeInput,
) -> Result<Order, AppError> {
    let submitted = code.normalized();
    let guard = state.order_locks.acquire(order_id).await?;
    let mut order = load_for_checkpoint(state, caller, order_id, &submitted)?;

    if order.pickup_otp_verified {
        return Err(AppError::Conflict("pickup code already verified".to_string()));
    }
    check_transition(order.status, OrderStatus::PickedUp)?;
    if order.pickup_otp != submitted {
        return Err(AppError::InvalidCode {
            remaining_attempts: None,
        });
    }

    order.pickup_otp_verified = true;
    let entry = apply_transition(
        &mut order,
        OrderStatus::PickedUp,
        ActorRole::Driver,
        Some(caller.id),
        json!({ "checkpoint": "pickup" }),
        Utc::now(),
    )?;
    commit(state, order.clone(), entry);
    drop(guard);

    Ok(order)
}

/// Delivery checkpoint: the bound driver submits the recipient's code.
/// Success records the terminal delivery atomically.
pub async fn verify_delivery(
    state: &AppState,
    caller: CallerContext,
    order_id: Uuid,
    code: &CodeInput,
) -> Result<Order, AppError> {
    let result = confirm_delivery(state, caller, order_id, code).await;
    record_verification(state, "delivery", &result);

    let order = result?;
    info!(order_id = %order.id, driver_id = %caller.id, "delivery confirmed");
    publish_status(state, &order);
    notify_user(
        state,
        order.user_id,
        format!("Your order {} has been delivered.", order.order_number),
    );
    Ok(order)
}

async fn confirm_delivery(
    state: &AppState,
    caller: CallerContext,
    order_id: Uuid,
    code: &CodeInput,
) -> Result<Order, AppError> {
    let submitted = code.normalized();
    let guard = state.order_locks.acquire(order_id).await?;
    let mut order = load_for_checkpoint(state, caller, order_id, &submitted)?;

    if order.delivery_otp_verified {
        return Err(AppError::Conflict("delivery code already verified".to_string()));
    }
    check_transition(order.status, OrderStatus::Delivered)?;
    if order.delivery_otp != submitted {
        return Err(AppError::InvalidCode {
            remaining_attempts: None,
        });
    }

    order.delivery_otp_verified = true;
    let split = EarningsSplit::from(&order.price);
    let (order, earning) = record_terminal_delivery(state, order, split, Utc::now())?;
    drop(guard);

    info!(
        order_id = %order.id,
        driver_id = %earning.driver_id,
        amount = earning.amount,
        "driver credited"
    );
    Ok(order)
}

fn load_for_checkpoint(
    state: &AppState,
    caller: CallerContext,
    order_id: Uuid,
    submitted: &str,
) -> Result<Order, AppError> {
    if submitted.is_empty() {
        return Err(AppError::Validation("code cannot be empty".to_string()));
    }
    if caller.role != Role::Driver {
        return Err(AppError::Forbidden(
            "only the assigned driver can confirm checkpoints".to_string(),
        ));
    }

    let order = state
        .order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    if order.driver_id != Some(caller.id) {
        return Err(AppError::Forbidden(
            "only the assigned driver can confirm checkpoints".to_string(),
        ));
    }
    Ok(order)
}

/// Drops login records created before `now - retention`. Returns how many
/// were removed.
pub fn purge_stale(state: &AppState, now: DateTime<Utc>) -> usize {
    let cutoff = now - Duration::minutes(state.config.otp_retention_minutes);
    let mut removed = 0;

    state.otps.retain(|_, records| {
        let before = records.len();
        records.retain(|record| record.created_at >= cutoff);
        removed += before - records.len();
        !records.is_empty()
    });

    removed
}

pub async fn run_housekeeping(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
    info!("otp housekeeping started");

    loop {
        interval.tick().await;
        let removed = purge_stale(&state, Utc::now());
        if removed > 0 {
            info!(removed, "stale login codes purged");
        }
        if state.otps.len() > 100_000 {
            warn!(targets = state.otps.len(), "login code store is unusually large");
        }
    }
}
