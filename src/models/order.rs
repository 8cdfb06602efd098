use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;
use crate::models::history::ActorRole;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    SearchingDriver,
    DriverAssigned,
    DriverArrived,
    PickedUp,
    InTransit,
    ReachedDestination,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Canonical forward path. `Cancelled` sits outside it.
    pub const LIFECYCLE: [OrderStatus; 7] = [
        OrderStatus::SearchingDriver,
        OrderStatus::DriverAssigned,
        OrderStatus::DriverArrived,
        OrderStatus::PickedUp,
        OrderStatus::InTransit,
        OrderStatus::ReachedDestination,
        OrderStatus::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::SearchingDriver => "SEARCHING_DRIVER",
            OrderStatus::DriverAssigned => "DRIVER_ASSIGNED",
            OrderStatus::DriverArrived => "DRIVER_ARRIVED",
            OrderStatus::PickedUp => "PICKED_UP",
            OrderStatus::InTransit => "IN_TRANSIT",
            OrderStatus::ReachedDestination => "REACHED_DESTINATION",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Bound to a driver and not yet finished.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != OrderStatus::SearchingDriver
    }

    pub fn successor(&self) -> Option<OrderStatus> {
        let position = Self::LIFECYCLE.iter().position(|status| status == self)?;
        Self::LIFECYCLE.get(position + 1).copied()
    }

    /// Transitions that only a verified checkpoint code may perform.
    pub fn is_checkpoint_gated(&self) -> bool {
        matches!(self, OrderStatus::PickedUp | OrderStatus::Delivered)
    }

    /// Statuses a bound driver may request through a plain status update.
    pub fn is_driver_advanceable(&self) -> bool {
        matches!(
            self,
            OrderStatus::DriverArrived | OrderStatus::InTransit | OrderStatus::ReachedDestination
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Place {
    pub address: String,
    pub location: GeoPoint,
}

/// Price computed upstream; only the driver/platform split is read here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBreakdown {
    pub total: f64,
    pub driver_earning: f64,
    pub platform_fee: f64,
    #[serde(default)]
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderTimeline {
    pub assigned_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub in_transit_at: Option<DateTime<Utc>>,
    pub reached_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl OrderTimeline {
    /// Sets the timestamp owned by `status` unless it was already set.
    pub fn stamp(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        let slot = match status {
            OrderStatus::SearchingDriver => return,
            OrderStatus::DriverAssigned => &mut self.assigned_at,
            OrderStatus::DriverArrived => &mut self.arrived_at,
            OrderStatus::PickedUp => &mut self.picked_up_at,
            OrderStatus::InTransit => &mut self.in_transit_at,
            OrderStatus::ReachedDestination => &mut self.reached_at,
            OrderStatus::Delivered => &mut self.delivered_at,
            OrderStatus::Cancelled => &mut self.cancelled_at,
        };
        slot.get_or_insert(at);
    }
}

/// Checkpoint codes are not serialized with the order; see [`OrderView`].
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub status: OrderStatus,
    pub pickup: Place,
    pub dropoff: Place,
    pub package: serde_json::Value,
    pub price: PriceBreakdown,
    #[serde(skip_serializing)]
    pub pickup_otp: String,
    #[serde(skip_serializing)]
    pub delivery_otp: String,
    pub pickup_otp_verified: bool,
    pub delivery_otp_verified: bool,
    pub assignment_attempts: u32,
    pub cancelled_by: Option<ActorRole>,
    pub cancellation_reason: Option<String>,
    #[serde(flatten)]
    pub timeline: OrderTimeline,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_party(&self, party_id: Uuid) -> bool {
        self.user_id == party_id || self.driver_id == Some(party_id)
    }

    pub fn view(&self, reveal_codes: bool) -> OrderView {
        OrderView {
            pickup_otp: reveal_codes.then(|| self.pickup_otp.clone()),
            delivery_otp: reveal_codes.then(|| self.delivery_otp.clone()),
            order: self.clone(),
        }
    }

    pub fn summary(&self) -> OrderSummary {
        OrderSummary {
            id: self.id,
            order_number: self.order_number.clone(),
            status: self.status,
            pickup: self.pickup.clone(),
            dropoff: self.dropoff.clone(),
            package: self.package.clone(),
            price: self.price.clone(),
            created_at: self.created_at,
        }
    }
}

/// Order as returned to a party; codes are present only for the owning user.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_otp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_otp: Option<String>,
}

/// Code-free projection offered to the pool of online drivers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSummary {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub pickup: Place,
    pub dropoff: Place,
    pub package: serde_json::Value,
    pub price: PriceBreakdown,
    pub created_at: DateTime<Utc>,
}
