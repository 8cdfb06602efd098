use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::DriverSummary;
use crate::models::order::{OrderStatus, OrderSummary};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EtaTarget {
    Pickup,
    Delivery,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverAssigned {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub pickup_otp: String,
    pub delivery_otp: String,
    pub eta_minutes: Option<u32>,
    pub driver: DriverSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverLocation {
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub eta_minutes: Option<u32>,
    pub eta_type: EtaTarget,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

/// Outbound frames. Subscribers treat every event as a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RealtimeEvent {
    DriverAssigned(DriverAssigned),
    OrderTaken {
        order_id: Uuid,
    },
    OrderStatusUpdate {
        order_id: Uuid,
        status: OrderStatus,
        timestamp: DateTime<Utc>,
    },
    NewOrderAlert(OrderSummary),
    DriverLocation(DriverLocation),
    OrderCancelled {
        order_id: Uuid,
        order_number: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::DriverAssigned(_) => "driver-assigned",
            RealtimeEvent::OrderTaken { .. } => "order-taken",
            RealtimeEvent::OrderStatusUpdate { .. } => "order-status-update",
            RealtimeEvent::NewOrderAlert(_) => "new-order-alert",
            RealtimeEvent::DriverLocation(_) => "driver-location",
            RealtimeEvent::OrderCancelled { .. } => "order-cancelled",
            RealtimeEvent::Error { .. } => "error",
        }
    }
}
