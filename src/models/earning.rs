use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::PriceBreakdown;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EarningsSplit {
    pub driver_amount: f64,
    pub platform_fee: f64,
}

impl From<&PriceBreakdown> for EarningsSplit {
    fn from(price: &PriceBreakdown) -> Self {
        Self {
            driver_amount: price.driver_earning,
            platform_fee: price.platform_fee,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Earning {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub amount: f64,
    pub platform_fee: f64,
    pub created_at: DateTime<Utc>,
}
