use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vehicle {
    pub kind: String,
    pub plate_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub mobile: String,
    pub email: Option<String>,
    pub vehicle: Vehicle,
    pub rating: f64,
    pub verification_status: VerificationStatus,
    pub is_online: bool,
    pub location: Option<GeoPoint>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub total_orders: u64,
    pub total_earnings: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn is_approved(&self) -> bool {
        self.verification_status == VerificationStatus::Approved
    }

    pub fn summary(&self) -> DriverSummary {
        DriverSummary {
            id: self.id,
            name: self.name.clone(),
            mobile: self.mobile.clone(),
            vehicle: self.vehicle.clone(),
            rating: self.rating,
        }
    }
}

/// What the ordering user learns about the driver bound to their order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverSummary {
    pub id: Uuid,
    pub name: String,
    pub mobile: String,
    pub vehicle: Vehicle,
    pub rating: f64,
}
