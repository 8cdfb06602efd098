use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::geo::{haversine_km, travel_minutes};
use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub duration_minutes: u32,
}

/// Distance and travel time between two coordinates.
#[async_trait]
pub trait RoutingService: Send + Sync {
    async fn estimate(&self, origin: GeoPoint, destination: GeoPoint)
        -> Result<RouteEstimate, AppError>;
}

/// Straight-line estimate at a fixed average speed. Used when no map
/// provider is configured.
#[derive(Debug, Clone)]
pub struct HaversineRouting {
    average_speed_kmh: f64,
}

impl HaversineRouting {
    pub fn new(average_speed_kmh: f64) -> Self {
        Self { average_speed_kmh }
    }
}

#[async_trait]
impl RoutingService for HaversineRouting {
    async fn estimate(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<RouteEstimate, AppError> {
        if !origin.is_valid() || !destination.is_valid() {
            return Err(AppError::Validation("coordinates out of range".to_string()));
        }

        let distance_km = haversine_km(&origin, &destination);
        Ok(RouteEstimate {
            distance_km,
            duration_minutes: travel_minutes(distance_km, self.average_speed_kmh),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{HaversineRouting, RoutingService};
    use crate::models::driver::GeoPoint;

    #[tokio::test]
    async fn same_point_takes_no_time() {
        let routing = HaversineRouting::new(25.0);
        let point = GeoPoint {
            lat: 52.52,
            lng: 13.405,
        };

        let estimate = routing.estimate(point, point).await.unwrap();
        assert_eq!(estimate.duration_minutes, 0);
        assert!(estimate.distance_km < 1e-9);
    }

    #[tokio::test]
    async fn rejects_invalid_coordinates() {
        let routing = HaversineRouting::new(25.0);
        let bad = GeoPoint {
            lat: 123.0,
            lng: 0.0,
        };
        let good = GeoPoint { lat: 0.0, lng: 0.0 };

        assert!(routing.estimate(bad, good).await.is_err());
    }
}
