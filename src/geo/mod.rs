use crate::models::driver::GeoPoint;

const MEAN_EARTH_RADIUS_KM: f64 = 6_371.0;

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let (from_lat, to_lat) = (from.lat.to_radians(), to.lat.to_radians());
    let half_dlat = (to.lat - from.lat).to_radians() / 2.0;
    let half_dlng = (to.lng - from.lng).to_radians() / 2.0;

    let h = half_dlat.sin().powi(2) + from_lat.cos() * to_lat.cos() * half_dlng.sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Minutes needed to cover `distance_km` at `speed_kmh`, rounded up.
pub fn travel_minutes(distance_km: f64, speed_kmh: f64) -> u32 {
    if speed_kmh <= 0.0 {
        return 0;
    }
    (distance_km.max(0.0) / speed_kmh * 60.0).ceil() as u32
}
