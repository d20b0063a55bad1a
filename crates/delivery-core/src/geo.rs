//! Geographic types and calculations for delivery routes

use serde::{Deserialize, Serialize};

/// Earth's radius in meters
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A (latitude, longitude) point in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude in degrees (-90 to 90)
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180)
    pub longitude: f64,
}

impl LatLng {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if this point is a usable coordinate
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Great-circle distance to another point using the Haversine formula.
    /// Returns distance in meters.
    pub fn distance_to(&self, other: &LatLng) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lng = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_METERS * c
    }

    /// Interpolate between two points
    /// fraction: 0.0 = self, 1.0 = other
    pub fn interpolate(&self, other: &LatLng, fraction: f64) -> LatLng {
        let fraction = fraction.clamp(0.0, 1.0);

        LatLng::new(
            self.latitude + (other.latitude - self.latitude) * fraction,
            self.longitude + (other.longitude - self.longitude) * fraction,
        )
    }

    /// Provider query form: "lat,lng"
    pub fn to_query(&self) -> String {
        format!("{:.6},{:.6}", self.latitude, self.longitude)
    }

    /// Convert to (latitude, longitude) tuple
    pub fn to_tuple(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

impl From<(f64, f64)> for LatLng {
    fn from((latitude, longitude): (f64, f64)) -> Self {
        Self::new(latitude, longitude)
    }
}

/// Total length of a path in meters
pub fn path_length_meters(points: &[LatLng]) -> f64 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_calculation() {
        // Beijing to Tianjin (approximately 110 km)
        let beijing = LatLng::new(39.9042, 116.4074);
        let tianjin = LatLng::new(39.3434, 117.3616);

        let distance = beijing.distance_to(&tianjin);
        assert!(distance > 100_000.0 && distance < 120_000.0);
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let p = LatLng::new(31.2304, 121.4737);
        assert_eq!(p.distance_to(&p), 0.0);
    }

    #[test]
    fn test_interpolation() {
        let start = LatLng::new(0.0, 0.0);
        let end = LatLng::new(10.0, 10.0);

        let mid = start.interpolate(&end, 0.5);
        assert!((mid.latitude - 5.0).abs() < 0.01);
        assert!((mid.longitude - 5.0).abs() < 0.01);

        let clamped = start.interpolate(&end, 3.0);
        assert_eq!(clamped, end);
    }

    #[test]
    fn test_position_validity() {
        assert!(LatLng::new(45.0, 90.0).is_valid());
        assert!(!LatLng::new(100.0, 0.0).is_valid());
        assert!(!LatLng::new(0.0, 200.0).is_valid());
        assert!(!LatLng::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_query_format() {
        assert_eq!(LatLng::new(39.9, 116.4).to_query(), "39.900000,116.400000");
    }

    #[test]
    fn test_path_length() {
        let points = vec![
            LatLng::new(0.0, 0.0),
            LatLng::new(0.0, 1.0),
            LatLng::new(0.0, 2.0),
        ];
        let total = path_length_meters(&points);
        let direct = points[0].distance_to(&points[2]);
        assert!((total - direct).abs() < 1.0);
        assert_eq!(path_length_meters(&points[..1]), 0.0);
    }
}
