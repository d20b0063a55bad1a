//! Offline providers used when no map API key is configured
//!
//! The planner joins the request points with straight legs, densifies them
//! by interpolation and emits the uncompressed waypoint shape.

use crate::{Geocoder, MapsConfig, MapsError, MapsResult, PlannedRoute, RoutePlanner, RouteRequest};
use async_trait::async_trait;
use delivery_core::polyline::{EncodedPath, WaypointPoint};
use delivery_core::{LatLng, path_length_meters};

/// Straight-line route planner
#[derive(Debug, Clone)]
pub struct OfflinePlanner {
    speed_mps: f64,
    step_meters: f64,
}

impl OfflinePlanner {
    pub fn new(speed_kmh: f64, step_meters: f64) -> Self {
        Self {
            speed_mps: (speed_kmh / 3.6).max(0.1),
            step_meters: step_meters.max(1.0),
        }
    }

    pub fn from_config(config: &MapsConfig) -> Self {
        Self::new(config.offline_speed_kmh, config.offline_step_meters)
    }

    /// Interpolated path through every request point, stops named
    fn densify(&self, request: &RouteRequest) -> Vec<WaypointPoint> {
        let stops = request.all_points();
        let last = stops.len() - 1;
        let mut path = Vec::new();

        for (leg, pair) in stops.windows(2).enumerate() {
            let (from, to) = (pair[0], pair[1]);
            let steps = ((from.distance_to(&to) / self.step_meters).ceil() as usize).max(1);

            if leg == 0 {
                path.push(WaypointPoint::named(from, "origin"));
            }
            for step in 1..steps {
                path.push(WaypointPoint::new(
                    from.interpolate(&to, step as f64 / steps as f64),
                ));
            }
            let name = if leg + 1 == last {
                "destination".to_string()
            } else {
                format!("stop {}", leg + 1)
            };
            path.push(WaypointPoint::named(to, name));
        }

        path
    }
}

impl Default for OfflinePlanner {
    fn default() -> Self {
        Self::from_config(&MapsConfig::default())
    }
}

#[async_trait]
impl RoutePlanner for OfflinePlanner {
    async fn plan_route(&self, request: &RouteRequest) -> MapsResult<PlannedRoute> {
        if let Some(bad) = request.all_points().iter().find(|p| !p.is_valid()) {
            return Err(MapsError::InvalidRequest(format!(
                "invalid coordinate {:?}",
                bad
            )));
        }

        let path = self.densify(request);
        let points: Vec<LatLng> = path.iter().map(|p| LatLng::new(p.lat, p.lng)).collect();
        let distance = path_length_meters(&points);

        let route_data = EncodedPath::Waypoints(path)
            .to_json()
            .map_err(|e| MapsError::decode(e.to_string()))?;

        Ok(PlannedRoute {
            route_data,
            distance_meters: distance.round() as i64,
            duration_seconds: (distance / self.speed_mps).round() as i64,
        })
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}

/// Geocoder that describes a position by its coordinates
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateGeocoder;

#[async_trait]
impl Geocoder for CoordinateGeocoder {
    async fn reverse_geocode(&self, position: LatLng) -> MapsResult<String> {
        Ok(format!(
            "{:.5}, {:.5}",
            position.latitude, position.longitude
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================
