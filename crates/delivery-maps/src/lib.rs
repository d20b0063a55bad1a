//! # Delivery Maps
//!
//! Clients for the two external collaborators of the tracker: the route
//! planning provider and the reverse geocoder. The Tencent Maps web service
//! backs both when an API key is configured; otherwise an offline planner and
//! a coordinate-echo geocoder keep the system usable.

pub mod error;
pub mod offline;
pub mod tencent;

pub use error::{MapsError, MapsResult};
pub use offline::{CoordinateGeocoder, OfflinePlanner};
pub use tencent::TencentClient;

use async_trait::async_trait;
use delivery_core::LatLng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

// ============================================================================
// PROVIDER TRAITS
// ============================================================================

/// Input to a route planning call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub origin: LatLng,
    /// Intermediate stops, in visiting order
    pub waypoints: Vec<LatLng>,
    pub destination: LatLng,
}

impl RouteRequest {
    /// Build a request whose destination is the last stop.
    /// Returns `None` when `stops` is empty.
    pub fn through_stops(origin: LatLng, stops: &[LatLng]) -> Option<Self> {
        let (destination, waypoints) = stops.split_last()?;
        Some(Self {
            origin,
            waypoints: waypoints.to_vec(),
            destination: *destination,
        })
    }

    /// Every point of the request in travel order
    pub fn all_points(&self) -> Vec<LatLng> {
        let mut points = Vec::with_capacity(self.waypoints.len() + 2);
        points.push(self.origin);
        points.extend_from_slice(&self.waypoints);
        points.push(self.destination);
        points
    }
}

/// Result of a route planning call, normalized to meters and seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedRoute {
    /// Encoded polyline as stored on the batch
    pub route_data: String,
    pub distance_meters: i64,
    pub duration_seconds: i64,
}

/// Route planning provider
#[async_trait]
pub trait RoutePlanner: Send + Sync {
    async fn plan_route(&self, request: &RouteRequest) -> MapsResult<PlannedRoute>;

    fn name(&self) -> &'static str;
}

/// Reverse geocoding provider
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse_geocode(&self, position: LatLng) -> MapsResult<String>;
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Default bound on one reverse geocoding call
pub const DEFAULT_GEOCODE_TIMEOUT_MS: u64 = 3_000;

/// Mapping provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapsConfig {
    /// Tencent Maps web service key; offline providers are used without it
    pub api_key: Option<String>,
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Bounds both the geocoder HTTP client and each lookup of a simulation run
    pub geocode_timeout_ms: u64,
    /// Average speed the offline planner assumes
    pub offline_speed_kmh: f64,
    /// Spacing of interpolated offline path points
    pub offline_step_meters: f64,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: tencent::DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 10,
            geocode_timeout_ms: DEFAULT_GEOCODE_TIMEOUT_MS,
            offline_speed_kmh: 30.0,
            offline_step_meters: 50.0,
        }
    }
}

impl MapsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_millis(self.geocode_timeout_ms)
    }

    fn usable_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

/// Provider pair handed to the tracker
#[derive(Clone)]
pub struct Providers {
    pub planner: Arc<dyn RoutePlanner>,
    pub geocoder: Arc<dyn Geocoder>,
    pub geocode_timeout: Duration,
}

/// Build the configured providers, falling back to offline ones without a key
pub fn build_providers(config: &MapsConfig) -> MapsResult<Providers> {
    match config.usable_key() {
        Some(key) => {
            let client = Arc::new(TencentClient::new(key, config)?);
            info!("Using Tencent Maps providers at {}", config.base_url);
            Ok(Providers {
                planner: client.clone(),
                geocoder: client,
                geocode_timeout: config.geocode_timeout(),
            })
        }
        None => {
            warn!("No map API key configured, using offline route planner");
            Ok(Providers {
                planner: Arc::new(OfflinePlanner::from_config(config)),
                geocoder: Arc::new(CoordinateGeocoder),
                geocode_timeout: config.geocode_timeout(),
            })
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
