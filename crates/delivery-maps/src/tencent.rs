//! Tencent Maps web service client
//!
//! Driving directions come back with distance in meters, duration in
//! minutes and a delta-compressed polyline. Duration is converted to seconds
//! here so nothing downstream sees minutes.

use crate::{Geocoder, MapsConfig, MapsError, MapsResult, PlannedRoute, RoutePlanner, RouteRequest};
use async_trait::async_trait;
use delivery_core::LatLng;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://apis.map.qq.com";

const DIRECTION_PATH: &str = "/ws/direction/v1/driving/";
const GEOCODER_PATH: &str = "/ws/geocoder/v1/";

#[derive(Debug, Deserialize)]
struct DirectionResponse {
    status: i64,
    #[serde(default)]
    message: String,
    result: Option<DirectionResult>,
}

#[derive(Debug, Deserialize)]
struct DirectionResult {
    #[serde(default)]
    routes: Vec<DirectionRoute>,
}

#[derive(Debug, Deserialize)]
struct DirectionRoute {
    /// Meters
    distance: f64,
    /// Minutes
    duration: f64,
    #[serde(default)]
    polyline: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct GeocoderResponse {
    status: i64,
    #[serde(default)]
    message: String,
    result: Option<GeocoderResult>,
}

#[derive(Debug, Deserialize)]
struct GeocoderResult {
    address: Option<String>,
    formatted_addresses: Option<FormattedAddresses>,
}

#[derive(Debug, Deserialize)]
struct FormattedAddresses {
    recommend: Option<String>,
}

/// Client for the direction and geocoder endpoints
#[derive(Debug, Clone)]
pub struct TencentClient {
    client: Client,
    geocode_client: Client,
    base_url: String,
    api_key: String,
}

impl TencentClient {
    pub fn new(api_key: impl Into<String>, config: &MapsConfig) -> MapsResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| MapsError::Http(format!("failed to build HTTP client: {}", e)))?;
        let geocode_client = Client::builder()
            .timeout(config.geocode_timeout())
            .build()
            .map_err(|e| MapsError::Http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            geocode_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn direction_url(&self, request: &RouteRequest) -> MapsResult<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, DIRECTION_PATH))
            .map_err(|e| MapsError::InvalidRequest(format!("bad base url: {}", e)))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("from", &request.origin.to_query())
                .append_pair("to", &request.destination.to_query());
            if !request.waypoints.is_empty() {
                let waypoints = request
                    .waypoints
                    .iter()
                    .map(LatLng::to_query)
                    .collect::<Vec<_>>()
                    .join(";");
                pairs.append_pair("waypoints", &waypoints);
            }
            pairs
                .append_pair("key", &self.api_key)
                .append_pair("output", "json");
        }

        Ok(url)
    }

    fn geocoder_url(&self, position: LatLng) -> MapsResult<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, GEOCODER_PATH))
            .map_err(|e| MapsError::InvalidRequest(format!("bad base url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("location", &position.to_query())
            .append_pair("key", &self.api_key);
        Ok(url)
    }
}

fn parse_direction(response: DirectionResponse) -> MapsResult<PlannedRoute> {
    if response.status != 0 {
        return Err(MapsError::api(response.status, response.message));
    }

    let route = response
        .result
        .and_then(|r| r.routes.into_iter().next())
        .ok_or(MapsError::EmptyRoute)?;

    if route.polyline.len() < 2 {
        return Err(MapsError::EmptyRoute);
    }

    let route_data = serde_json::to_string(&route.polyline)
        .map_err(|e| MapsError::decode(e.to_string()))?;

    Ok(PlannedRoute {
        route_data,
        distance_meters: route.distance.round() as i64,
        duration_seconds: (route.duration * 60.0).round() as i64,
    })
}

fn parse_geocoder(response: GeocoderResponse) -> MapsResult<String> {
    if response.status != 0 {
        return Err(MapsError::api(response.status, response.message));
    }

    response
        .result
        .and_then(|r| {
            r.formatted_addresses
                .and_then(|f| f.recommend)
                .filter(|s| !s.is_empty())
                .or(r.address)
        })
        .filter(|s| !s.is_empty())
        .ok_or_else(|| MapsError::decode("geocoder returned no address"))
}

#[async_trait]
impl RoutePlanner for TencentClient {
    async fn plan_route(&self, request: &RouteRequest) -> MapsResult<PlannedRoute> {
        let url = self.direction_url(request)?;
        debug!(
            "Requesting driving route with {} waypoints",
            request.waypoints.len()
        );

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Direction request failed with HTTP {}", status);
            return Err(MapsError::Http(format!("HTTP {}", status)));
        }

        let parsed: DirectionResponse = response.json().await?;
        parse_direction(parsed)
    }

    fn name(&self) -> &'static str {
        "tencent"
    }
}

#[async_trait]
impl Geocoder for TencentClient {
    async fn reverse_geocode(&self, position: LatLng) -> MapsResult<String> {
        let url = self.geocoder_url(position)?;
        let response = self.geocode_client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MapsError::Http(format!("HTTP {}", status)));
        }

        let parsed: GeocoderResponse = response.json().await?;
        parse_geocoder(parsed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
