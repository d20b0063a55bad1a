//! Route polyline codec
//!
//! Route data is stored exactly as the planning provider produced it, as a
//! JSON array in one of two shapes:
//!
//! - **compressed**: flat numbers `[lat0, lng0, d2, d3, d4, ...]` where every
//!   value from index 2 on is a delta, scaled by 1e6, against the already
//!   decoded value two positions earlier;
//! - **waypoints**: the older uncompressed shape, a list of
//!   `{"lat": .., "lng": .., "name": ..}` objects.
//!
//! The shape is resolved once, when the JSON is parsed into [`EncodedPath`].

use crate::error::{CoreError, CoreResult};
use crate::geo::LatLng;
use serde::{Deserialize, Serialize};

/// Scale applied to compressed deltas
const DELTA_SCALE: f64 = 1_000_000.0;

/// One point of the uncompressed waypoint shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointPoint {
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "longitude")]
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl WaypointPoint {
    pub fn new(position: LatLng) -> Self {
        Self {
            lat: position.latitude,
            lng: position.longitude,
            name: None,
        }
    }

    pub fn named(position: LatLng, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(position)
        }
    }
}

/// Stored route data, tagged by shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EncodedPath {
    Compressed(Vec<f64>),
    Waypoints(Vec<WaypointPoint>),
}

impl EncodedPath {
    /// Parse stored route data, detecting its shape
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::Compressed(Vec::new()));
        }
        serde_json::from_str(trimmed)
            .map_err(|e| CoreError::malformed_route(format!("unrecognised route shape: {}", e)))
    }

    /// Serialize back to the stored JSON form
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Compress a point sequence into the delta shape
    pub fn compressed(points: &[LatLng]) -> Self {
        Self::Compressed(compress(points))
    }

    /// Decode into an ordered point sequence
    pub fn decode(&self) -> DecodedPath {
        match self {
            Self::Compressed(values) => DecodedPath::new(decompress(values)),
            Self::Waypoints(points) => DecodedPath::new(
                points
                    .iter()
                    .map(|p| LatLng::new(p.lat, p.lng))
                    .collect(),
            ),
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }
}

/// Ordered (lat, lng) sequence a simulated vehicle traverses
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DecodedPath {
    points: Vec<LatLng>,
}

impl DecodedPath {
    pub fn new(points: Vec<LatLng>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[LatLng] {
        &self.points
    }

    pub fn into_points(self) -> Vec<LatLng> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Clamp an index into the path, returning the index actually used
    pub fn clamp_index(&self, index: usize) -> Option<usize> {
        if self.points.is_empty() {
            None
        } else {
            Some(index.min(self.points.len() - 1))
        }
    }

    /// Point at a clamped index
    pub fn point_at(&self, index: usize) -> Option<LatLng> {
        self.clamp_index(index).map(|i| self.points[i])
    }
}

/// Decode stored route data. Malformed input yields an empty path.
pub fn decode(raw: &str) -> DecodedPath {
    EncodedPath::parse(raw)
        .map(|encoded| encoded.decode())
        .unwrap_or_default()
}

/// Encode points into the compressed JSON form
pub fn encode(points: &[LatLng]) -> String {
    let values = compress(points);
    serde_json::to_string(&values).unwrap_or_else(|_| "[]".to_string())
}

/// Undo delta compression and pair values into points.
/// A trailing unpaired value is dropped.
pub fn decompress(values: &[f64]) -> Vec<LatLng> {
    let mut coords = values.to_vec();
    for i in 2..coords.len() {
        coords[i] = coords[i - 2] + coords[i] / DELTA_SCALE;
    }

    coords
        .chunks_exact(2)
        .map(|pair| LatLng::new(pair[0], pair[1]))
        .collect()
}

/// Inverse of [`decompress`], quantized to 1e-6 degrees
pub fn compress(points: &[LatLng]) -> Vec<f64> {
    let quantized: Vec<i64> = points
        .iter()
        .flat_map(|p| [p.latitude, p.longitude])
        .map(|v| (v * DELTA_SCALE).round() as i64)
        .collect();

    quantized
        .iter()
        .enumerate()
        .map(|(i, &q)| {
            if i < 2 {
                q as f64 / DELTA_SCALE
            } else {
                (q - quantized[i - 2]) as f64
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: LatLng, lat: f64, lng: f64) {
        assert!(
            (actual.latitude - lat).abs() < 1e-9 && (actual.longitude - lng).abs() < 1e-9,
            "expected ({}, {}), got {:?}",
            lat,
            lng,
            actual
        );
    }

    #[test]
    fn test_decode_compressed_sample() {
        let path = decode("[39.9, 116.4, 100, -200, -50, 300]");

        assert_eq!(path.len(), 3);
        let points = path.points();
        assert_close(points[0], 39.9, 116.4);
        assert_close(points[1], 39.9001, 116.3998);
        assert_close(points[2], 39.90005, 116.4001);
        assert!(points.iter().all(|p| p.latitude.is_finite() && p.longitude.is_finite()));
    }

    #[test]
    fn test_decode_is_idempotent() {
        let raw = "[31.2304, 121.4737, 512, -128, 64, 2048, -4000, 10]";
        assert_eq!(decode(raw), decode(raw));
    }

    #[test]
    fn test_odd_length_drops_trailing_value() {
        let path = decode("[39.9, 116.4, 100, -200, 77]");
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn test_empty_and_malformed_inputs() {
        assert!(decode("").is_empty());
        assert!(decode("[]").is_empty());
        assert!(decode("not json").is_empty());
        assert!(decode("{\"lat\": 1}").is_empty());
        assert!(decode("[1.0, {\"lat\": 1, \"lng\": 2}]").is_empty());
    }

    #[test]
    fn test_decode_waypoint_shape() {
        let raw = r#"[{"lat": 39.9, "lng": 116.4, "name": "Depot"},
                      {"latitude": 39.95, "longitude": 116.45}]"#;

        let encoded = EncodedPath::parse(raw).unwrap();
        assert!(!encoded.is_compressed());

        let path = encoded.decode();
        assert_eq!(path.len(), 2);
        assert_close(path.points()[0], 39.9, 116.4);
        assert_close(path.points()[1], 39.95, 116.45);
    }

    #[test]
    fn test_integer_values_parse_as_compressed() {
        let encoded = EncodedPath::parse("[40, 116, 1000000, 0]").unwrap();
        assert!(encoded.is_compressed());
        let path = encoded.decode();
        assert_close(path.points()[1], 41.0, 116.0);
    }

    #[test]
    fn test_encode_then_decode_matches_quantized_input() {
        let points = vec![
            LatLng::new(39.984154, 116.307490),
            LatLng::new(39.984200, 116.307512),
            LatLng::new(39.983901, 116.308001),
        ];

        let decoded = decode(&encode(&points));
        assert_eq!(decoded.len(), points.len());
        for (a, b) in decoded.points().iter().zip(&points) {
            assert!((a.latitude - b.latitude).abs() < 1e-6);
            assert!((a.longitude - b.longitude).abs() < 1e-6);
        }
    }

    #[test]
    fn test_clamped_lookup() {
        let path = decode("[39.9, 116.4, 100, -200, -50, 300]");
        assert_eq!(path.clamp_index(1), Some(1));
        assert_eq!(path.clamp_index(99), Some(2));
        assert_eq!(path.point_at(99), Some(path.points()[2]));
        assert_eq!(DecodedPath::default().point_at(0), None);
    }
}
