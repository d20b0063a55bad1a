//! Read-side snapshots
//!
//! Each snapshot is a point-in-time view assembled per request. Values are
//! unrounded; presentation rounding happens in the HTTP layer.

use chrono::{DateTime, Utc};
use delivery_core::{
    Batch, BatchId, BatchStatus, DecodedPath, LatLng, OrderId, RouteProgress, Warehouse,
};
use serde::{Deserialize, Serialize};

/// Current position and progress of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSnapshot {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub position: LatLng,
    /// Address of the most recent location sample
    pub address: Option<String>,
    /// Index actually used, clamped into the path
    pub current_index: usize,
    pub path_length: usize,
    pub progress: RouteProgress,
    pub timestamp: DateTime<Utc>,
}

impl LocationSnapshot {
    /// Compose a snapshot from a batch and its decoded, non-empty path
    pub fn compose(batch: &Batch, path: &DecodedPath, address: Option<String>) -> Option<Self> {
        let index = path.clamp_index(batch.current_index as usize)?;
        let position = path.point_at(index)?;

        Some(Self {
            batch_id: batch.id,
            status: batch.status,
            position,
            address,
            current_index: index,
            path_length: path.len(),
            progress: RouteProgress::compute(
                index,
                path.len(),
                batch.total_distance_meters as f64,
                batch.total_duration_seconds as f64,
            ),
            timestamp: Utc::now(),
        })
    }
}

/// Stored route of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDetail {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    /// Encoded polyline exactly as stored
    pub route_data: String,
    pub total_distance_meters: i64,
    pub total_duration_seconds: i64,
    pub path_length: usize,
}

/// Warehouse fields shown alongside order tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseInfo {
    pub name: String,
    pub address: Option<String>,
    pub location: LatLng,
}

impl From<Warehouse> for WarehouseInfo {
    fn from(warehouse: Warehouse) -> Self {
        Self {
            name: warehouse.name,
            address: warehouse.address,
            location: warehouse.location,
        }
    }
}

/// Tracking view of an order through its most recent batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTracking {
    pub order_id: OrderId,
    pub batch_id: BatchId,
    pub stop_sequence: u32,
    pub batch_status: BatchStatus,
    pub warehouse: Option<WarehouseInfo>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Present once the batch has a route
    pub location: Option<LocationSnapshot>,
}

/// Result of a successful start command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedBatch {
    pub batch_id: BatchId,
    pub path_length: usize,
    pub total_distance_meters: i64,
    pub total_duration_seconds: i64,
}
