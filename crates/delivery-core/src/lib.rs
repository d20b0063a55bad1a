//! # Delivery Core
//!
//! Core domain models and types for the Delivery Tracking Server.
//! This crate provides shared types used by storage, provider clients,
//! the simulation engine and the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod error;
pub mod events;
pub mod geo;
pub mod polyline;
pub mod progress;

pub use error::{CoreError, CoreResult};
pub use events::*;
pub use geo::*;
pub use polyline::{DecodedPath, EncodedPath, WaypointPoint};
pub use progress::RouteProgress;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Unique identifier for a delivery batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BatchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a customer order
    OrderId
);
numeric_id!(
    /// Identifier of the warehouse a batch departs from
    WarehouseId
);
numeric_id!(
    /// Identifier of the driver assigned to a batch
    DriverId
);

// ============================================================================
// BATCH MODELS
// ============================================================================

/// Lifecycle status of a delivery batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Created or stopped, waiting to depart
    Pending,
    /// Vehicle is moving along its route
    Delivering,
    /// Route finished or completion forced
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Delivering => "DELIVERING",
            BatchStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BatchStatus::Pending),
            "DELIVERING" => Ok(BatchStatus::Delivering),
            "COMPLETED" => Ok(BatchStatus::Completed),
            other => Err(CoreError::UnknownBatchStatus(other.to_string())),
        }
    }
}

impl Default for BatchStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// The single authoritative record of a delivery batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub driver_id: DriverId,
    pub warehouse_id: WarehouseId,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Encoded polyline, `None` until a route has been acquired
    pub route_data: Option<String>,
    pub total_distance_meters: i64,
    pub total_duration_seconds: i64,
    pub current_index: u32,
}

impl Batch {
    pub fn new(driver_id: DriverId, warehouse_id: WarehouseId) -> Self {
        Self {
            id: BatchId::new(),
            driver_id,
            warehouse_id,
            status: BatchStatus::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            route_data: None,
            total_distance_meters: 0,
            total_duration_seconds: 0,
            current_index: 0,
        }
    }

    pub fn has_route(&self) -> bool {
        self.route_data.is_some()
    }

    /// Decode the stored route, empty when none was acquired
    pub fn decoded_path(&self) -> DecodedPath {
        self.route_data
            .as_deref()
            .map(polyline::decode)
            .unwrap_or_default()
    }
}

/// Route fields written onto a batch by route acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub route_data: String,
    pub total_distance_meters: i64,
    pub total_duration_seconds: i64,
}

/// Ordered association between a batch and one of its orders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub batch_id: BatchId,
    pub order_id: OrderId,
    /// 1-based position in the delivery sequence
    pub stop_sequence: u32,
    pub assigned_at: DateTime<Utc>,
}

impl Stop {
    pub fn new(batch_id: BatchId, order_id: OrderId, stop_sequence: u32) -> Self {
        Self {
            batch_id,
            order_id,
            stop_sequence,
            assigned_at: Utc::now(),
        }
    }
}

// ============================================================================
// ORDER & WAREHOUSE MODELS
// ============================================================================

/// Delivery state of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    InTransit,
    Arrived,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::InTransit => "IN_TRANSIT",
            OrderStatus::Arrived => "ARRIVED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "IN_TRANSIT" => Ok(OrderStatus::InTransit),
            "ARRIVED" => Ok(OrderStatus::Arrived),
            other => Err(CoreError::UnknownOrderStatus(other.to_string())),
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// The slice of an order the tracking engine needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Delivery coordinate; orders without one are skipped when planning
    pub destination: Option<LatLng>,
    pub delivery_address: Option<String>,
    pub status: OrderStatus,
}

impl Order {
    pub fn new(id: impl Into<OrderId>, destination: Option<LatLng>) -> Self {
        Self {
            id: id.into(),
            destination,
            delivery_address: None,
            status: OrderStatus::default(),
        }
    }

    /// Destination if present and a usable coordinate
    pub fn usable_destination(&self) -> Option<LatLng> {
        self.destination.filter(LatLng::is_valid)
    }
}

/// Origin of every batch route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub address: Option<String>,
    pub location: LatLng,
}

impl Warehouse {
    pub fn new(id: impl Into<WarehouseId>, name: impl Into<String>, location: LatLng) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: None,
            location,
        }
    }
}

// ============================================================================
// LOCATION SAMPLES
// ============================================================================

/// Append-only record of where a simulated vehicle was
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSample {
    pub batch_id: BatchId,
    pub position: LatLng,
    pub address: Option<String>,
    pub path_index: u32,
    pub recorded_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(batch_id: BatchId, position: LatLng, address: Option<String>, path_index: u32) -> Self {
        Self {
            batch_id,
            position,
            address,
            path_index,
            recorded_at: Utc::now(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
