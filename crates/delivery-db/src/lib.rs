//! # Delivery DB
//!
//! Persistence for delivery batches, their stops, location samples and the
//! order/warehouse slices the tracker reads. Two backends implement
//! [`BatchStore`]: ScyllaDB for deployments and an in-process store for the
//! degraded mode and tests.

pub mod error;
pub mod memory;
pub mod migrations;
pub mod scylla_store;

pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use scylla_store::ScyllaStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delivery_core::{
    Batch, BatchId, BatchStatus, LocationSample, Order, OrderId, OrderStatus, RouteRecord, Stop,
    Warehouse, WarehouseId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Field-scoped access to the authoritative batch record and its satellites.
///
/// Writers never replace a whole batch: status moves only through
/// [`BatchStore::transition_status`], the simulation loop only touches
/// `current_index`, and route acquisition only the route fields.
#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn get_batch(&self, id: BatchId) -> DbResult<Option<Batch>>;

    /// Insert a new batch; fails with `Duplicate` if the id exists
    async fn insert_batch(&self, batch: &Batch) -> DbResult<()>;

    async fn batch_status(&self, id: BatchId) -> DbResult<Option<BatchStatus>>;

    /// Compare-and-set the batch status.
    ///
    /// Returns `false` when the batch is missing or not in `from`. Entering
    /// `Delivering` stamps `started_at` and clears `completed_at`; entering
    /// `Completed` stamps `completed_at`.
    async fn transition_status(
        &self,
        id: BatchId,
        from: BatchStatus,
        to: BatchStatus,
        at: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// Persist acquired route fields and reset `current_index` to 0
    async fn save_route(&self, id: BatchId, route: &RouteRecord) -> DbResult<()>;

    async fn update_current_index(&self, id: BatchId, index: u32) -> DbResult<()>;

    /// Insert an immutable stop; fails with `Duplicate` on a reused sequence
    async fn insert_stop(&self, stop: &Stop) -> DbResult<()>;

    /// Stops of a batch ordered by `stop_sequence`
    async fn stops_for_batch(&self, id: BatchId) -> DbResult<Vec<Stop>>;

    /// Most recently assigned stop referencing an order
    async fn latest_stop_for_order(&self, order_id: OrderId) -> DbResult<Option<Stop>>;

    async fn append_location(&self, sample: &LocationSample) -> DbResult<()>;

    async fn latest_location(&self, id: BatchId) -> DbResult<Option<LocationSample>>;

    /// All samples of a batch in insertion order
    async fn locations_for_batch(&self, id: BatchId) -> DbResult<Vec<LocationSample>>;

    async fn get_warehouse(&self, id: WarehouseId) -> DbResult<Option<Warehouse>>;

    async fn insert_warehouse(&self, warehouse: &Warehouse) -> DbResult<()>;

    async fn get_order(&self, id: OrderId) -> DbResult<Option<Order>>;

    async fn insert_order(&self, order: &Order) -> DbResult<()>;

    async fn set_order_status(&self, ids: &[OrderId], status: OrderStatus) -> DbResult<()>;

    async fn health_check(&self) -> DbResult<bool>;
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Scylla,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub backend: StoreBackend,
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u32,
    pub connection_timeout_secs: u64,
    pub run_migrations: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            hosts: vec!["127.0.0.1:9042".to_string()],
            keyspace: "delivery_tracking".to_string(),
            replication_factor: 1,
            connection_timeout_secs: 10,
            run_migrations: true,
        }
    }
}

impl DbConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

/// Open the configured backend
pub async fn connect(config: &DbConfig) -> DbResult<Arc<dyn BatchStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory batch store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Scylla => {
            let store = ScyllaStore::connect(config).await?;
            Ok(Arc::new(store))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
