//! Application state management

use crate::config::ApiConfig;
use delivery_core::{
    Batch, BatchId, DriverId, LatLng, Order, OrderId, Stop, Warehouse, WarehouseId,
};
use delivery_db::{BatchStore, MemoryStore, StoreBackend};
use delivery_maps::{Providers, build_providers};
use delivery_telemetry::MetricsCollector;
use delivery_tracker::DeliveryTracker;

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Fixed id of the seeded demo batch
pub const DEMO_BATCH_ID: Uuid = Uuid::from_u128(0x6f1c_2a4e_0b7d_4c1e_9a35_5d2e_8f40_0001);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub config: ApiConfig,
    /// Commands and tracking queries
    pub tracker: Arc<DeliveryTracker>,
    /// Prometheus metrics
    pub metrics: Arc<MetricsCollector>,
    /// Running on the in-memory store after the configured one failed
    pub degraded: bool,
}

impl AppState {
    /// Create application state with the configured store and providers
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let metrics = Arc::new(MetricsCollector::new()?);

        let (store, degraded): (Arc<dyn BatchStore>, bool) =
            match delivery_db::connect(&config.db).await {
                Ok(store) => {
                    info!("Batch store connected ({:?})", config.db.backend);
                    (store, false)
                }
                Err(e) => {
                    warn!("Batch store connection failed: {}", e);
                    info!("Running in degraded mode (in-memory store)");
                    (Arc::new(MemoryStore::new()), true)
                }
            };
        metrics.set_db_connected(config.db.backend == StoreBackend::Scylla && !degraded);

        let providers = build_providers(&config.maps)?;

        let in_memory = degraded || config.db.backend == StoreBackend::Memory;
        if in_memory && config.seed_demo_data {
            let batch_id = seed_demo_data(store.as_ref()).await?;
            info!("Seeded demo batch {}", batch_id);
        }

        Ok(Self::with_store(config, store, providers, metrics, degraded))
    }

    /// Assemble state around an existing store
    pub fn with_store(
        config: ApiConfig,
        store: Arc<dyn BatchStore>,
        providers: Providers,
        metrics: Arc<MetricsCollector>,
        degraded: bool,
    ) -> Self {
        let tracker = Arc::new(DeliveryTracker::new(
            store,
            providers,
            metrics.clone(),
            config.simulation.clone(),
        ));

        Self {
            config,
            tracker,
            metrics,
            degraded,
        }
    }

    /// Check the batch store is reachable
    pub async fn store_ready(&self) -> bool {
        match self.tracker.store().health_check().await {
            Ok(ready) => ready,
            Err(e) => {
                warn!("Store health check failed: {}", e);
                false
            }
        }
    }
}

/// Seed a warehouse, three orders and one PENDING batch
pub async fn seed_demo_data(store: &dyn BatchStore) -> anyhow::Result<BatchId> {
    let mut warehouse = Warehouse::new(1, "Chaoyang Depot", LatLng::new(39.9219, 116.4435));
    warehouse.address = Some("8 Gongti North Road, Chaoyang".to_string());
    store.insert_warehouse(&warehouse).await?;

    let destinations = [
        (1001, LatLng::new(39.9289, 116.4565), "Sanlitun Taikoo Li"),
        (1002, LatLng::new(39.9390, 116.4668), "Liangmaqiao Embassy Area"),
        (1003, LatLng::new(39.9578, 116.4703), "Jiangtai West Road"),
    ];

    let mut batch = Batch::new(DriverId(1), WarehouseId(1));
    batch.id = BatchId::from_uuid(DEMO_BATCH_ID);
    store.insert_batch(&batch).await?;

    for (sequence, (order_id, destination, address)) in destinations.into_iter().enumerate() {
        let mut order = Order::new(order_id, Some(destination));
        order.delivery_address = Some(address.to_string());
        store.insert_order(&order).await?;
        store
            .insert_stop(&Stop::new(batch.id, OrderId(order_id), sequence as u32 + 1))
            .await?;
    }

    Ok(batch.id)
}
