//! Delivery Tracker
//!
//! Route acquisition, the per-batch simulation engine and the tracking query
//! service, tied together by [`DeliveryTracker`].

pub mod engine;
pub mod error;
pub mod events;
pub mod planner;
pub mod query;
pub mod state;

pub use engine::{PENDING_ADDRESS, SimulationConfig, SimulationEngine};
pub use error::{TrackerError, TrackerResult, Transition};
pub use events::EventBus;
pub use planner::{AcquiredRoute, RouteAcquisition};
pub use query::TrackingQuery;
pub use state::*;

use chrono::Utc;
use dashmap::DashMap;
use delivery_core::{
    Batch, BatchEvent, BatchId, BatchStatus, LocationSample, OrderId, OrderStatus,
};
use delivery_db::BatchStore;
use delivery_maps::Providers;
use delivery_telemetry::MetricsCollector;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Entry point for batch commands and tracking queries
pub struct DeliveryTracker {
    store: Arc<dyn BatchStore>,
    acquisition: RouteAcquisition,
    engine: SimulationEngine,
    query: TrackingQuery,
    events: EventBus,
    metrics: Arc<MetricsCollector>,
    command_locks: DashMap<BatchId, Arc<Mutex<()>>>,
}

impl DeliveryTracker {
    pub fn new(
        store: Arc<dyn BatchStore>,
        providers: Providers,
        metrics: Arc<MetricsCollector>,
        mut config: SimulationConfig,
    ) -> Self {
        let events = EventBus::default();
        config.geocode_timeout = providers.geocode_timeout;

        Self {
            acquisition: RouteAcquisition::new(store.clone(), providers.planner, metrics.clone()),
            engine: SimulationEngine::new(
                store.clone(),
                providers.geocoder,
                metrics.clone(),
                events.clone(),
                config,
            ),
            query: TrackingQuery::new(store.clone()),
            store,
            events,
            metrics,
            command_locks: DashMap::new(),
        }
    }

    /// Per-batch command lock, so commands on one batch never interleave
    fn command_lock(&self, batch_id: BatchId) -> Arc<Mutex<()>> {
        self.command_locks
            .entry(batch_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, batch_id: BatchId) {
        self.command_locks
            .remove_if(&batch_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn batch(&self, batch_id: BatchId) -> TrackerResult<Batch> {
        self.store
            .get_batch(batch_id)
            .await
            .map_err(|e| TrackerError::persistence(batch_id, e))?
            .ok_or_else(|| TrackerError::batch_not_found(batch_id))
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Plan the route of a PENDING batch and start simulating it.
    ///
    /// On any failure before the status change the batch stays PENDING.
    pub async fn start_batch(&self, batch_id: BatchId) -> TrackerResult<StartedBatch> {
        let lock = self.command_lock(batch_id);
        let result = {
            let _guard = lock.lock().await;
            self.start_locked(batch_id).await
        };
        drop(lock);
        self.release_lock(batch_id);
        result
    }

    async fn start_locked(&self, batch_id: BatchId) -> TrackerResult<StartedBatch> {
        let batch = self.batch(batch_id).await?;
        if batch.status != BatchStatus::Pending {
            return Err(TrackerError::invalid_state(
                batch_id,
                batch.status,
                Transition::Start,
            ));
        }

        // A stopped run may still be finishing; it must not write after the route reset
        self.engine.retire(batch_id).await;
        let route = self.acquisition.acquire(&batch).await?;
        let path_length = self
            .engine
            .start(batch_id, route.path, route.record.total_duration_seconds)
            .await?;

        if let Err(e) = self
            .store
            .set_order_status(&route.order_ids, OrderStatus::InTransit)
            .await
        {
            warn!("Failed to mark orders of batch {} in transit: {}", batch_id, e);
        }

        info!("Batch {} started with {} path points", batch_id, path_length);
        Ok(StartedBatch {
            batch_id,
            path_length,
            total_distance_meters: route.record.total_distance_meters,
            total_duration_seconds: route.record.total_duration_seconds,
        })
    }

    /// Return a DELIVERING batch to PENDING and cancel its run
    pub async fn stop_batch(&self, batch_id: BatchId) -> TrackerResult<()> {
        let lock = self.command_lock(batch_id);
        let result = {
            let _guard = lock.lock().await;
            self.stop_locked(batch_id).await
        };
        drop(lock);
        self.release_lock(batch_id);
        result
    }

    async fn stop_locked(&self, batch_id: BatchId) -> TrackerResult<()> {
        let batch = self.batch(batch_id).await?;
        self.leave_delivering(&batch, BatchStatus::Pending, Transition::Stop)
            .await?;

        if !self.engine.cancel(batch_id) {
            info!("Batch {} had no running simulation", batch_id);
        }
        self.engine.resolve_stuck(batch_id);

        self.set_orders(batch_id, OrderStatus::Pending).await;
        self.events.publish(BatchEvent::batch_stopped(
            batch_id,
            batch.current_index,
            batch.decoded_path().len(),
        ));
        info!("Batch {} stopped at index {}", batch_id, batch.current_index);
        Ok(())
    }

    /// Force a DELIVERING batch to COMPLETED and mark its orders arrived
    pub async fn complete_batch(&self, batch_id: BatchId) -> TrackerResult<()> {
        let lock = self.command_lock(batch_id);
        let result = {
            let _guard = lock.lock().await;
            self.complete_locked(batch_id).await
        };
        drop(lock);
        self.release_lock(batch_id);
        result
    }

    async fn complete_locked(&self, batch_id: BatchId) -> TrackerResult<()> {
        let batch = self.batch(batch_id).await?;
        self.leave_delivering(&batch, BatchStatus::Completed, Transition::Complete)
            .await?;

        self.engine.cancel(batch_id);
        self.engine.resolve_stuck(batch_id);

        self.set_orders(batch_id, OrderStatus::Arrived).await;
        self.events.publish(BatchEvent::batch_completed(
            batch_id,
            batch.current_index,
            batch.decoded_path().len(),
        ));
        info!("Batch {} completed by command", batch_id);
        Ok(())
    }

    /// Compare-and-set away from DELIVERING
    async fn leave_delivering(
        &self,
        batch: &Batch,
        to: BatchStatus,
        transition: Transition,
    ) -> TrackerResult<()> {
        if batch.status != BatchStatus::Delivering {
            return Err(TrackerError::invalid_state(batch.id, batch.status, transition));
        }

        let moved = self
            .store
            .transition_status(batch.id, BatchStatus::Delivering, to, Utc::now())
            .await
            .map_err(|e| TrackerError::persistence(batch.id, e))?;
        if moved {
            return Ok(());
        }

        // The run finished between the read and the write
        let status = self
            .store
            .batch_status(batch.id)
            .await
            .map_err(|e| TrackerError::persistence(batch.id, e))?
            .ok_or_else(|| TrackerError::batch_not_found(batch.id))?;
        Err(TrackerError::invalid_state(batch.id, status, transition))
    }

    async fn set_orders(&self, batch_id: BatchId, status: OrderStatus) {
        let ids: Vec<OrderId> = match self.store.stops_for_batch(batch_id).await {
            Ok(stops) => stops.into_iter().map(|s| s.order_id).collect(),
            Err(e) => {
                error!("Could not load stops of batch {}: {}", batch_id, e);
                return;
            }
        };

        if let Err(e) = self.store.set_order_status(&ids, status).await {
            error!(
                "Failed to set orders of batch {} to {}: {}",
                batch_id, status, e
            );
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub async fn route_detail(&self, batch_id: BatchId) -> TrackerResult<RouteDetail> {
        self.query.route_detail(batch_id).await
    }

    pub async fn location(&self, batch_id: BatchId) -> TrackerResult<LocationSnapshot> {
        self.query.location(batch_id).await
    }

    pub async fn track_by_order(&self, order_id: OrderId) -> TrackerResult<OrderTracking> {
        self.query.track_by_order(order_id).await
    }

    pub async fn trail(&self, batch_id: BatchId) -> TrackerResult<Vec<LocationSample>> {
        self.query.trail(batch_id).await
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn BatchStore> {
        &self.store
    }

    pub fn running_batches(&self) -> Vec<BatchId> {
        self.engine.running_batches()
    }

    pub fn stuck_batches(&self) -> Vec<BatchId> {
        self.engine.stuck_batches()
    }

    /// Cancel every run; returns the batches left DELIVERING
    pub async fn shutdown(&self) -> Vec<BatchId> {
        self.engine.shutdown().await
    }
}
