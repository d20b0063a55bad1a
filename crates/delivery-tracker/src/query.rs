//! Tracking query service
//!
//! Read-only views over the store. Nothing is cached; each call re-reads the
//! batch and re-decodes its route.

use crate::{
    LocationSnapshot, OrderTracking, RouteDetail, TrackerError, TrackerResult, WarehouseInfo,
};
use delivery_core::{Batch, BatchId, LocationSample, OrderId};
use delivery_db::BatchStore;
use std::sync::Arc;
use tracing::debug;

pub struct TrackingQuery {
    store: Arc<dyn BatchStore>,
}

impl TrackingQuery {
    pub fn new(store: Arc<dyn BatchStore>) -> Self {
        Self { store }
    }

    async fn batch(&self, batch_id: BatchId) -> TrackerResult<Batch> {
        self.store
            .get_batch(batch_id)
            .await
            .map_err(|e| TrackerError::persistence(batch_id, e))?
            .ok_or_else(|| TrackerError::batch_not_found(batch_id))
    }

    /// Stored route of a batch
    pub async fn route_detail(&self, batch_id: BatchId) -> TrackerResult<RouteDetail> {
        let batch = self.batch(batch_id).await?;
        let route_data = batch
            .route_data
            .clone()
            .filter(|data| !data.trim().is_empty())
            .ok_or_else(|| TrackerError::not_found("route", batch_id))?;

        Ok(RouteDetail {
            batch_id,
            status: batch.status,
            path_length: batch.decoded_path().len(),
            route_data,
            total_distance_meters: batch.total_distance_meters,
            total_duration_seconds: batch.total_duration_seconds,
        })
    }

    /// Current position, address and progress of a batch
    pub async fn location(&self, batch_id: BatchId) -> TrackerResult<LocationSnapshot> {
        let batch = self.batch(batch_id).await?;
        self.snapshot(&batch).await?
            .ok_or_else(|| TrackerError::not_found("route", batch_id))
    }

    /// Snapshot for a batch with a route; `None` when it has none yet
    async fn snapshot(&self, batch: &Batch) -> TrackerResult<Option<LocationSnapshot>> {
        if !batch.has_route() {
            return Ok(None);
        }

        let path = batch.decoded_path();
        if path.is_empty() {
            return Err(TrackerError::EmptyPath { batch_id: batch.id });
        }

        // Samples from before the current run describe an earlier position
        let address = self
            .store
            .latest_location(batch.id)
            .await
            .map_err(|e| TrackerError::persistence(batch.id, e))?
            .filter(|sample| batch.started_at.is_none_or(|started| sample.recorded_at >= started))
            .and_then(|sample| sample.address);

        Ok(LocationSnapshot::compose(batch, &path, address))
    }

    /// Track an order through its most recent batch association
    pub async fn track_by_order(&self, order_id: OrderId) -> TrackerResult<OrderTracking> {
        let stop = self
            .store
            .latest_stop_for_order(order_id)
            .await?
            .ok_or_else(|| TrackerError::not_found("stop for order", order_id))?;
        debug!(
            "Order {} resolved to batch {} stop {}",
            order_id, stop.batch_id, stop.stop_sequence
        );

        let batch = self.batch(stop.batch_id).await?;
        let warehouse = self
            .store
            .get_warehouse(batch.warehouse_id)
            .await
            .map_err(|e| TrackerError::persistence(batch.id, e))?
            .map(WarehouseInfo::from);
        let location = self.snapshot(&batch).await?;

        Ok(OrderTracking {
            order_id,
            batch_id: batch.id,
            stop_sequence: stop.stop_sequence,
            batch_status: batch.status,
            warehouse,
            created_at: batch.created_at,
            started_at: batch.started_at,
            completed_at: batch.completed_at,
            location,
        })
    }

    /// Recorded samples of a batch in path order
    pub async fn trail(&self, batch_id: BatchId) -> TrackerResult<Vec<LocationSample>> {
        self.batch(batch_id).await?;
        self.store
            .locations_for_batch(batch_id)
            .await
            .map_err(|e| TrackerError::persistence(batch_id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use delivery_core::{
        BatchStatus, DriverId, LatLng, RouteRecord, Stop, Warehouse, WarehouseId,
    };
    use delivery_db::MemoryStore;

    const ROUTE: &str = "[39.9, 116.4, 100, -200, -50, 300]";

    async fn routed(store: &MemoryStore, index: u32) -> Batch {
        store
            .insert_warehouse(&Warehouse::new(1, "North Depot", LatLng::new(39.9, 116.4)))
            .await
            .unwrap();
        let batch = Batch::new(DriverId(7), WarehouseId(1));
        store.insert_batch(&batch).await.unwrap();
        store
            .save_route(
                batch.id,
                &RouteRecord {
                    route_data: ROUTE.to_string(),
                    total_distance_meters: 10_000,
                    total_duration_seconds: 600,
                },
            )
            .await
            .unwrap();
        store.update_current_index(batch.id, index).await.unwrap();
        store.get_batch(batch.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_location_uses_latest_sample_address() {
        let store = Arc::new(MemoryStore::new());
        let batch = routed(&store, 1).await;
        store
            .append_location(&LocationSample::new(
                batch.id,
                LatLng::new(39.9, 116.4),
                Some("Gate 3".to_string()),
                0,
            ))
            .await
            .unwrap();

        let query = TrackingQuery::new(store);
        let snapshot = query.location(batch.id).await.unwrap();

        assert_eq!(snapshot.current_index, 1);
        assert_eq!(snapshot.path_length, 3);
        assert_eq!(snapshot.address.as_deref(), Some("Gate 3"));
        assert!((snapshot.position.latitude - 39.9001).abs() < 1e-9);
        assert!((snapshot.position.longitude - 116.3998).abs() < 1e-9);
        assert!((snapshot.progress.percent - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_location_ignores_samples_of_earlier_run() {
        let store = Arc::new(MemoryStore::new());
        let batch = routed(&store, 0).await;

        let mut stale = LocationSample::new(
            batch.id,
            LatLng::new(39.9002, 116.3996),
            Some("Old Market Road".to_string()),
            2,
        );
        stale.recorded_at = Utc::now() - Duration::hours(1);
        store.append_location(&stale).await.unwrap();

        assert!(store
            .transition_status(batch.id, BatchStatus::Pending, BatchStatus::Delivering, Utc::now())
            .await
            .unwrap());

        let query = TrackingQuery::new(store.clone());
        let snapshot = query.location(batch.id).await.unwrap();
        assert_eq!(snapshot.current_index, 0);
        assert!(snapshot.address.is_none());

        store
            .append_location(&LocationSample::new(
                batch.id,
                LatLng::new(39.9, 116.4),
                Some("Depot Gate".to_string()),
                0,
            ))
            .await
            .unwrap();
        let snapshot = query.location(batch.id).await.unwrap();
        assert_eq!(snapshot.address.as_deref(), Some("Depot Gate"));
    }

    #[tokio::test]
    async fn test_location_without_route_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let batch = Batch::new(DriverId(7), WarehouseId(1));
        store.insert_batch(&batch).await.unwrap();

        let query = TrackingQuery::new(store);
        assert!(matches!(
            query.location(batch.id).await,
            Err(TrackerError::NotFound { entity: "route", .. })
        ));
        assert!(matches!(
            query.location(BatchId::new()).await,
            Err(TrackerError::NotFound { entity: "batch", .. })
        ));
    }

    #[tokio::test]
    async fn test_route_detail() {
        let store = Arc::new(MemoryStore::new());
        let batch = routed(&store, 0).await;

        let detail = TrackingQuery::new(store).route_detail(batch.id).await.unwrap();
        assert_eq!(detail.route_data, ROUTE);
        assert_eq!(detail.total_distance_meters, 10_000);
        assert_eq!(detail.total_duration_seconds, 600);
        assert_eq!(detail.path_length, 3);
        assert_eq!(detail.status, BatchStatus::Pending);
    }

    #[tokio::test]
    async fn test_track_by_order_uses_latest_association() {
        let store = Arc::new(MemoryStore::new());
        let older = routed(&store, 0).await;
        let newer = Batch::new(DriverId(8), WarehouseId(1));
        store.insert_batch(&newer).await.unwrap();

        let mut first = Stop::new(older.id, OrderId(500), 1);
        first.assigned_at = Utc::now() - Duration::hours(2);
        store.insert_stop(&first).await.unwrap();
        store.insert_stop(&Stop::new(newer.id, OrderId(500), 2)).await.unwrap();

        let tracking = TrackingQuery::new(store)
            .track_by_order(OrderId(500))
            .await
            .unwrap();

        assert_eq!(tracking.batch_id, newer.id);
        assert_eq!(tracking.stop_sequence, 2);
        assert_eq!(tracking.warehouse.unwrap().name, "North Depot");
        // the newer batch has no route yet
        assert!(tracking.location.is_none());
    }

    #[tokio::test]
    async fn test_track_unknown_order() {
        let query = TrackingQuery::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            query.track_by_order(OrderId(1)).await,
            Err(TrackerError::NotFound { .. })
        ));
    }
}
