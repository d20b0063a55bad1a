//! Route acquisition
//!
//! Builds the provider request from a batch's warehouse and stops, calls the
//! route planner once and persists the normalized result onto the batch.

use crate::{TrackerError, TrackerResult};
use delivery_core::{Batch, DecodedPath, OrderId, RouteRecord, polyline};
use delivery_db::BatchStore;
use delivery_maps::{RoutePlanner, RouteRequest};
use delivery_telemetry::MetricsCollector;
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A route persisted onto a batch
#[derive(Debug, Clone)]
pub struct AcquiredRoute {
    pub record: RouteRecord,
    pub path: DecodedPath,
    /// Every order on the batch, in stop order
    pub order_ids: Vec<OrderId>,
}

/// Route acquisition against the configured planner
pub struct RouteAcquisition {
    store: Arc<dyn BatchStore>,
    planner: Arc<dyn RoutePlanner>,
    metrics: Arc<MetricsCollector>,
}

impl RouteAcquisition {
    pub fn new(
        store: Arc<dyn BatchStore>,
        planner: Arc<dyn RoutePlanner>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            planner,
            metrics,
        }
    }

    /// Assemble the planner request for a batch.
    ///
    /// Orders without a usable destination are skipped; the request fails
    /// only when none remain.
    pub async fn build_request(&self, batch: &Batch) -> TrackerResult<(RouteRequest, Vec<OrderId>)> {
        let warehouse = self
            .store
            .get_warehouse(batch.warehouse_id)
            .await
            .map_err(|e| TrackerError::persistence(batch.id, e))?
            .ok_or_else(|| TrackerError::not_found("warehouse", batch.warehouse_id))?;

        let stops = self
            .store
            .stops_for_batch(batch.id)
            .await
            .map_err(|e| TrackerError::persistence(batch.id, e))?;

        let orders = try_join_all(stops.iter().map(|s| self.store.get_order(s.order_id)))
            .await
            .map_err(|e| TrackerError::persistence(batch.id, e))?;

        let mut destinations = Vec::with_capacity(stops.len());
        for (stop, order) in stops.iter().zip(orders) {
            match order.as_ref().and_then(|o| o.usable_destination()) {
                Some(destination) => destinations.push(destination),
                None => warn!(
                    "Batch {} stop {} (order {}) has no usable destination, skipping",
                    batch.id, stop.stop_sequence, stop.order_id
                ),
            }
        }

        let request = RouteRequest::through_stops(warehouse.location, &destinations)
            .ok_or(TrackerError::NoWaypoints { batch_id: batch.id })?;
        let order_ids = stops.iter().map(|s| s.order_id).collect();

        Ok((request, order_ids))
    }

    /// Plan and persist a route; never retries
    pub async fn acquire(&self, batch: &Batch) -> TrackerResult<AcquiredRoute> {
        let (request, order_ids) = self.build_request(batch).await?;
        debug!(
            "Planning route for batch {} through {} stops",
            batch.id,
            request.waypoints.len() + 1
        );

        let started = Instant::now();
        let planned = self.planner.plan_route(&request).await;
        self.metrics.record_route_plan(
            self.planner.name(),
            planned.is_ok(),
            started.elapsed().as_secs_f64(),
        );

        let planned = planned.map_err(|e| {
            warn!("Route planning failed for batch {}: {}", batch.id, e);
            TrackerError::UpstreamUnavailable {
                batch_id: batch.id,
                reason: e.to_string(),
            }
        })?;

        let path = polyline::decode(&planned.route_data);
        if path.is_empty() {
            return Err(TrackerError::EmptyPath { batch_id: batch.id });
        }

        let record = RouteRecord {
            route_data: planned.route_data,
            total_distance_meters: planned.distance_meters,
            total_duration_seconds: planned.duration_seconds,
        };
        self.store
            .save_route(batch.id, &record)
            .await
            .map_err(|e| TrackerError::persistence(batch.id, e))?;

        info!(
            "Route acquired for batch {}: {} points, {} m, {} s",
            batch.id,
            path.len(),
            record.total_distance_meters,
            record.total_duration_seconds
        );

        Ok(AcquiredRoute {
            record,
            path,
            order_ids,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use delivery_core::{DriverId, LatLng, Order, Stop, Warehouse, WarehouseId};
    use delivery_db::MemoryStore;
    use delivery_maps::{MapsError, MapsResult, PlannedRoute};
    use mockall::mock;

    mock! {
        pub Planner {}

        #[async_trait]
        impl RoutePlanner for Planner {
            async fn plan_route(&self, request: &RouteRequest) -> MapsResult<PlannedRoute>;
            fn name(&self) -> &'static str;
        }
    }

    async fn seeded(store: &MemoryStore, destinations: &[Option<LatLng>]) -> Batch {
        store
            .insert_warehouse(&Warehouse::new(1, "North Depot", LatLng::new(39.90, 116.40)))
            .await
            .unwrap();

        let batch = Batch::new(DriverId(1), WarehouseId(1));
        store.insert_batch(&batch).await.unwrap();

        for (i, destination) in destinations.iter().enumerate() {
            let order_id = 100 + i as i64;
            store.insert_order(&Order::new(order_id, *destination)).await.unwrap();
            store
                .insert_stop(&Stop::new(batch.id, OrderId(order_id), i as u32 + 1))
                .await
                .unwrap();
        }
        batch
    }

    fn acquisition(store: Arc<MemoryStore>, planner: MockPlanner) -> RouteAcquisition {
        RouteAcquisition::new(
            store,
            Arc::new(planner),
            Arc::new(MetricsCollector::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_request_skips_orders_without_destination() {
        let store = Arc::new(MemoryStore::new());
        let first = LatLng::new(39.91, 116.41);
        let last = LatLng::new(39.93, 116.43);
        let batch = seeded(&store, &[Some(first), None, Some(last)]).await;

        let acquisition = acquisition(store, MockPlanner::new());
        let (request, order_ids) = acquisition.build_request(&batch).await.unwrap();

        assert_eq!(request.origin, LatLng::new(39.90, 116.40));
        assert_eq!(request.waypoints, vec![first]);
        assert_eq!(request.destination, last);
        assert_eq!(order_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_no_usable_destination_fails() {
        let store = Arc::new(MemoryStore::new());
        let batch = seeded(&store, &[None]).await;

        let mut planner = MockPlanner::new();
        planner.expect_plan_route().never();

        let result = acquisition(store, planner).acquire(&batch).await;
        assert!(matches!(result, Err(TrackerError::NoWaypoints { .. })));
    }

    #[tokio::test]
    async fn test_acquire_persists_route() {
        let store = Arc::new(MemoryStore::new());
        let batch = seeded(&store, &[Some(LatLng::new(39.91, 116.41))]).await;
        store.update_current_index(batch.id, 4).await.unwrap();

        let mut planner = MockPlanner::new();
        planner.expect_name().return_const("mock");
        planner.expect_plan_route().times(1).returning(|_| {
            Ok(PlannedRoute {
                route_data: "[39.9, 116.4, 100, -200, -50, 300]".to_string(),
                distance_meters: 2400,
                duration_seconds: 360,
            })
        });

        let acquired = acquisition(store.clone(), planner).acquire(&batch).await.unwrap();
        assert_eq!(acquired.path.len(), 3);

        let saved = store.get_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(saved.total_distance_meters, 2400);
        assert_eq!(saved.total_duration_seconds, 360);
        assert_eq!(saved.current_index, 0);
        assert!(saved.has_route());
    }

    #[tokio::test]
    async fn test_planner_failure_is_upstream_error() {
        let store = Arc::new(MemoryStore::new());
        let batch = seeded(&store, &[Some(LatLng::new(39.91, 116.41))]).await;

        let mut planner = MockPlanner::new();
        planner.expect_name().return_const("mock");
        planner
            .expect_plan_route()
            .times(1)
            .returning(|_| Err(MapsError::api(121, "quota exceeded")));

        let result = acquisition(store.clone(), planner).acquire(&batch).await;
        match result {
            Err(TrackerError::UpstreamUnavailable { batch_id, reason }) => {
                assert_eq!(batch_id, batch.id);
                assert!(reason.contains("quota exceeded"));
            }
            other => panic!("expected upstream error, got {:?}", other),
        }

        let saved = store.get_batch(batch.id).await.unwrap().unwrap();
        assert!(!saved.has_route());
    }

    #[tokio::test]
    async fn test_missing_warehouse_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let batch = Batch::new(DriverId(1), WarehouseId(42));
        store.insert_batch(&batch).await.unwrap();

        let result = acquisition(store, MockPlanner::new()).acquire(&batch).await;
        assert!(matches!(
            result,
            Err(TrackerError::NotFound { entity: "warehouse", .. })
        ));
    }
}
