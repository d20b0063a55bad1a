//! End-to-end batch lifecycle over the in-memory store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delivery_core::{
    Batch, BatchId, BatchStatus, DriverId, EventType, LatLng, LocationSample, Order, OrderId,
    OrderStatus, RouteRecord, Stop, Warehouse, WarehouseId, polyline,
};
use delivery_db::{BatchStore, DbError, DbResult, MemoryStore};
use delivery_maps::{
    CoordinateGeocoder, Geocoder, MapsConfig, MapsError, MapsResult, OfflinePlanner,
    PlannedRoute, Providers, RoutePlanner, RouteRequest,
};
use delivery_telemetry::MetricsCollector;
use delivery_tracker::{
    DeliveryTracker, PENDING_ADDRESS, SimulationConfig, TrackerError, Transition,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// FIXTURES
// ============================================================================

/// Planner returning a fixed straight route of `points` points
struct FixedPlanner {
    points: usize,
    duration_seconds: i64,
    calls: AtomicUsize,
}

impl FixedPlanner {
    fn new(points: usize, duration_seconds: i64) -> Self {
        Self {
            points,
            duration_seconds,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RoutePlanner for FixedPlanner {
    async fn plan_route(&self, request: &RouteRequest) -> MapsResult<PlannedRoute> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path: Vec<LatLng> = (0..self.points)
            .map(|i| {
                request
                    .origin
                    .interpolate(&request.destination, i as f64 / (self.points - 1) as f64)
            })
            .collect();

        Ok(PlannedRoute {
            route_data: polyline::encode(&path),
            distance_meters: 10_000,
            duration_seconds: self.duration_seconds,
        })
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

struct UnavailablePlanner;

#[async_trait]
impl RoutePlanner for UnavailablePlanner {
    async fn plan_route(&self, _request: &RouteRequest) -> MapsResult<PlannedRoute> {
        Err(MapsError::Timeout)
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

/// Geocoder that answers only after a delay
struct SlowGeocoder(Duration);

#[async_trait]
impl Geocoder for SlowGeocoder {
    async fn reverse_geocode(&self, _position: LatLng) -> MapsResult<String> {
        tokio::time::sleep(self.0).await;
        Ok("Slow Street".to_string())
    }
}

/// Store whose `current_index` writes fail once armed
struct FlakyIndexStore {
    inner: MemoryStore,
    failing: AtomicBool,
    /// Hold the next failing write until `release` is notified
    hold: AtomicBool,
    held: Notify,
    release: Notify,
}

impl FlakyIndexStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failing: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            held: Notify::new(),
            release: Notify::new(),
        }
    }

    fn arm(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn arm_held(&self) {
        self.hold.store(true, Ordering::SeqCst);
        self.arm();
    }

    fn disarm(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl BatchStore for FlakyIndexStore {
    async fn get_batch(&self, id: BatchId) -> DbResult<Option<Batch>> {
        self.inner.get_batch(id).await
    }

    async fn insert_batch(&self, batch: &Batch) -> DbResult<()> {
        self.inner.insert_batch(batch).await
    }

    async fn batch_status(&self, id: BatchId) -> DbResult<Option<BatchStatus>> {
        self.inner.batch_status(id).await
    }

    async fn transition_status(
        &self,
        id: BatchId,
        from: BatchStatus,
        to: BatchStatus,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.inner.transition_status(id, from, to, at).await
    }

    async fn save_route(&self, id: BatchId, route: &RouteRecord) -> DbResult<()> {
        self.inner.save_route(id, route).await
    }

    async fn update_current_index(&self, id: BatchId, index: u32) -> DbResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            if self.hold.swap(false, Ordering::SeqCst) {
                self.held.notify_one();
                self.release.notified().await;
            }
            return Err(DbError::Timeout("write timed out".to_string()));
        }
        self.inner.update_current_index(id, index).await
    }

    async fn insert_stop(&self, stop: &Stop) -> DbResult<()> {
        self.inner.insert_stop(stop).await
    }

    async fn stops_for_batch(&self, id: BatchId) -> DbResult<Vec<Stop>> {
        self.inner.stops_for_batch(id).await
    }

    async fn latest_stop_for_order(&self, order_id: OrderId) -> DbResult<Option<Stop>> {
        self.inner.latest_stop_for_order(order_id).await
    }

    async fn append_location(&self, sample: &LocationSample) -> DbResult<()> {
        self.inner.append_location(sample).await
    }

    async fn latest_location(&self, id: BatchId) -> DbResult<Option<LocationSample>> {
        self.inner.latest_location(id).await
    }

    async fn locations_for_batch(&self, id: BatchId) -> DbResult<Vec<LocationSample>> {
        self.inner.locations_for_batch(id).await
    }

    async fn get_warehouse(&self, id: WarehouseId) -> DbResult<Option<Warehouse>> {
        self.inner.get_warehouse(id).await
    }

    async fn insert_warehouse(&self, warehouse: &Warehouse) -> DbResult<()> {
        self.inner.insert_warehouse(warehouse).await
    }

    async fn get_order(&self, id: OrderId) -> DbResult<Option<Order>> {
        self.inner.get_order(id).await
    }

    async fn insert_order(&self, order: &Order) -> DbResult<()> {
        self.inner.insert_order(order).await
    }

    async fn set_order_status(&self, ids: &[OrderId], status: OrderStatus) -> DbResult<()> {
        self.inner.set_order_status(ids, status).await
    }

    async fn health_check(&self) -> DbResult<bool> {
        self.inner.health_check().await
    }
}

const ORDER_IDS: [i64; 2] = [101, 102];

async fn seed(store: &dyn BatchStore, with_orders: bool) -> BatchId {
    store
        .insert_warehouse(&Warehouse::new(1, "North Depot", LatLng::new(39.90, 116.40)))
        .await
        .unwrap();

    let batch = Batch::new(DriverId(9), WarehouseId(1));
    store.insert_batch(&batch).await.unwrap();

    if with_orders {
        let destinations = [LatLng::new(39.905, 116.405), LatLng::new(39.91, 116.41)];
        for (i, (id, destination)) in ORDER_IDS.iter().zip(destinations).enumerate() {
            store
                .insert_order(&Order::new(*id, Some(destination)))
                .await
                .unwrap();
            store
                .insert_stop(&Stop::new(batch.id, OrderId(*id), i as u32 + 1))
                .await
                .unwrap();
        }
    }
    batch.id
}

fn tracker(store: Arc<dyn BatchStore>, planner: Arc<dyn RoutePlanner>) -> DeliveryTracker {
    tracker_with(
        store,
        Providers {
            planner,
            geocoder: Arc::new(CoordinateGeocoder),
            geocode_timeout: MapsConfig::default().geocode_timeout(),
        },
    )
}

fn tracker_with(store: Arc<dyn BatchStore>, providers: Providers) -> DeliveryTracker {
    DeliveryTracker::new(
        store,
        providers,
        Arc::new(MetricsCollector::new().unwrap()),
        SimulationConfig::default(),
    )
}

async fn order_statuses(store: &dyn BatchStore) -> Vec<OrderStatus> {
    let mut statuses = Vec::new();
    for id in ORDER_IDS {
        statuses.push(store.get_order(OrderId(id)).await.unwrap().unwrap().status);
    }
    statuses
}

async fn wait_for_status(store: &dyn BatchStore, id: BatchId, status: BatchStatus) {
    for _ in 0..3600 {
        if store.batch_status(id).await.unwrap() == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("batch {} never reached {}", id, status);
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_lifecycle_with_offline_planner() {
    let store: Arc<dyn BatchStore> = Arc::new(MemoryStore::new());
    let id = seed(store.as_ref(), true).await;
    let tracker = tracker(store.clone(), Arc::new(OfflinePlanner::default()));

    let started = tracker.start_batch(id).await.unwrap();
    assert!(started.path_length > 2);
    assert!(started.total_distance_meters > 0);
    assert_eq!(
        order_statuses(store.as_ref()).await,
        vec![OrderStatus::InTransit, OrderStatus::InTransit]
    );

    wait_for_status(store.as_ref(), id, BatchStatus::Completed).await;

    let batch = store.get_batch(id).await.unwrap().unwrap();
    assert_eq!(batch.current_index as usize, started.path_length - 1);
    assert!(batch.completed_at.is_some());

    let location = tracker.location(id).await.unwrap();
    assert_eq!(location.progress.percent, 100.0);
    assert_eq!(location.progress.remaining_time_seconds, 0.0);
    assert_eq!(location.status, BatchStatus::Completed);

    let trail = tracker.trail(id).await.unwrap();
    let last = trail.last().unwrap();
    assert_eq!(last.path_index as usize, started.path_length - 1);
    assert!(trail.windows(2).all(|w| w[0].path_index <= w[1].path_index));
    assert!(trail
        .iter()
        .all(|s| s.path_index % 10 == 0 || s.path_index == last.path_index));

    assert_eq!(
        order_statuses(store.as_ref()).await,
        vec![OrderStatus::Arrived, OrderStatus::Arrived]
    );
    assert!(tracker.running_batches().is_empty());

    let types: Vec<EventType> = tracker
        .events()
        .recent_for_batch(id, 100)
        .iter()
        .map(|e| e.event_type)
        .filter(|t| *t != EventType::LocationRecorded)
        .collect();
    assert_eq!(types, vec![EventType::BatchStarted, EventType::BatchCompleted]);
}

#[tokio::test(start_paused = true)]
async fn test_start_requires_pending() {
    let store: Arc<dyn BatchStore> = Arc::new(MemoryStore::new());
    let id = seed(store.as_ref(), true).await;
    let planner = Arc::new(FixedPlanner::new(10, 1000));
    let tracker = tracker(store.clone(), planner.clone());

    tracker.start_batch(id).await.unwrap();
    let before = store.get_batch(id).await.unwrap().unwrap();

    match tracker.start_batch(id).await {
        Err(TrackerError::InvalidState {
            batch_id,
            status,
            transition,
        }) => {
            assert_eq!(batch_id, id);
            assert_eq!(status, BatchStatus::Delivering);
            assert_eq!(transition, Transition::Start);
        }
        other => panic!("expected invalid state, got {:?}", other),
    }

    let after = store.get_batch(id).await.unwrap().unwrap();
    assert_eq!(after.route_data, before.route_data);
    assert_eq!(after.started_at, before.started_at);
    assert_eq!(planner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_without_orders_fails() {
    let store: Arc<dyn BatchStore> = Arc::new(MemoryStore::new());
    let id = seed(store.as_ref(), false).await;
    let tracker = tracker(store.clone(), Arc::new(FixedPlanner::new(10, 100)));

    assert!(matches!(
        tracker.start_batch(id).await,
        Err(TrackerError::NoWaypoints { .. })
    ));
    assert_eq!(
        store.batch_status(id).await.unwrap(),
        Some(BatchStatus::Pending)
    );
}

#[tokio::test(start_paused = true)]
async fn test_planner_failure_leaves_batch_pending() {
    let store: Arc<dyn BatchStore> = Arc::new(MemoryStore::new());
    let id = seed(store.as_ref(), true).await;
    let tracker = tracker(store.clone(), Arc::new(UnavailablePlanner));

    assert!(matches!(
        tracker.start_batch(id).await,
        Err(TrackerError::UpstreamUnavailable { .. })
    ));

    let batch = store.get_batch(id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Pending);
    assert!(!batch.has_route());
    assert!(batch.started_at.is_none());
    assert_eq!(
        order_statuses(store.as_ref()).await,
        vec![OrderStatus::Pending, OrderStatus::Pending]
    );
    assert!(matches!(
        tracker.location(id).await,
        Err(TrackerError::NotFound { entity: "route", .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stop_freezes_progress() {
    let store: Arc<dyn BatchStore> = Arc::new(MemoryStore::new());
    let id = seed(store.as_ref(), true).await;
    // 100 points, one step per second
    let tracker = tracker(store.clone(), Arc::new(FixedPlanner::new(100, 100)));

    tracker.start_batch(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20_500)).await;

    tracker.stop_batch(id).await.unwrap();
    let frozen = store.get_batch(id).await.unwrap().unwrap().current_index;
    assert!((19..=21).contains(&frozen));

    tokio::time::sleep(Duration::from_secs(200)).await;

    let batch = store.get_batch(id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Pending);
    assert_eq!(batch.current_index, frozen);
    assert!(batch.completed_at.is_none());
    assert!(tracker.running_batches().is_empty());
    assert_eq!(
        order_statuses(store.as_ref()).await,
        vec![OrderStatus::Pending, OrderStatus::Pending]
    );

    assert!(matches!(
        tracker.stop_batch(id).await,
        Err(TrackerError::InvalidState {
            transition: Transition::Stop,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_complete_forces_completion() {
    let store: Arc<dyn BatchStore> = Arc::new(MemoryStore::new());
    let id = seed(store.as_ref(), true).await;
    let tracker = tracker(store.clone(), Arc::new(FixedPlanner::new(100, 1000)));

    assert!(matches!(
        tracker.complete_batch(id).await,
        Err(TrackerError::InvalidState {
            status: BatchStatus::Pending,
            transition: Transition::Complete,
            ..
        })
    ));

    tracker.start_batch(id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(35)).await;
    tracker.complete_batch(id).await.unwrap();

    let batch = store.get_batch(id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert!(batch.completed_at.is_some());
    assert!((batch.current_index as usize) < 99);
    assert_eq!(
        order_statuses(store.as_ref()).await,
        vec![OrderStatus::Arrived, OrderStatus::Arrived]
    );

    tokio::time::sleep(Duration::from_secs(2000)).await;
    let later = store.get_batch(id).await.unwrap().unwrap();
    assert_eq!(later.current_index, batch.current_index);
    assert_eq!(later.completed_at, batch.completed_at);
}

#[tokio::test(start_paused = true)]
async fn test_restart_replans_and_resets_index() {
    let store: Arc<dyn BatchStore> = Arc::new(MemoryStore::new());
    let id = seed(store.as_ref(), true).await;
    let planner = Arc::new(FixedPlanner::new(50, 50));
    let tracker = tracker(store.clone(), planner.clone());

    tracker.start_batch(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    tracker.stop_batch(id).await.unwrap();

    tracker.start_batch(id).await.unwrap();
    assert_eq!(planner.calls.load(Ordering::SeqCst), 2);
    assert!(store.get_batch(id).await.unwrap().unwrap().current_index <= 1);

    wait_for_status(store.as_ref(), id, BatchStatus::Completed).await;
    assert_eq!(store.get_batch(id).await.unwrap().unwrap().current_index, 49);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_admit_one() {
    let store: Arc<dyn BatchStore> = Arc::new(MemoryStore::new());
    let id = seed(store.as_ref(), true).await;
    let tracker = Arc::new(tracker(store.clone(), Arc::new(FixedPlanner::new(20, 200))));

    let first = tokio::spawn({
        let tracker = tracker.clone();
        async move { tracker.start_batch(id).await }
    });
    let second = tokio::spawn({
        let tracker = tracker.clone();
        async move { tracker.start_batch(id).await }
    });

    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(tracker.running_batches(), vec![id]);
}

#[tokio::test(start_paused = true)]
async fn test_track_by_order_follows_latest_batch() {
    let store: Arc<dyn BatchStore> = Arc::new(MemoryStore::new());
    let first = seed(store.as_ref(), true).await;
    let tracker = tracker(store.clone(), Arc::new(FixedPlanner::new(10, 10)));

    tracker.start_batch(first).await.unwrap();
    wait_for_status(store.as_ref(), first, BatchStatus::Completed).await;

    let second = Batch::new(DriverId(10), WarehouseId(1));
    store.insert_batch(&second).await.unwrap();
    let mut reassigned = Stop::new(second.id, OrderId(101), 1);
    reassigned.assigned_at = Utc::now() + chrono::Duration::seconds(1);
    store.insert_stop(&reassigned).await.unwrap();

    let tracking = tracker.track_by_order(OrderId(101)).await.unwrap();
    assert_eq!(tracking.batch_id, second.id);
    assert_eq!(tracking.batch_status, BatchStatus::Pending);
    assert_eq!(tracking.warehouse.unwrap().name, "North Depot");
    assert!(tracking.location.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_index_write_failure_aborts_run() {
    let flaky = Arc::new(FlakyIndexStore::new());
    let store: Arc<dyn BatchStore> = flaky.clone();
    let id = seed(store.as_ref(), true).await;
    let tracker = tracker(store.clone(), Arc::new(FixedPlanner::new(30, 30)));

    tracker.start_batch(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    flaky.arm();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let batch = store.get_batch(id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Delivering);
    assert!(batch.completed_at.is_none());
    assert!(tracker.running_batches().is_empty());
    assert_eq!(tracker.stuck_batches(), vec![id]);
    assert_eq!(tracker.metrics().stuck_batches(), 1);

    let aborted = tracker
        .events()
        .recent_for_batch(id, 100)
        .iter()
        .any(|e| e.event_type == EventType::SimulationAborted);
    assert!(aborted);

    tracker.stop_batch(id).await.unwrap();
    assert!(tracker.stuck_batches().is_empty());
    assert_eq!(tracker.metrics().stuck_batches(), 0);
    assert_eq!(
        store.batch_status(id).await.unwrap(),
        Some(BatchStatus::Pending)
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_failing_write_is_not_stuck() {
    let flaky = Arc::new(FlakyIndexStore::new());
    let store: Arc<dyn BatchStore> = flaky.clone();
    let id = seed(store.as_ref(), true).await;
    let tracker = tracker(store.clone(), Arc::new(FixedPlanner::new(30, 30)));

    tracker.start_batch(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5_500)).await;

    // the run is now inside a write that will fail
    flaky.arm_held();
    flaky.held.notified().await;

    tracker.stop_batch(id).await.unwrap();
    flaky.release.notify_one();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(
        store.batch_status(id).await.unwrap(),
        Some(BatchStatus::Pending)
    );
    assert!(tracker.stuck_batches().is_empty());
    assert_eq!(tracker.metrics().stuck_batches(), 0);
    assert!(!tracker
        .events()
        .recent_for_batch(id, 100)
        .iter()
        .any(|e| e.event_type == EventType::SimulationAborted));

    flaky.disarm();
    tracker.start_batch(id).await.unwrap();
    wait_for_status(store.as_ref(), id, BatchStatus::Completed).await;
    assert!(tracker.stuck_batches().is_empty());
    assert_eq!(tracker.metrics().stuck_batches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_geocode_timeout_follows_provider_settings() {
    let store: Arc<dyn BatchStore> = Arc::new(MemoryStore::new());
    let id = seed(store.as_ref(), true).await;
    let tracker = tracker_with(
        store.clone(),
        Providers {
            planner: Arc::new(FixedPlanner::new(5, 50)),
            geocoder: Arc::new(SlowGeocoder(Duration::from_secs(1))),
            geocode_timeout: Duration::from_millis(200),
        },
    );

    tracker.start_batch(id).await.unwrap();
    wait_for_status(store.as_ref(), id, BatchStatus::Completed).await;

    let trail = tracker.trail(id).await.unwrap();
    assert!(!trail.is_empty());
    assert!(trail
        .iter()
        .all(|s| s.address.as_deref() == Some(PENDING_ADDRESS)));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_batch_delivering() {
    let store: Arc<dyn BatchStore> = Arc::new(MemoryStore::new());
    let id = seed(store.as_ref(), true).await;
    let tracker = tracker(store.clone(), Arc::new(FixedPlanner::new(10, 1000)));

    tracker.start_batch(id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(tracker.shutdown().await, vec![id]);
    assert_eq!(
        store.batch_status(id).await.unwrap(),
        Some(BatchStatus::Delivering)
    );
}
