//! ScyllaDB-backed batch store
//!
//! One repository per table family, all sharing the session. Status changes
//! use lightweight transactions (`IF status = ?`) so a stop issued during a
//! running simulation cannot be overwritten by the loop's completion write.

use crate::{BatchStore, DbConfig, DbError, DbResult, migrations};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delivery_core::{
    Batch, BatchId, BatchStatus, DriverId, LatLng, LocationSample, Order, OrderId, OrderStatus,
    RouteRecord, Stop, Warehouse, WarehouseId,
};
use scylla::frame::response::result::{CqlValue, Row};
use scylla::{QueryResult, Session, SessionBuilder};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DbResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::serialization(format!("timestamp out of range: {}", ms)))
}

fn to_index(index: i32) -> u32 {
    u32::try_from(index).unwrap_or(0)
}

/// Read the `[applied]` column of a lightweight transaction result
fn was_applied(result: QueryResult) -> DbResult<bool> {
    let rows = result
        .into_rows_result()
        .map_err(|e| DbError::query(e.to_string()))?;
    let row = rows
        .maybe_first_row::<Row>()
        .map_err(|e| DbError::query(e.to_string()))?;

    match row.and_then(|r| r.columns.into_iter().next().flatten()) {
        Some(CqlValue::Boolean(applied)) => Ok(applied),
        other => Err(DbError::query(format!(
            "unexpected conditional update result: {:?}",
            other
        ))),
    }
}

/// Main database client
pub struct ScyllaStore {
    session: Arc<Session>,
    batch_repo: BatchRepository,
    stop_repo: StopRepository,
    location_repo: LocationRepository,
    directory_repo: DirectoryRepository,
}

impl ScyllaStore {
    pub async fn connect(config: &DbConfig) -> DbResult<Self> {
        info!("Connecting to ScyllaDB cluster: {:?}", config.hosts);

        let session = SessionBuilder::new()
            .known_nodes(&config.hosts)
            .connection_timeout(config.connection_timeout())
            .build()
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        if config.run_migrations {
            migrations::create_keyspace(&session, config).await?;
        }

        session
            .use_keyspace(&config.keyspace, false)
            .await
            .map_err(|e| DbError::Configuration(format!("keyspace {}: {}", config.keyspace, e)))?;

        if config.run_migrations {
            migrations::run_all(&session).await?;
        }

        let session = Arc::new(session);
        info!("Connected to ScyllaDB (keyspace {})", config.keyspace);

        Ok(Self {
            batch_repo: BatchRepository::new(session.clone()),
            stop_repo: StopRepository::new(session.clone()),
            location_repo: LocationRepository::new(session.clone()),
            directory_repo: DirectoryRepository::new(session.clone()),
            session,
        })
    }

    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }

    pub fn batches(&self) -> &BatchRepository {
        &self.batch_repo
    }

    pub fn stops(&self) -> &StopRepository {
        &self.stop_repo
    }

    pub fn locations(&self) -> &LocationRepository {
        &self.location_repo
    }

    pub fn directory(&self) -> &DirectoryRepository {
        &self.directory_repo
    }
}

#[async_trait]
impl BatchStore for ScyllaStore {
    async fn get_batch(&self, id: BatchId) -> DbResult<Option<Batch>> {
        self.batch_repo.get(id).await
    }

    async fn insert_batch(&self, batch: &Batch) -> DbResult<()> {
        self.batch_repo.insert(batch).await
    }

    async fn batch_status(&self, id: BatchId) -> DbResult<Option<BatchStatus>> {
        self.batch_repo.status(id).await
    }

    async fn transition_status(
        &self,
        id: BatchId,
        from: BatchStatus,
        to: BatchStatus,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.batch_repo.transition(id, from, to, at).await
    }

    async fn save_route(&self, id: BatchId, route: &RouteRecord) -> DbResult<()> {
        self.batch_repo.save_route(id, route).await
    }

    async fn update_current_index(&self, id: BatchId, index: u32) -> DbResult<()> {
        self.batch_repo.update_current_index(id, index).await
    }

    async fn insert_stop(&self, stop: &Stop) -> DbResult<()> {
        self.stop_repo.insert(stop).await
    }

    async fn stops_for_batch(&self, id: BatchId) -> DbResult<Vec<Stop>> {
        self.stop_repo.for_batch(id).await
    }

    async fn latest_stop_for_order(&self, order_id: OrderId) -> DbResult<Option<Stop>> {
        self.stop_repo.latest_for_order(order_id).await
    }

    async fn append_location(&self, sample: &LocationSample) -> DbResult<()> {
        self.location_repo.insert(sample).await
    }

    async fn latest_location(&self, id: BatchId) -> DbResult<Option<LocationSample>> {
        self.location_repo.latest(id).await
    }

    async fn locations_for_batch(&self, id: BatchId) -> DbResult<Vec<LocationSample>> {
        self.location_repo.history(id).await
    }

    async fn get_warehouse(&self, id: WarehouseId) -> DbResult<Option<Warehouse>> {
        self.directory_repo.warehouse(id).await
    }

    async fn insert_warehouse(&self, warehouse: &Warehouse) -> DbResult<()> {
        self.directory_repo.insert_warehouse(warehouse).await
    }

    async fn get_order(&self, id: OrderId) -> DbResult<Option<Order>> {
        self.directory_repo.order(id).await
    }

    async fn insert_order(&self, order: &Order) -> DbResult<()> {
        self.directory_repo.insert_order(order).await
    }

    async fn set_order_status(&self, ids: &[OrderId], status: OrderStatus) -> DbResult<()> {
        self.directory_repo.set_order_status(ids, status).await
    }

    async fn health_check(&self) -> DbResult<bool> {
        let result = self
            .session
            .query_unpaged("SELECT now() FROM system.local", &[])
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Database health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

// ============================================================================
// REPOSITORY IMPLEMENTATIONS
// ============================================================================

type BatchRow = (
    Uuid,
    i64,
    i64,
    String,
    i64,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<i32>,
);

/// Repository for the batch record
#[derive(Clone)]
pub struct BatchRepository {
    session: Arc<Session>,
}

impl BatchRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn insert(&self, batch: &Batch) -> DbResult<()> {
        let query = r#"
            INSERT INTO batches (
                batch_id, driver_id, warehouse_id, status, created_at,
                started_at, completed_at, route_data,
                total_distance_meters, total_duration_seconds, current_index
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            IF NOT EXISTS
        "#;

        let result = self
            .session
            .query_unpaged(
                query,
                (
                    batch.id.0,
                    batch.driver_id.0,
                    batch.warehouse_id.0,
                    batch.status.as_str(),
                    to_millis(batch.created_at),
                    batch.started_at.map(to_millis),
                    batch.completed_at.map(to_millis),
                    batch.route_data.as_deref(),
                    batch.total_distance_meters,
                    batch.total_duration_seconds,
                    batch.current_index as i32,
                ),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        if was_applied(result)? {
            Ok(())
        } else {
            Err(DbError::duplicate(format!("batch {}", batch.id)))
        }
    }

    pub async fn get(&self, id: BatchId) -> DbResult<Option<Batch>> {
        let query = r#"
            SELECT batch_id, driver_id, warehouse_id, status, created_at,
                   started_at, completed_at, route_data,
                   total_distance_meters, total_duration_seconds, current_index
            FROM batches
            WHERE batch_id = ?
        "#;

        let result = self
            .session
            .query_unpaged(query, (id.0,))
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows_result = result
            .into_rows_result()
            .map_err(|e| DbError::Query(e.to_string()))?;
        let row = rows_result
            .maybe_first_row::<BatchRow>()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        row.map(Self::parse_row).transpose()
    }

    fn parse_row(row: BatchRow) -> DbResult<Batch> {
        let (
            batch_id,
            driver_id,
            warehouse_id,
            status,
            created_at,
            started_at,
            completed_at,
            route_data,
            distance,
            duration,
            current_index,
        ) = row;

        Ok(Batch {
            id: BatchId::from_uuid(batch_id),
            driver_id: DriverId(driver_id),
            warehouse_id: WarehouseId(warehouse_id),
            status: status.parse()?,
            created_at: from_millis(created_at)?,
            started_at: started_at.map(from_millis).transpose()?,
            completed_at: completed_at.map(from_millis).transpose()?,
            route_data,
            total_distance_meters: distance.unwrap_or(0),
            total_duration_seconds: duration.unwrap_or(0),
            current_index: current_index.map(to_index).unwrap_or(0),
        })
    }

    pub async fn status(&self, id: BatchId) -> DbResult<Option<BatchStatus>> {
        let result = self
            .session
            .query_unpaged("SELECT status FROM batches WHERE batch_id = ?", (id.0,))
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows_result = result
            .into_rows_result()
            .map_err(|e| DbError::Query(e.to_string()))?;
        let row = rows_result
            .maybe_first_row::<(String,)>()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        match row {
            Some((status,)) => Ok(Some(status.parse()?)),
            None => Ok(None),
        }
    }

    pub async fn transition(
        &self,
        id: BatchId,
        from: BatchStatus,
        to: BatchStatus,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = match to {
            BatchStatus::Delivering => {
                self.session
                    .query_unpaged(
                        "UPDATE batches SET status = ?, started_at = ?, completed_at = null \
                         WHERE batch_id = ? IF status = ?",
                        (to.as_str(), to_millis(at), id.0, from.as_str()),
                    )
                    .await
            }
            BatchStatus::Completed => {
                self.session
                    .query_unpaged(
                        "UPDATE batches SET status = ?, completed_at = ? \
                         WHERE batch_id = ? IF status = ?",
                        (to.as_str(), to_millis(at), id.0, from.as_str()),
                    )
                    .await
            }
            BatchStatus::Pending => {
                self.session
                    .query_unpaged(
                        "UPDATE batches SET status = ? WHERE batch_id = ? IF status = ?",
                        (to.as_str(), id.0, from.as_str()),
                    )
                    .await
            }
        }
        .map_err(|e| DbError::Query(e.to_string()))?;

        was_applied(result)
    }

    pub async fn save_route(&self, id: BatchId, route: &RouteRecord) -> DbResult<()> {
        let query = r#"
            UPDATE batches SET
                route_data = ?, total_distance_meters = ?,
                total_duration_seconds = ?, current_index = 0
            WHERE batch_id = ?
            IF EXISTS
        "#;

        let result = self
            .session
            .query_unpaged(
                query,
                (
                    route.route_data.as_str(),
                    route.total_distance_meters,
                    route.total_duration_seconds,
                    id.0,
                ),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        if was_applied(result)? {
            Ok(())
        } else {
            Err(DbError::not_found(format!("batch {}", id)))
        }
    }

    /// Plain write, issued once per simulation step
    pub async fn update_current_index(&self, id: BatchId, index: u32) -> DbResult<()> {
        self.session
            .query_unpaged(
                "UPDATE batches SET current_index = ? WHERE batch_id = ?",
                (index as i32, id.0),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(())
    }
}

/// Repository for batch/order stop associations
#[derive(Clone)]
pub struct StopRepository {
    session: Arc<Session>,
}

impl StopRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn insert(&self, stop: &Stop) -> DbResult<()> {
        let assigned_at = to_millis(stop.assigned_at);
        let sequence = stop.stop_sequence as i32;

        let result = self
            .session
            .query_unpaged(
                "INSERT INTO stops_by_batch (batch_id, stop_sequence, order_id, assigned_at) \
                 VALUES (?, ?, ?, ?) IF NOT EXISTS",
                (stop.batch_id.0, sequence, stop.order_id.0, assigned_at),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        if !was_applied(result)? {
            return Err(DbError::duplicate(format!(
                "stop {} of batch {}",
                stop.stop_sequence, stop.batch_id
            )));
        }

        self.session
            .query_unpaged(
                "INSERT INTO stops_by_order (order_id, assigned_at, batch_id, stop_sequence) \
                 VALUES (?, ?, ?, ?)",
                (stop.order_id.0, assigned_at, stop.batch_id.0, sequence),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }

    pub async fn for_batch(&self, id: BatchId) -> DbResult<Vec<Stop>> {
        let result = self
            .session
            .query_unpaged(
                "SELECT stop_sequence, order_id, assigned_at FROM stops_by_batch \
                 WHERE batch_id = ?",
                (id.0,),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows_result = result
            .into_rows_result()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let mut stops = Vec::new();
        for row in rows_result
            .rows::<(i32, i64, i64)>()
            .map_err(|e| DbError::Serialization(e.to_string()))?
        {
            let (sequence, order_id, assigned_at) =
                row.map_err(|e| DbError::Serialization(e.to_string()))?;
            stops.push(Stop {
                batch_id: id,
                order_id: OrderId(order_id),
                stop_sequence: to_index(sequence),
                assigned_at: from_millis(assigned_at)?,
            });
        }
        Ok(stops)
    }

    pub async fn latest_for_order(&self, order_id: OrderId) -> DbResult<Option<Stop>> {
        let result = self
            .session
            .query_unpaged(
                "SELECT assigned_at, batch_id, stop_sequence FROM stops_by_order \
                 WHERE order_id = ? LIMIT 1",
                (order_id.0,),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows_result = result
            .into_rows_result()
            .map_err(|e| DbError::Query(e.to_string()))?;
        let row = rows_result
            .maybe_first_row::<(i64, Uuid, i32)>()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        row.map(|(assigned_at, batch_id, sequence)| {
            Ok(Stop {
                batch_id: BatchId::from_uuid(batch_id),
                order_id,
                stop_sequence: to_index(sequence),
                assigned_at: from_millis(assigned_at)?,
            })
        })
        .transpose()
    }
}

type LocationRow = (i64, i32, f64, f64, Option<String>);

/// Repository for append-only location samples
#[derive(Clone)]
pub struct LocationRepository {
    session: Arc<Session>,
}

impl LocationRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn insert(&self, sample: &LocationSample) -> DbResult<()> {
        let query = r#"
            INSERT INTO location_samples (
                batch_id, recorded_at, path_index, latitude, longitude, address
            ) VALUES (?, ?, ?, ?, ?, ?)
        "#;

        self.session
            .query_unpaged(
                query,
                (
                    sample.batch_id.0,
                    to_millis(sample.recorded_at),
                    sample.path_index as i32,
                    sample.position.latitude,
                    sample.position.longitude,
                    sample.address.as_deref(),
                ),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }

    pub async fn latest(&self, id: BatchId) -> DbResult<Option<LocationSample>> {
        let query = r#"
            SELECT recorded_at, path_index, latitude, longitude, address
            FROM location_samples
            WHERE batch_id = ?
            ORDER BY recorded_at DESC, path_index DESC
            LIMIT 1
        "#;

        let result = self
            .session
            .query_unpaged(query, (id.0,))
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows_result = result
            .into_rows_result()
            .map_err(|e| DbError::Query(e.to_string()))?;
        let row = rows_result
            .maybe_first_row::<LocationRow>()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        row.map(|row| Self::parse_row(id, row)).transpose()
    }

    pub async fn history(&self, id: BatchId) -> DbResult<Vec<LocationSample>> {
        let query = r#"
            SELECT recorded_at, path_index, latitude, longitude, address
            FROM location_samples
            WHERE batch_id = ?
        "#;

        let result = self
            .session
            .query_unpaged(query, (id.0,))
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows_result = result
            .into_rows_result()
            .map_err(|e| DbError::Query(e.to_string()))?;

        rows_result
            .rows::<LocationRow>()
            .map_err(|e| DbError::Serialization(e.to_string()))?
            .map(|row| {
                row.map_err(|e| DbError::Serialization(e.to_string()))
                    .and_then(|row| Self::parse_row(id, row))
            })
            .collect()
    }

    fn parse_row(batch_id: BatchId, row: LocationRow) -> DbResult<LocationSample> {
        let (recorded_at, path_index, latitude, longitude, address) = row;
        Ok(LocationSample {
            batch_id,
            position: LatLng::new(latitude, longitude),
            address,
            path_index: to_index(path_index),
            recorded_at: from_millis(recorded_at)?,
        })
    }
}

/// Repository for the warehouse and order slices the tracker reads
#[derive(Clone)]
pub struct DirectoryRepository {
    session: Arc<Session>,
}

impl DirectoryRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn warehouse(&self, id: WarehouseId) -> DbResult<Option<Warehouse>> {
        let result = self
            .session
            .query_unpaged(
                "SELECT name, address, latitude, longitude FROM warehouses WHERE warehouse_id = ?",
                (id.0,),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows_result = result
            .into_rows_result()
            .map_err(|e| DbError::Query(e.to_string()))?;
        let row = rows_result
            .maybe_first_row::<(String, Option<String>, f64, f64)>()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        Ok(row.map(|(name, address, latitude, longitude)| Warehouse {
            id,
            name,
            address,
            location: LatLng::new(latitude, longitude),
        }))
    }

    pub async fn insert_warehouse(&self, warehouse: &Warehouse) -> DbResult<()> {
        self.session
            .query_unpaged(
                "INSERT INTO warehouses (warehouse_id, name, address, latitude, longitude) \
                 VALUES (?, ?, ?, ?, ?)",
                (
                    warehouse.id.0,
                    warehouse.name.as_str(),
                    warehouse.address.as_deref(),
                    warehouse.location.latitude,
                    warehouse.location.longitude,
                ),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(())
    }

    pub async fn order(&self, id: OrderId) -> DbResult<Option<Order>> {
        let result = self
            .session
            .query_unpaged(
                "SELECT latitude, longitude, delivery_address, status FROM orders \
                 WHERE order_id = ?",
                (id.0,),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows_result = result
            .into_rows_result()
            .map_err(|e| DbError::Query(e.to_string()))?;
        let row = rows_result
            .maybe_first_row::<(Option<f64>, Option<f64>, Option<String>, Option<String>)>()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        let Some((latitude, longitude, delivery_address, status)) = row else {
            return Ok(None);
        };

        let destination = match (latitude, longitude) {
            (Some(lat), Some(lng)) => Some(LatLng::new(lat, lng)),
            _ => None,
        };
        let status = match status {
            Some(s) => s.parse()?,
            None => OrderStatus::default(),
        };

        Ok(Some(Order {
            id,
            destination,
            delivery_address,
            status,
        }))
    }

    pub async fn insert_order(&self, order: &Order) -> DbResult<()> {
        self.session
            .query_unpaged(
                "INSERT INTO orders (order_id, latitude, longitude, delivery_address, status) \
                 VALUES (?, ?, ?, ?, ?)",
                (
                    order.id.0,
                    order.destination.map(|d| d.latitude),
                    order.destination.map(|d| d.longitude),
                    order.delivery_address.as_deref(),
                    order.status.as_str(),
                ),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(())
    }

    pub async fn set_order_status(&self, ids: &[OrderId], status: OrderStatus) -> DbResult<()> {
        for id in ids {
            self.session
                .query_unpaged(
                    "UPDATE orders SET status = ? WHERE order_id = ? IF EXISTS",
                    (status.as_str(), id.0),
                )
                .await
                .map_err(|e| DbError::Query(e.to_string()))?;
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
