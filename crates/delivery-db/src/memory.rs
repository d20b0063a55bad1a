//! In-process batch store
//!
//! Backs the degraded mode when no database is configured and every test
//! that needs a store. One lock guards all tables so each trait call is
//! atomic, including the status compare-and-set.

use crate::{BatchStore, DbError, DbResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delivery_core::{
    Batch, BatchId, BatchStatus, LocationSample, Order, OrderId, OrderStatus, RouteRecord, Stop,
    Warehouse, WarehouseId,
};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct Tables {
    batches: HashMap<BatchId, Batch>,
    stops: Vec<Stop>,
    locations: HashMap<BatchId, Vec<LocationSample>>,
    warehouses: HashMap<WarehouseId, Warehouse>,
    orders: HashMap<OrderId, Order>,
}

/// Store keeping every table in process memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_count(&self) -> usize {
        self.tables.read().batches.len()
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn get_batch(&self, id: BatchId) -> DbResult<Option<Batch>> {
        Ok(self.tables.read().batches.get(&id).cloned())
    }

    async fn insert_batch(&self, batch: &Batch) -> DbResult<()> {
        let mut tables = self.tables.write();
        if tables.batches.contains_key(&batch.id) {
            return Err(DbError::duplicate(format!("batch {}", batch.id)));
        }
        tables.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn batch_status(&self, id: BatchId) -> DbResult<Option<BatchStatus>> {
        Ok(self.tables.read().batches.get(&id).map(|b| b.status))
    }

    async fn transition_status(
        &self,
        id: BatchId,
        from: BatchStatus,
        to: BatchStatus,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let mut tables = self.tables.write();
        let Some(batch) = tables.batches.get_mut(&id) else {
            return Ok(false);
        };
        if batch.status != from {
            return Ok(false);
        }

        batch.status = to;
        match to {
            BatchStatus::Delivering => {
                batch.started_at = Some(at);
                batch.completed_at = None;
            }
            BatchStatus::Completed => batch.completed_at = Some(at),
            BatchStatus::Pending => {}
        }
        Ok(true)
    }

    async fn save_route(&self, id: BatchId, route: &RouteRecord) -> DbResult<()> {
        let mut tables = self.tables.write();
        let batch = tables
            .batches
            .get_mut(&id)
            .ok_or_else(|| DbError::not_found(format!("batch {}", id)))?;

        batch.route_data = Some(route.route_data.clone());
        batch.total_distance_meters = route.total_distance_meters;
        batch.total_duration_seconds = route.total_duration_seconds;
        batch.current_index = 0;
        Ok(())
    }

    async fn update_current_index(&self, id: BatchId, index: u32) -> DbResult<()> {
        let mut tables = self.tables.write();
        let batch = tables
            .batches
            .get_mut(&id)
            .ok_or_else(|| DbError::not_found(format!("batch {}", id)))?;
        batch.current_index = index;
        Ok(())
    }

    async fn insert_stop(&self, stop: &Stop) -> DbResult<()> {
        let mut tables = self.tables.write();
        let taken = tables
            .stops
            .iter()
            .any(|s| s.batch_id == stop.batch_id && s.stop_sequence == stop.stop_sequence);
        if taken {
            return Err(DbError::duplicate(format!(
                "stop {} of batch {}",
                stop.stop_sequence, stop.batch_id
            )));
        }
        tables.stops.push(stop.clone());
        Ok(())
    }

    async fn stops_for_batch(&self, id: BatchId) -> DbResult<Vec<Stop>> {
        let mut stops: Vec<Stop> = self
            .tables
            .read()
            .stops
            .iter()
            .filter(|s| s.batch_id == id)
            .cloned()
            .collect();
        stops.sort_by_key(|s| s.stop_sequence);
        Ok(stops)
    }

    async fn latest_stop_for_order(&self, order_id: OrderId) -> DbResult<Option<Stop>> {
        // max_by_key keeps the last of equal keys, so ties go to the later insert
        Ok(self
            .tables
            .read()
            .stops
            .iter()
            .filter(|s| s.order_id == order_id)
            .max_by_key(|s| s.assigned_at)
            .cloned())
    }

    async fn append_location(&self, sample: &LocationSample) -> DbResult<()> {
        self.tables
            .write()
            .locations
            .entry(sample.batch_id)
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    async fn latest_location(&self, id: BatchId) -> DbResult<Option<LocationSample>> {
        Ok(self
            .tables
            .read()
            .locations
            .get(&id)
            .and_then(|samples| samples.last().cloned()))
    }

    async fn locations_for_batch(&self, id: BatchId) -> DbResult<Vec<LocationSample>> {
        Ok(self
            .tables
            .read()
            .locations
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_warehouse(&self, id: WarehouseId) -> DbResult<Option<Warehouse>> {
        Ok(self.tables.read().warehouses.get(&id).cloned())
    }

    async fn insert_warehouse(&self, warehouse: &Warehouse) -> DbResult<()> {
        self.tables
            .write()
            .warehouses
            .insert(warehouse.id, warehouse.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> DbResult<Option<Order>> {
        Ok(self.tables.read().orders.get(&id).cloned())
    }

    async fn insert_order(&self, order: &Order) -> DbResult<()> {
        self.tables.write().orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn set_order_status(&self, ids: &[OrderId], status: OrderStatus) -> DbResult<()> {
        let mut tables = self.tables.write();
        for id in ids {
            if let Some(order) = tables.orders.get_mut(id) {
                order.status = status;
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> DbResult<bool> {
        Ok(true)
    }
}

// ============================================================================
// TESTS
// ============================================================================
