//! Lifecycle event types for delivery batches
//!
//! Emitted by the simulation engine and the command facade; kept in a
//! bounded history for the events endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BatchId, BatchStatus, LatLng};

/// Event envelope for all batch events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub payload: EventPayload,
}

impl BatchEvent {
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            payload,
        }
    }

    pub fn batch_started(batch_id: BatchId, path_length: usize) -> Self {
        Self::new(
            EventType::BatchStarted,
            EventPayload::Lifecycle(LifecycleEvent {
                batch_id,
                status: BatchStatus::Delivering,
                current_index: 0,
                path_length,
                message: None,
            }),
        )
    }

    pub fn batch_stopped(batch_id: BatchId, current_index: u32, path_length: usize) -> Self {
        Self::new(
            EventType::BatchStopped,
            EventPayload::Lifecycle(LifecycleEvent {
                batch_id,
                status: BatchStatus::Pending,
                current_index,
                path_length,
                message: None,
            }),
        )
    }

    pub fn batch_completed(batch_id: BatchId, current_index: u32, path_length: usize) -> Self {
        Self::new(
            EventType::BatchCompleted,
            EventPayload::Lifecycle(LifecycleEvent {
                batch_id,
                status: BatchStatus::Completed,
                current_index,
                path_length,
                message: None,
            }),
        )
    }

    pub fn simulation_aborted(
        batch_id: BatchId,
        current_index: u32,
        path_length: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            EventType::SimulationAborted,
            EventPayload::Lifecycle(LifecycleEvent {
                batch_id,
                status: BatchStatus::Delivering,
                current_index,
                path_length,
                message: Some(reason.into()),
            }),
        )
    }

    pub fn location_recorded(
        batch_id: BatchId,
        position: LatLng,
        address: Option<String>,
        path_index: u32,
    ) -> Self {
        Self::new(
            EventType::LocationRecorded,
            EventPayload::Location(LocationEvent {
                batch_id,
                position,
                address,
                path_index,
            }),
        )
    }

    /// Batch this event concerns
    pub fn batch_id(&self) -> BatchId {
        match &self.payload {
            EventPayload::Lifecycle(e) => e.batch_id,
            EventPayload::Location(e) => e.batch_id,
        }
    }
}

/// Type of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Lifecycle events
    BatchStarted,
    BatchStopped,
    BatchCompleted,
    SimulationAborted,

    // Sampling events
    LocationRecorded,
}

/// Event payload variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    Lifecycle(LifecycleEvent),
    Location(LocationEvent),
}

/// Batch lifecycle transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub current_index: u32,
    pub path_length: usize,
    pub message: Option<String>,
}

/// A location sample was appended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationEvent {
    pub batch_id: BatchId,
    pub position: LatLng,
    pub address: Option<String>,
    pub path_index: u32,
}

// ============================================================================
// TESTS
// ============================================================================
