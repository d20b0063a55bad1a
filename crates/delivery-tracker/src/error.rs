//! Tracker error types

use delivery_core::{BatchId, BatchStatus};
use delivery_db::DbError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Lifecycle command a caller attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Start,
    Stop,
    Complete,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Start => write!(f, "start"),
            Transition::Stop => write!(f, "stop"),
            Transition::Complete => write!(f, "complete"),
        }
    }
}

/// Errors surfaced by tracker commands and queries
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot {transition} batch {batch_id} while it is {status}")]
    InvalidState {
        batch_id: BatchId,
        status: BatchStatus,
        transition: Transition,
    },

    #[error("route planning for batch {batch_id} failed: {reason}")]
    UpstreamUnavailable { batch_id: BatchId, reason: String },

    #[error("batch {batch_id} has no orders with a usable destination")]
    NoWaypoints { batch_id: BatchId },

    #[error("route of batch {batch_id} decodes to an empty path")]
    EmptyPath { batch_id: BatchId },

    #[error("storage failure: {source}")]
    Persistence {
        batch_id: Option<BatchId>,
        #[source]
        source: DbError,
    },
}

impl TrackerError {
    pub fn batch_not_found(id: BatchId) -> Self {
        Self::NotFound {
            entity: "batch",
            id: id.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(batch_id: BatchId, status: BatchStatus, transition: Transition) -> Self {
        Self::InvalidState {
            batch_id,
            status,
            transition,
        }
    }

    /// Storage failure tied to a batch
    pub fn persistence(batch_id: BatchId, source: DbError) -> Self {
        Self::Persistence {
            batch_id: Some(batch_id),
            source,
        }
    }

    /// Batch this error concerns, if any
    pub fn batch_id(&self) -> Option<BatchId> {
        match self {
            Self::NotFound { .. } => None,
            Self::InvalidState { batch_id, .. }
            | Self::UpstreamUnavailable { batch_id, .. }
            | Self::NoWaypoints { batch_id }
            | Self::EmptyPath { batch_id } => Some(*batch_id),
            Self::Persistence { batch_id, .. } => *batch_id,
        }
    }
}

impl From<DbError> for TrackerError {
    fn from(source: DbError) -> Self {
        Self::Persistence {
            batch_id: None,
            source,
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
