//! Error types for the delivery tracking core

use thiserror::Error;

/// Core error type for domain parsing and validation
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid position: latitude={lat}, longitude={lng}")]
    InvalidPosition { lat: f64, lng: f64 },

    #[error("Unknown batch status: {0}")]
    UnknownBatchStatus(String),

    #[error("Unknown order status: {0}")]
    UnknownOrderStatus(String),

    #[error("Malformed route data: {0}")]
    MalformedRoute(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn invalid_position(lat: f64, lng: f64) -> Self {
        Self::InvalidPosition { lat, lng }
    }

    pub fn malformed_route(msg: impl Into<String>) -> Self {
        Self::MalformedRoute(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
