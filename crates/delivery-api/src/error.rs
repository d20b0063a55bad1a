//! API error types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use delivery_tracker::{TrackerError, Transition};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transition: Option<Transition>,
}

fn classify(err: &TrackerError) -> (StatusCode, &'static str) {
    match err {
        TrackerError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        TrackerError::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
        TrackerError::NoWaypoints { .. } => (StatusCode::CONFLICT, "no_waypoints"),
        TrackerError::EmptyPath { .. } => (StatusCode::CONFLICT, "empty_path"),
        TrackerError::UpstreamUnavailable { .. } => {
            (StatusCode::BAD_GATEWAY, "upstream_unavailable")
        }
        TrackerError::Persistence { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "persistence_failure")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: "bad_request".into(),
                    message: msg.clone(),
                    batch_id: None,
                    transition: None,
                },
            ),
            ApiError::Tracker(err) => {
                let (status, error_type) = classify(err);
                if status.is_server_error() {
                    error!("Request failed: {}", err);
                }
                let transition = match err {
                    TrackerError::InvalidState { transition, .. } => Some(*transition),
                    _ => None,
                };
                (
                    status,
                    ErrorResponse {
                        error: error_type.into(),
                        message: err.to_string(),
                        batch_id: err.batch_id().map(|id| id.to_string()),
                        transition,
                    },
                )
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: "internal_error".into(),
                        message: msg.clone(),
                        batch_id: None,
                        transition: None,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
