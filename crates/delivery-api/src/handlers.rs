//! API request handlers

use crate::error::ApiError;
use crate::state::AppState;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use delivery_core::{BatchEvent, BatchId, BatchStatus, LocationSample, OrderId};
use delivery_tracker::{LocationSnapshot, OrderTracking, WarehouseInfo};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ============================================================================
// RESPONSE TYPES
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct CommandResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    pub message: String,
}

#[derive(Serialize)]
pub struct StartResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    pub path_length: usize,
    pub total_distance_meters: i64,
    pub total_duration_seconds: i64,
}

#[derive(Serialize)]
pub struct RouteResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    pub route_data: String,
    pub total_distance_meters: i64,
    pub total_duration_seconds: i64,
    pub path_length: usize,
}

#[derive(Serialize)]
pub struct LocationResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub current_index: usize,
    pub path_length: usize,
    pub progress_percent: f64,
    pub remaining_distance_meters: f64,
    pub remaining_time_seconds: i64,
    pub timestamp: DateTime<Utc>,
}

impl From<LocationSnapshot> for LocationResponse {
    fn from(snapshot: LocationSnapshot) -> Self {
        Self {
            batch_id: snapshot.batch_id.to_string(),
            status: snapshot.status,
            latitude: snapshot.position.latitude,
            longitude: snapshot.position.longitude,
            address: snapshot.address,
            current_index: snapshot.current_index,
            path_length: snapshot.path_length,
            progress_percent: round_tenth(snapshot.progress.percent),
            remaining_distance_meters: round_tenth(snapshot.progress.remaining_distance_meters),
            remaining_time_seconds: snapshot.progress.remaining_time_seconds.round() as i64,
            timestamp: snapshot.timestamp,
        }
    }
}

#[derive(Serialize)]
pub struct OrderTrackingResponse {
    pub order_id: i64,
    pub batch_id: String,
    pub stop_sequence: u32,
    pub batch_status: BatchStatus,
    pub warehouse: Option<WarehouseInfo>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub location: Option<LocationResponse>,
}

impl From<OrderTracking> for OrderTrackingResponse {
    fn from(tracking: OrderTracking) -> Self {
        Self {
            order_id: tracking.order_id.0,
            batch_id: tracking.batch_id.to_string(),
            stop_sequence: tracking.stop_sequence,
            batch_status: tracking.batch_status,
            warehouse: tracking.warehouse,
            created_at: tracking.created_at,
            started_at: tracking.started_at,
            completed_at: tracking.completed_at,
            location: tracking.location.map(LocationResponse::from),
        }
    }
}

#[derive(Serialize)]
pub struct TrailResponse {
    pub batch_id: String,
    pub samples: Vec<LocationSample>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub events: Vec<BatchEvent>,
    pub total_published: u64,
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
    pub batch_id: Option<String>,
}

/// Default and maximum page size of the events endpoint
const DEFAULT_EVENT_LIMIT: usize = 100;
const MAX_EVENT_LIMIT: usize = 1000;

/// Round to one decimal place for presentation
fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn parse_batch_id(raw: &str) -> Result<BatchId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid batch id: {}", raw)))
}

fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    raw.parse::<i64>()
        .map(OrderId)
        .map_err(|_| ApiError::bad_request(format!("invalid order id: {}", raw)))
}

// ============================================================================
// HEALTH & STATUS HANDLERS
// ============================================================================

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check (for Kubernetes)
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.store_ready().await;
    let body = Json(serde_json::json!({
        "ready": ready,
        "degraded": state.degraded,
        "running_batches": state.tracker.running_batches().len(),
    }));

    if ready {
        (StatusCode::OK, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body)
    }
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export(),
    )
}

// ============================================================================
// BATCH COMMAND HANDLERS
// ============================================================================

pub async fn start_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StartResponse>, ApiError> {
    let batch_id = parse_batch_id(&id)?;
    info!("Start requested for batch {}", batch_id);

    let started = state.tracker.start_batch(batch_id).await?;
    Ok(Json(StartResponse {
        batch_id: started.batch_id.to_string(),
        status: BatchStatus::Delivering,
        path_length: started.path_length,
        total_distance_meters: started.total_distance_meters,
        total_duration_seconds: started.total_duration_seconds,
    }))
}

pub async fn stop_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    let batch_id = parse_batch_id(&id)?;
    info!("Stop requested for batch {}", batch_id);

    state.tracker.stop_batch(batch_id).await?;
    Ok(Json(CommandResponse {
        batch_id: batch_id.to_string(),
        status: BatchStatus::Pending,
        message: "simulation stopped".into(),
    }))
}

pub async fn complete_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    let batch_id = parse_batch_id(&id)?;
    info!("Completion requested for batch {}", batch_id);

    state.tracker.complete_batch(batch_id).await?;
    Ok(Json(CommandResponse {
        batch_id: batch_id.to_string(),
        status: BatchStatus::Completed,
        message: "batch completed".into(),
    }))
}

// ============================================================================
// TRACKING HANDLERS
// ============================================================================

pub async fn get_route(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RouteResponse>, ApiError> {
    let batch_id = parse_batch_id(&id)?;
    let detail = state.tracker.route_detail(batch_id).await?;

    Ok(Json(RouteResponse {
        batch_id: detail.batch_id.to_string(),
        status: detail.status,
        route_data: detail.route_data,
        total_distance_meters: detail.total_distance_meters,
        total_duration_seconds: detail.total_duration_seconds,
        path_length: detail.path_length,
    }))
}

pub async fn get_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LocationResponse>, ApiError> {
    let batch_id = parse_batch_id(&id)?;
    let snapshot = state.tracker.location(batch_id).await?;
    debug!(
        "Batch {} at index {}/{}",
        batch_id, snapshot.current_index, snapshot.path_length
    );
    Ok(Json(snapshot.into()))
}

pub async fn get_trail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TrailResponse>, ApiError> {
    let batch_id = parse_batch_id(&id)?;
    let samples = state.tracker.trail(batch_id).await?;

    Ok(Json(TrailResponse {
        batch_id: batch_id.to_string(),
        total: samples.len(),
        samples,
    }))
}

pub async fn track_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderTrackingResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let tracking = state.tracker.track_by_order(order_id).await?;
    Ok(Json(tracking.into()))
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(MAX_EVENT_LIMIT);
    let bus = state.tracker.events();

    let events = match query.batch_id.as_deref() {
        Some(raw) => bus.recent_for_batch(parse_batch_id(raw)?, limit),
        None => bus.get_recent(limit),
    };

    Ok(Json(EventsResponse {
        events,
        total_published: bus.get_event_count(),
    }))
}

// ============================================================================
// TESTS
// ============================================================================
