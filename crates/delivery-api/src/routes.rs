//! API route definitions

use crate::handlers;
use crate::state::AppState;

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = if state.config.cors_permissive {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .max_age(Duration::from_secs(3600))
    } else {
        CorsLayer::new()
            .allow_origin(HeaderValue::from_static("http://localhost:8080"))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        // Health & Status
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))

        // Metrics (Prometheus format)
        .route("/metrics", get(handlers::metrics))

        // Batch commands
        .route("/api/v1/batches/{id}/start", post(handlers::start_batch))
        .route("/api/v1/batches/{id}/stop", post(handlers::stop_batch))
        .route("/api/v1/batches/{id}/complete", post(handlers::complete_batch))

        // Tracking
        .route("/api/v1/batches/{id}/route", get(handlers::get_route))
        .route("/api/v1/batches/{id}/location", get(handlers::get_location))
        .route("/api/v1/batches/{id}/trail", get(handlers::get_trail))
        .route("/api/v1/orders/{id}/tracking", get(handlers::track_order))

        // Lifecycle events
        .route("/api/v1/events", get(handlers::list_events))

        // Apply middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state)
}
