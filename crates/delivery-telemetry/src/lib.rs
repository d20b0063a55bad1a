//! # Delivery Telemetry - Metrics & Observability
//!
//! Prometheus metrics for the delivery tracking server:
//! - Simulation runs and their outcomes
//! - Per-step progress and location sampling
//! - Route planning calls and latency
//! - Store connectivity

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use tracing::{info, warn};

/// How a simulation run ended, or that it began
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Started,
    Completed,
    Stopped,
    Aborted,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Started => "started",
            RunOutcome::Completed => "completed",
            RunOutcome::Stopped => "stopped",
            RunOutcome::Aborted => "aborted",
        }
    }
}

/// Metrics collector for the delivery simulation
pub struct MetricsCollector {
    registry: Registry,

    // Simulation metrics
    simulations_active: IntGauge,
    simulations_total: IntCounterVec,
    simulation_steps: IntCounter,
    stuck_batches: IntGauge,

    // Sampling metrics
    location_samples: IntCounter,
    geocode_failures: IntCounter,

    // Route planning metrics
    route_plans_total: IntCounterVec,
    route_plan_duration: HistogramVec,

    // Store metrics
    db_connection_status: IntGauge,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        // Simulation metrics
        let simulations_active = IntGauge::new(
            "delivery_simulations_active",
            "Simulation loops currently running",
        )?;
        registry.register(Box::new(simulations_active.clone()))?;

        let simulations_total = IntCounterVec::new(
            Opts::new("delivery_simulations_total", "Simulation runs by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(simulations_total.clone()))?;

        let simulation_steps = IntCounter::new(
            "delivery_simulation_steps_total",
            "Path indices advanced across all runs",
        )?;
        registry.register(Box::new(simulation_steps.clone()))?;

        let stuck_batches = IntGauge::new(
            "delivery_batches_stuck",
            "Batches left DELIVERING by an aborted run",
        )?;
        registry.register(Box::new(stuck_batches.clone()))?;

        // Sampling metrics
        let location_samples = IntCounter::new(
            "delivery_location_samples_total",
            "Location samples recorded",
        )?;
        registry.register(Box::new(location_samples.clone()))?;

        let geocode_failures = IntCounter::new(
            "delivery_geocode_failures_total",
            "Reverse geocoding calls that failed or timed out",
        )?;
        registry.register(Box::new(geocode_failures.clone()))?;

        // Route planning metrics
        let route_plans_total = IntCounterVec::new(
            Opts::new("delivery_route_plans_total", "Route planning calls"),
            &["provider", "outcome"],
        )?;
        registry.register(Box::new(route_plans_total.clone()))?;

        let route_plan_duration = HistogramVec::new(
            HistogramOpts::new(
                "delivery_route_plan_duration_seconds",
                "Route planning call duration",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["provider"],
        )?;
        registry.register(Box::new(route_plan_duration.clone()))?;

        // Store metrics
        let db_connection_status = IntGauge::new(
            "delivery_db_connected",
            "Batch store connection status",
        )?;
        registry.register(Box::new(db_connection_status.clone()))?;

        info!("Metrics collector initialized");

        Ok(Self {
            registry,
            simulations_active,
            simulations_total,
            simulation_steps,
            stuck_batches,
            location_samples,
            geocode_failures,
            route_plans_total,
            route_plan_duration,
            db_connection_status,
        })
    }

    /// Get Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    // ========================================================================
    // SIMULATION METRICS
    // ========================================================================

    /// Record a run starting or ending
    pub fn record_run(&self, outcome: RunOutcome) {
        self.simulations_total
            .with_label_values(&[outcome.as_str()])
            .inc();

        match outcome {
            RunOutcome::Started => self.simulations_active.inc(),
            RunOutcome::Aborted => {
                self.simulations_active.dec();
                self.stuck_batches.inc();
            }
            RunOutcome::Completed | RunOutcome::Stopped => self.simulations_active.dec(),
        }
    }

    /// A stuck batch was resolved by a later command
    pub fn clear_stuck_batch(&self) {
        if self.stuck_batches.get() > 0 {
            self.stuck_batches.dec();
        }
    }

    pub fn record_step(&self) {
        self.simulation_steps.inc();
    }

    pub fn active_simulations(&self) -> i64 {
        self.simulations_active.get()
    }

    pub fn stuck_batches(&self) -> i64 {
        self.stuck_batches.get()
    }

    pub fn runs(&self, outcome: RunOutcome) -> u64 {
        self.simulations_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    // ========================================================================
    // SAMPLING METRICS
    // ========================================================================

    pub fn record_location_sample(&self) {
        self.location_samples.inc();
    }

    pub fn record_geocode_failure(&self) {
        self.geocode_failures.inc();
    }

    pub fn geocode_failures(&self) -> u64 {
        self.geocode_failures.get()
    }

    // ========================================================================
    // ROUTE PLANNING METRICS
    // ========================================================================

    /// Record a route planning call
    pub fn record_route_plan(&self, provider: &str, success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.route_plans_total
            .with_label_values(&[provider, outcome])
            .inc();
        self.route_plan_duration
            .with_label_values(&[provider])
            .observe(duration_secs);
    }

    // ========================================================================
    // STORE METRICS
    // ========================================================================

    /// Set store connection status
    pub fn set_db_connected(&self, connected: bool) {
        self.db_connection_status.set(if connected { 1 } else { 0 });
    }
}

// ============================================================================
// TESTS
// ============================================================================
