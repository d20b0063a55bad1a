//! Simulation engine
//!
//! One supervised task per delivering batch walks the decoded path, writing
//! `current_index` each step and sampling the position every few steps. A
//! run is keyed by batch id and carries a cancellation token; commands flip
//! the persisted status and cancel the token, and the loop also re-reads the
//! status before every step.

use crate::{EventBus, TrackerError, TrackerResult, Transition};
use chrono::Utc;
use dashmap::DashMap;
use delivery_core::{
    BatchEvent, BatchId, BatchStatus, DecodedPath, LatLng, LocationSample, OrderStatus,
};
use delivery_db::BatchStore;
use delivery_maps::{DEFAULT_GEOCODE_TIMEOUT_MS, Geocoder};
use delivery_telemetry::{MetricsCollector, RunOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Address recorded when reverse geocoding fails
pub const PENDING_ADDRESS: &str = "Locating...";

/// How long a replaced or shut down run may take to exit
const RUN_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Record a location sample every N steps (and on the last step)
    pub sample_every: u32,
    /// Upper bound on one reverse geocoding call, taken from the map provider settings
    #[serde(skip, default = "default_geocode_timeout")]
    pub geocode_timeout: Duration,
    /// Multiplier on the route duration; 0.1 replays ten times faster
    pub time_scale: f64,
    /// Floor for the per-step delay
    pub min_step_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sample_every: 10,
            geocode_timeout: default_geocode_timeout(),
            time_scale: 1.0,
            min_step_interval_ms: 0,
        }
    }
}

fn default_geocode_timeout() -> Duration {
    Duration::from_millis(DEFAULT_GEOCODE_TIMEOUT_MS)
}

impl SimulationConfig {
    /// Delay between steps: total duration spread evenly over the path
    pub fn step_interval(&self, total_duration_seconds: i64, path_length: usize) -> Duration {
        let floor = Duration::from_millis(self.min_step_interval_ms);
        if path_length == 0 || total_duration_seconds <= 0 {
            return floor;
        }

        let seconds =
            total_duration_seconds as f64 * self.time_scale.max(0.0) / path_length as f64;
        Duration::from_secs_f64(seconds).max(floor)
    }

    fn should_sample(&self, index: usize, path_length: usize) -> bool {
        let every = self.sample_every.max(1) as usize;
        index % every == 0 || index + 1 == path_length
    }
}

/// Why a run loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Path exhausted and the batch moved to COMPLETED
    Completed,
    /// Cancelled or status left DELIVERING
    Interrupted,
    /// A persistence failure ended the run; the batch stays DELIVERING
    Aborted,
}

struct RunHandle {
    generation: u64,
    token: CancellationToken,
    task: Option<JoinHandle<RunExit>>,
}

/// Everything a run loop needs, owned by the task
struct RunContext {
    batch_id: BatchId,
    path: DecodedPath,
    interval: Duration,
    token: CancellationToken,
    store: Arc<dyn BatchStore>,
    geocoder: Arc<dyn Geocoder>,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
    config: SimulationConfig,
    stuck: Arc<DashMap<BatchId, ()>>,
}

/// Supervisor of per-batch simulation runs
pub struct SimulationEngine {
    store: Arc<dyn BatchStore>,
    geocoder: Arc<dyn Geocoder>,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
    config: SimulationConfig,
    runs: Arc<DashMap<BatchId, RunHandle>>,
    /// Batches whose run aborted and that no command has resolved yet
    stuck: Arc<DashMap<BatchId, ()>>,
    /// Cancelled runs that may still be finishing their current step
    draining: DashMap<BatchId, JoinHandle<RunExit>>,
    generation: AtomicU64,
}

impl SimulationEngine {
    pub fn new(
        store: Arc<dyn BatchStore>,
        geocoder: Arc<dyn Geocoder>,
        metrics: Arc<MetricsCollector>,
        events: EventBus,
        config: SimulationConfig,
    ) -> Self {
        Self {
            store,
            geocoder,
            metrics,
            events,
            config,
            runs: Arc::new(DashMap::new()),
            stuck: Arc::new(DashMap::new()),
            draining: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Move a PENDING batch to DELIVERING and spawn its run.
    ///
    /// The route must already be persisted on the batch.
    pub async fn start(
        &self,
        batch_id: BatchId,
        path: DecodedPath,
        total_duration_seconds: i64,
    ) -> TrackerResult<usize> {
        if path.is_empty() {
            return Err(TrackerError::EmptyPath { batch_id });
        }

        // A run left over from an earlier stop must be gone before the new one writes
        self.retire(batch_id).await;

        let moved = self
            .store
            .transition_status(batch_id, BatchStatus::Pending, BatchStatus::Delivering, Utc::now())
            .await
            .map_err(|e| TrackerError::persistence(batch_id, e))?;
        if !moved {
            let status = self
                .store
                .batch_status(batch_id)
                .await
                .map_err(|e| TrackerError::persistence(batch_id, e))?
                .ok_or_else(|| TrackerError::batch_not_found(batch_id))?;
            return Err(TrackerError::invalid_state(batch_id, status, Transition::Start));
        }
        self.resolve_stuck(batch_id);

        let path_length = path.len();
        let interval = self.config.step_interval(total_duration_seconds, path_length);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();

        self.runs.insert(
            batch_id,
            RunHandle {
                generation,
                token: token.clone(),
                task: None,
            },
        );

        let ctx = RunContext {
            batch_id,
            path,
            interval,
            token,
            store: self.store.clone(),
            geocoder: self.geocoder.clone(),
            metrics: self.metrics.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
            stuck: self.stuck.clone(),
        };
        let runs = self.runs.clone();

        self.metrics.record_run(RunOutcome::Started);
        self.events.publish(BatchEvent::batch_started(batch_id, path_length));
        info!(
            "Simulation started for batch {}: {} points, step every {:?}",
            batch_id, path_length, interval
        );

        let task = tokio::spawn(async move {
            let exit = run_loop(&ctx).await;
            runs.remove_if(&batch_id, |_, handle| handle.generation == generation);
            exit
        });

        // The run may already have finished and deregistered itself
        if let Some(mut handle) = self.runs.get_mut(&batch_id) {
            if handle.generation == generation {
                handle.task = Some(task);
            }
        }

        Ok(path_length)
    }

    /// Signal a batch's run to exit. Returns whether a run was registered.
    pub fn cancel(&self, batch_id: BatchId) -> bool {
        match self.runs.remove(&batch_id) {
            Some((_, handle)) => {
                handle.token.cancel();
                self.draining.retain(|_, task| !task.is_finished());
                if let Some(task) = handle.task {
                    self.draining.insert(batch_id, task);
                }
                debug!("Cancelled simulation run for batch {}", batch_id);
                true
            }
            None => false,
        }
    }

    /// Cancel any run for the batch and wait for it to exit
    pub async fn retire(&self, batch_id: BatchId) {
        self.cancel(batch_id);
        if let Some((_, task)) = self.draining.remove(&batch_id) {
            if tokio::time::timeout(RUN_EXIT_GRACE, task).await.is_err() {
                warn!("Previous run of batch {} did not exit in time", batch_id);
            }
        }
    }

    /// Clear the stuck marker once a command has moved an aborted batch on
    pub fn resolve_stuck(&self, batch_id: BatchId) {
        if self.stuck.remove(&batch_id).is_some() {
            self.metrics.clear_stuck_batch();
            info!("Batch {} is no longer stuck in DELIVERING", batch_id);
        }
    }

    pub fn is_running(&self, batch_id: BatchId) -> bool {
        self.runs.contains_key(&batch_id)
    }

    pub fn running_batches(&self) -> Vec<BatchId> {
        self.runs.iter().map(|entry| *entry.key()).collect()
    }

    pub fn stuck_batches(&self) -> Vec<BatchId> {
        self.stuck.iter().map(|entry| *entry.key()).collect()
    }

    /// Cancel every run and wait for the loops to exit.
    ///
    /// Persisted statuses are left as they are; the returned batches remain
    /// DELIVERING in storage.
    pub async fn shutdown(&self) -> Vec<BatchId> {
        let ids = self.running_batches();
        let mut tasks = Vec::with_capacity(ids.len());

        for id in &ids {
            self.cancel(*id);
        }
        let draining: Vec<BatchId> = self.draining.iter().map(|e| *e.key()).collect();
        for id in draining {
            if let Some((_, task)) = self.draining.remove(&id) {
                tasks.push(task);
            }
        }

        let joined = tokio::time::timeout(RUN_EXIT_GRACE, futures::future::join_all(tasks)).await;
        if joined.is_err() {
            warn!("Some simulation runs did not exit within {:?}", RUN_EXIT_GRACE);
        }

        for id in &ids {
            warn!("Batch {} left DELIVERING at shutdown", id);
        }
        ids
    }
}

// ============================================================================
// RUN LOOP
// ============================================================================

async fn run_loop(ctx: &RunContext) -> RunExit {
    let exit = step_through(ctx).await;

    match exit {
        StepExit::Exhausted { last_index } => finish(ctx, last_index).await,
        StepExit::Interrupted { last_index } => {
            info!(
                "Simulation of batch {} interrupted at index {:?}",
                ctx.batch_id, last_index
            );
            ctx.metrics.record_run(RunOutcome::Stopped);
            RunExit::Interrupted
        }
        StepExit::Failed { index, reason } => abort(ctx, index, reason).await,
    }
}

/// Mark the batch stuck in DELIVERING after a failed run, unless a command
/// already moved it on.
async fn abort(ctx: &RunContext, index: u32, reason: String) -> RunExit {
    if ctx.token.is_cancelled() || !still_delivering(ctx).await {
        info!(
            "Run of batch {} failed at index {} after the batch was moved on: {}",
            ctx.batch_id, index, reason
        );
        ctx.metrics.record_run(RunOutcome::Stopped);
        return RunExit::Interrupted;
    }

    // Counted before the marker is visible to `resolve_stuck`
    ctx.metrics.record_run(RunOutcome::Aborted);
    ctx.stuck.insert(ctx.batch_id, ());

    // A stop or complete cancels before it resolves the marker
    if ctx.token.is_cancelled() {
        if ctx.stuck.remove(&ctx.batch_id).is_some() {
            ctx.metrics.clear_stuck_batch();
        }
        info!(
            "Run of batch {} failed at index {} while a command moved it on",
            ctx.batch_id, index
        );
        return RunExit::Interrupted;
    }

    error!(
        "Simulation of batch {} aborted at index {}: {}. Batch stays DELIVERING",
        ctx.batch_id, index, reason
    );
    ctx.events.publish(BatchEvent::simulation_aborted(
        ctx.batch_id,
        index,
        ctx.path.len(),
        reason,
    ));
    RunExit::Aborted
}

/// Whether the persisted status is still DELIVERING; an unreadable store counts as yes
async fn still_delivering(ctx: &RunContext) -> bool {
    match ctx.store.batch_status(ctx.batch_id).await {
        Ok(Some(BatchStatus::Delivering)) | Err(_) => true,
        Ok(_) => false,
    }
}

enum StepExit {
    Exhausted { last_index: u32 },
    Interrupted { last_index: Option<u32> },
    Failed { index: u32, reason: String },
}

async fn step_through(ctx: &RunContext) -> StepExit {
    let path_length = ctx.path.len();
    let mut last_index = None;

    for (i, position) in ctx.path.points().iter().copied().enumerate() {
        let index = i as u32;

        if ctx.token.is_cancelled() {
            return StepExit::Interrupted { last_index };
        }

        match ctx.store.batch_status(ctx.batch_id).await {
            Ok(Some(BatchStatus::Delivering)) => {}
            Ok(status) => {
                debug!(
                    "Batch {} is {:?}, leaving simulation loop",
                    ctx.batch_id, status
                );
                return StepExit::Interrupted { last_index };
            }
            Err(e) => {
                return StepExit::Failed {
                    index,
                    reason: format!("status read failed: {}", e),
                };
            }
        }

        if let Err(e) = ctx.store.update_current_index(ctx.batch_id, index).await {
            return StepExit::Failed {
                index,
                reason: if e.is_transient() {
                    format!("index write failed, store may recover: {}", e)
                } else {
                    format!("index write failed: {}", e)
                },
            };
        }
        last_index = Some(index);
        ctx.metrics.record_step();
        debug!("Batch {} at index {}/{}", ctx.batch_id, index, path_length - 1);

        if ctx.config.should_sample(i, path_length) {
            record_sample(ctx, position, index).await;
        }

        tokio::select! {
            _ = ctx.token.cancelled() => return StepExit::Interrupted { last_index },
            _ = tokio::time::sleep(ctx.interval) => {}
        }
    }

    match last_index {
        Some(last_index) => StepExit::Exhausted { last_index },
        None => StepExit::Interrupted { last_index },
    }
}

async fn record_sample(ctx: &RunContext, position: LatLng, index: u32) {
    let address = match tokio::time::timeout(
        ctx.config.geocode_timeout,
        ctx.geocoder.reverse_geocode(position),
    )
    .await
    {
        Ok(Ok(address)) => address,
        Ok(Err(e)) => {
            warn!("Reverse geocoding failed for batch {}: {}", ctx.batch_id, e);
            ctx.metrics.record_geocode_failure();
            PENDING_ADDRESS.to_string()
        }
        Err(_) => {
            warn!(
                "Reverse geocoding timed out for batch {} after {:?}",
                ctx.batch_id, ctx.config.geocode_timeout
            );
            ctx.metrics.record_geocode_failure();
            PENDING_ADDRESS.to_string()
        }
    };

    let sample = LocationSample::new(ctx.batch_id, position, Some(address.clone()), index);
    match ctx.store.append_location(&sample).await {
        Ok(()) => {
            ctx.metrics.record_location_sample();
            ctx.events.publish(BatchEvent::location_recorded(
                ctx.batch_id,
                position,
                Some(address),
                index,
            ));
        }
        Err(e) => warn!(
            "Failed to record location sample {} for batch {}: {}",
            index, ctx.batch_id, e
        ),
    }
}

async fn finish(ctx: &RunContext, last_index: u32) -> RunExit {
    let completed = ctx
        .store
        .transition_status(
            ctx.batch_id,
            BatchStatus::Delivering,
            BatchStatus::Completed,
            Utc::now(),
        )
        .await;

    match completed {
        Ok(true) => {
            info!("Simulation completed for batch {}", ctx.batch_id);
            mark_orders_arrived(ctx).await;
            ctx.metrics.record_run(RunOutcome::Completed);
            ctx.events.publish(BatchEvent::batch_completed(
                ctx.batch_id,
                last_index,
                ctx.path.len(),
            ));
            RunExit::Completed
        }
        Ok(false) => {
            info!(
                "Batch {} left DELIVERING before the run finished",
                ctx.batch_id
            );
            ctx.metrics.record_run(RunOutcome::Stopped);
            RunExit::Interrupted
        }
        Err(e) => abort(ctx, last_index, format!("completion write failed: {}", e)).await,
    }
}

async fn mark_orders_arrived(ctx: &RunContext) {
    let stops = match ctx.store.stops_for_batch(ctx.batch_id).await {
        Ok(stops) => stops,
        Err(e) => {
            error!("Could not load stops of batch {}: {}", ctx.batch_id, e);
            return;
        }
    };
    let ids: Vec<_> = stops.iter().map(|s| s.order_id).collect();
    if let Err(e) = ctx.store.set_order_status(&ids, OrderStatus::Arrived).await {
        error!(
            "Could not mark orders of batch {} arrived: {}",
            ctx.batch_id, e
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
