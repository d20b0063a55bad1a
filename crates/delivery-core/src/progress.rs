//! Route progress math
//!
//! All values stay unrounded; display rounding belongs to the API layer.

use serde::{Deserialize, Serialize};

/// Percentage of the path covered at `index`, clamped to [0, 100]
pub fn progress_percent(index: usize, path_len: usize) -> f64 {
    if path_len <= 1 {
        return 0.0;
    }
    (index as f64 / (path_len - 1) as f64 * 100.0).clamp(0.0, 100.0)
}

/// Distance left at `index`, in the unit of `total_distance`
pub fn remaining_distance(index: usize, path_len: usize, total_distance: f64) -> f64 {
    if path_len == 0 {
        return 0.0;
    }
    let index = index.min(path_len);
    total_distance * (path_len - index) as f64 / path_len as f64
}

/// Time left at `index`, in the unit of `total_duration`
pub fn remaining_time(index: usize, path_len: usize, total_duration: f64) -> f64 {
    if path_len <= 1 {
        return 0.0;
    }
    let ratio = (index as f64 / (path_len - 1) as f64).min(1.0);
    total_duration * (1.0 - ratio)
}

/// Progress of a vehicle along its decoded path
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteProgress {
    pub percent: f64,
    pub remaining_distance_meters: f64,
    pub remaining_time_seconds: f64,
}

impl RouteProgress {
    pub fn compute(
        index: usize,
        path_len: usize,
        total_distance_meters: f64,
        total_duration_seconds: f64,
    ) -> Self {
        Self {
            percent: progress_percent(index, path_len),
            remaining_distance_meters: remaining_distance(index, path_len, total_distance_meters),
            remaining_time_seconds: remaining_time(index, path_len, total_duration_seconds),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
