//! Cumulative counters for the rebuild job.
//!
//! A single [`RebuildMetrics`] is shared by every cycle a worker runs, so the
//! host can expose totals since startup.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for static index rebuilds.
#[derive(Debug, Default)]
pub struct RebuildMetrics {
    /// Rebuild cycles started
    pub cycles: AtomicU64,

    /// Cycles that loaded the index and released the guard
    pub completed: AtomicU64,

    /// Cycles skipped because another worker held the guard
    pub skipped_guard_held: AtomicU64,

    /// Cycles skipped because a complete index was already present
    pub skipped_index_present: AtomicU64,

    /// Cycles aborted because the namespace could not be invalidated
    pub invalidation_failures: AtomicU64,

    /// Cycles aborted by a failing built-in loader
    pub builtin_failures: AtomicU64,

    /// Plugin loaders that failed to resolve or to run
    pub plugin_failures: AtomicU64,

    /// Plugins without a static data extension point
    pub plugins_skipped: AtomicU64,

    /// Keys removed by invalidation
    pub keys_invalidated: AtomicU64,
}

impl RebuildMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> RebuildMetricsSnapshot {
        RebuildMetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            skipped_guard_held: self.skipped_guard_held.load(Ordering::Relaxed),
            skipped_index_present: self.skipped_index_present.load(Ordering::Relaxed),
            invalidation_failures: self.invalidation_failures.load(Ordering::Relaxed),
            builtin_failures: self.builtin_failures.load(Ordering::Relaxed),
            plugin_failures: self.plugin_failures.load(Ordering::Relaxed),
            plugins_skipped: self.plugins_skipped.load(Ordering::Relaxed),
            keys_invalidated: self.keys_invalidated.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of rebuild metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildMetricsSnapshot {
    pub cycles: u64,
    pub completed: u64,
    pub skipped_guard_held: u64,
    pub skipped_index_present: u64,
    pub invalidation_failures: u64,
    pub builtin_failures: u64,
    pub plugin_failures: u64,
    pub plugins_skipped: u64,
    pub keys_invalidated: u64,
}
