//! Observability metrics for the rollout controller.
//!
//! Metrics are exposed via the `metrics` crate facade and are designed to
//! answer the operator questions that matter for a reconciler:
//!
//! - Are passes completing, and with what outcomes?
//! - Which state transitions are layers making?
//! - Are capability calls (prune/apply) succeeding?
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `strata_reconcile_passes_total` | Counter | `outcome` | Reconciliation passes by outcome |
//! | `strata_reconcile_pass_duration_seconds` | Histogram | - | Wall time of one pass |
//! | `strata_state_transitions_total` | Counter | `from_state`, `to_state` | Layer state transitions |
//! | `strata_capability_calls_total` | Counter | `capability`, `result` | Prune/apply invocations |
//!
//! ## Integration
//!
//! An exporter (e.g., `metrics-exporter-prometheus`) is installed by the
//! hosting process; this crate only records.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Reconciliation passes by outcome.
    pub const RECONCILE_PASSES_TOTAL: &str = "strata_reconcile_passes_total";
    /// Histogram: Wall time of one reconciliation pass in seconds.
    pub const RECONCILE_PASS_DURATION_SECONDS: &str = "strata_reconcile_pass_duration_seconds";
    /// Counter: Layer state transitions.
    pub const STATE_TRANSITIONS_TOTAL: &str = "strata_state_transitions_total";
    /// Counter: Capability invocations by kind and result.
    pub const CAPABILITY_CALLS_TOTAL: &str = "strata_capability_calls_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Previous layer state (for transitions).
    pub const FROM_STATE: &str = "from_state";
    /// Target layer state (for transitions).
    pub const TO_STATE: &str = "to_state";
    /// Pass outcome (none, now, delayed, not_found).
    pub const OUTCOME: &str = "outcome";
    /// Capability kind (prune, apply).
    pub const CAPABILITY: &str = "capability";
    /// Call result (success, failure).
    pub const RESULT: &str = "result";
}

/// High-level interface for recording controller metrics.
///
/// Cheap to clone and share across reconcile passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerMetrics;

impl ControllerMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records the outcome of one reconciliation pass.
    pub fn record_pass(&self, outcome: &'static str) {
        counter!(
            names::RECONCILE_PASSES_TOTAL,
            labels::OUTCOME => outcome,
        )
        .increment(1);
    }

    /// Records a layer state transition.
    pub fn record_transition(&self, from: &'static str, to: &'static str) {
        counter!(
            names::STATE_TRANSITIONS_TOTAL,
            labels::FROM_STATE => from,
            labels::TO_STATE => to,
        )
        .increment(1);
    }

    /// Records a capability invocation.
    pub fn record_capability(&self, capability: &'static str, success: bool) {
        counter!(
            names::CAPABILITY_CALLS_TOTAL,
            labels::CAPABILITY => capability,
            labels::RESULT => if success { "success" } else { "failure" },
        )
        .increment(1);
    }

    /// Records the duration of one reconciliation pass.
    pub fn observe_pass_duration(&self, duration: Duration) {
        histogram!(names::RECONCILE_PASS_DURATION_SECONDS).record(duration.as_secs_f64());
    }
}

/// RAII guard that reports elapsed time when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed
    /// duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
