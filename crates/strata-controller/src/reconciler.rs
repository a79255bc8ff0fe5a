//! The reconciliation driver.
//!
//! [`Reconciler::reconcile`] runs one pass for one layer identity: load the
//! persisted layer, run the state machine, persist the status when it
//! changed, and return the scheduling verdict. The outer trigger queue is
//! responsible for honoring the verdict and for single-flighting passes per
//! layer identity; the driver assumes that contract rather than holding its
//! own per-layer lock.
//!
//! All recoverable errors are absorbed here and converted into a requeue
//! decision plus a status annotation. Only invariant violations and setup
//! failures propagate.
//!
//! A pass is one future; the caller may wrap it in a deadline and drop it.
//! Because reconciliation is level-triggered, a cancelled pass leaves the
//! layer in its last persisted state and the next pass resumes from there.

use std::sync::Arc;

use tracing::{debug, warn, Instrument};

use strata_core::observability::reconcile_span;
use strata_core::{LayerName, PassId};

use crate::capability::{LayerApplier, PreconditionCheck};
use crate::error::Result;
use crate::machine::{LayerStateMachine, Requeue};
use crate::metrics::{ControllerMetrics, TimingGuard};
use crate::runtime::ControllerRuntimeConfig;
use crate::store::{LayerRepository, UpdateResult};

/// Drives reconciliation passes for layers.
pub struct Reconciler {
    repo: Arc<dyn LayerRepository>,
    machine: LayerStateMachine,
    config: ControllerRuntimeConfig,
    metrics: ControllerMetrics,
}

impl Reconciler {
    /// Creates a reconciler with explicitly injected collaborators.
    #[must_use]
    pub fn new(
        repo: Arc<dyn LayerRepository>,
        applier: Arc<dyn LayerApplier>,
        precondition: Arc<dyn PreconditionCheck>,
        config: ControllerRuntimeConfig,
    ) -> Self {
        Self {
            repo,
            machine: LayerStateMachine::new(applier, precondition, config),
            config,
            metrics: ControllerMetrics::new(),
        }
    }

    /// Runs one reconciliation pass for the named layer.
    ///
    /// Returns the scheduling verdict for the outer queue: no requeue
    /// (quiescent or held), requeue now (persistence race), or requeue
    /// after the delay the state machine chose.
    ///
    /// # Errors
    ///
    /// Returns only invariant violations; every recoverable failure is
    /// folded into the layer status and the verdict.
    pub async fn reconcile(&self, name: &LayerName) -> Result<Requeue> {
        let pass = PassId::generate();
        let span = reconcile_span(name.as_str(), &pass.to_string());
        self.run_pass(name).instrument(span).await
    }

    async fn run_pass(&self, name: &LayerName) -> Result<Requeue> {
        let metrics = self.metrics;
        let _timer = TimingGuard::new(move |duration| metrics.observe_pass_duration(duration));

        // (a) Load. Not-found is soft: the layer may have been deleted
        // concurrently. A transient read failure leaves nothing to annotate,
        // so it maps straight to an immediate requeue.
        let loaded = match self.repo.get(name).await {
            Ok(loaded) => loaded,
            Err(err) if err.is_recoverable() => {
                warn!(layer = %name, error = %err, "layer load failed");
                self.metrics.record_pass(Requeue::Now.as_label());
                return Ok(Requeue::Now);
            }
            Err(err) => return Err(err),
        };
        let Some(mut layer) = loaded else {
            debug!(layer = %name, "layer not found, ending pass");
            self.metrics.record_pass("not_found");
            return Ok(Requeue::None);
        };
        let before = layer.status.state;

        // (b) Run the state machine, folding recoverable failures into the
        // status so the next pass observes the attempt.
        let mut requeue = match self.machine.step(self.repo.as_ref(), &mut layer).await {
            Ok(requeue) => requeue,
            Err(err) if err.is_recoverable() => {
                warn!(layer = %name, error = %err, "pass failed, will retry");
                layer.record_failure(err.to_string());
                Requeue::After(self.config.requeue_delay)
            }
            Err(err) => return Err(err),
        };

        if before != layer.status.state {
            self.metrics
                .record_transition(before.as_label(), layer.status.state.as_label());
            debug!(
                layer = %name,
                from = before.as_label(),
                to = layer.status.state.as_label(),
                "state transition"
            );
        }

        // (c) Persist. A lost write must not lose the work: requeue
        // immediately so the next pass re-derives and re-writes.
        if layer.is_updated() {
            match self.repo.update_status(name, &layer.status).await {
                Ok(UpdateResult::Success) => {}
                Ok(UpdateResult::NotFound) => {
                    debug!(layer = %name, "layer deleted during pass");
                    self.metrics.record_pass("not_found");
                    return Ok(Requeue::None);
                }
                Ok(UpdateResult::VersionConflict { actual }) => {
                    warn!(layer = %name, actual, "status write lost a version race");
                    requeue = Requeue::Now;
                }
                Err(err) => {
                    warn!(layer = %name, error = %err, "status write failed");
                    requeue = Requeue::Now;
                }
            }
        }

        self.metrics.record_pass(requeue.as_label());
        Ok(requeue)
    }
}
