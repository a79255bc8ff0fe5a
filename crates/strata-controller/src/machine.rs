//! The per-layer reconciliation state machine.
//!
//! [`LayerStateMachine::step`] runs the priority-ordered transition
//! algorithm for one layer and one pass. The rules encode a strict global
//! protocol:
//!
//! ```text
//! hold > environment readiness > prune-before-apply > dependencies > success
//! ```
//!
//! Each pass performs at most one state transition and at most one
//! capability action, and every pass that leaves work incomplete attaches a
//! delayed requeue. A pass never both prunes and applies.
//!
//! The machine mutates only the in-memory [`Layer`] it was handed; the
//! driver persists the result. The one exception is change-set staging,
//! which writes sibling statuses through the repository so that pruning
//! completes everywhere intended before any apply proceeds.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::capability::{ActionKind, LayerApplier, PreconditionCheck};
use crate::deps::dependencies_satisfied;
use crate::error::Result;
use crate::layer::{reasons, Layer, LayerState};
use crate::metrics::ControllerMetrics;
use crate::runtime::ControllerRuntimeConfig;
use crate::store::{LayerRepository, UpdateResult};

/// Requeue directive produced by one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Quiescent or held; revisit only on an external change notification.
    None,
    /// Revisit immediately (persistence races, indeterminate state).
    Now,
    /// Revisit after the given delay.
    After(Duration),
}

impl Requeue {
    /// Returns true when the pass scheduled a revisit.
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Now => "now",
            Self::After(_) => "delayed",
        }
    }
}

/// The priority-ordered reconciliation state machine.
///
/// All collaborators are injected at construction; the machine holds no
/// mutable state of its own, so one instance serves concurrent passes for
/// different layers.
pub struct LayerStateMachine {
    applier: Arc<dyn LayerApplier>,
    precondition: Arc<dyn PreconditionCheck>,
    config: ControllerRuntimeConfig,
    metrics: ControllerMetrics,
}

impl LayerStateMachine {
    /// Creates a state machine with the given capabilities and delays.
    #[must_use]
    pub fn new(
        applier: Arc<dyn LayerApplier>,
        precondition: Arc<dyn PreconditionCheck>,
        config: ControllerRuntimeConfig,
    ) -> Self {
        Self {
            applier,
            precondition,
            config,
            metrics: ControllerMetrics::new(),
        }
    }

    /// Runs one reconciliation pass for `layer`.
    ///
    /// Evaluates the priority rules in order; the first rule that changes
    /// the layer's state ends the pass with that rule's requeue directive.
    /// Capability failures propagate to the driver, which records them in
    /// the status and schedules the retry; the layer keeps its in-progress
    /// state so the same operation is naturally retried.
    ///
    /// # Errors
    ///
    /// Returns capability and staging failures (recoverable, absorbed by
    /// the driver) and invariant violations (fatal to the pass).
    pub async fn step(&self, repo: &dyn LayerRepository, layer: &mut Layer) -> Result<Requeue> {
        // Rule 1: hold suppresses everything; resuming requires an external
        // spec change, so no requeue.
        if layer.is_hold() {
            layer.transition_to(LayerState::Hold, reasons::HOLD_SET)?;
            return Ok(Requeue::None);
        }

        // Rule 2: environment precondition.
        let precondition_ok = self.precondition.check(layer).await;
        layer.set_precondition(precondition_ok);
        if !precondition_ok {
            layer.transition_to(LayerState::PendingEnvVersion, reasons::PRECONDITION_FAILED)?;
            return Ok(Requeue::After(self.config.precondition_delay));
        }

        // Rule 3: change detection and cross-layer staging. A changed layer
        // outside the cycle enters at PENDING_PRUNE; stale resources pull a
        // mid-cycle layer back to PENDING_PRUNE as well.
        if layer.pruning_required() || layer.apply_required() {
            self.stage_prune_pending(repo, layer).await?;
            let staged = matches!(
                layer.status.state,
                LayerState::PendingPrune | LayerState::Pruning
            );
            if (layer.pruning_required() && !staged) || !layer.status.state.in_change_cycle() {
                layer.transition_to(LayerState::PendingPrune, reasons::CHANGE_DETECTED)?;
                return Ok(Requeue::After(self.config.requeue_delay));
            }
        }

        // Rule 4: pruning. Every staged layer walks the prune phase so the
        // change set synchronizes at PRUNED; the capability runs only when
        // stale resources actually exist.
        if layer.status.state == LayerState::PendingPrune || layer.pruning_required() {
            layer.transition_to(LayerState::Pruning, reasons::PRUNING)?;
            if layer.pruning_required() {
                self.invoke(ActionKind::Prune, layer).await?;
                layer.record_pruned();
            }
            layer.clear_error();
            return Ok(Requeue::After(self.config.requeue_delay));
        }

        // Rule 5: pruned staging. A layer that finished pruning waits until
        // every change-set sibling has also pruned, then the whole set moves
        // to apply-pending together.
        if layer.status.state == LayerState::Pruning {
            layer.transition_to(LayerState::Pruned, reasons::PRUNED)?;
            return Ok(Requeue::After(self.config.requeue_delay));
        }
        if layer.status.state == LayerState::Pruned {
            if self.all_pruned(repo, layer).await? {
                self.promote_pruned(repo, layer).await?;
                layer.transition_to(LayerState::PendingApply, reasons::APPLY_PENDING)?;
            }
            return Ok(Requeue::After(self.config.requeue_delay));
        }

        // Prune-before-apply holds across the whole change set: no layer
        // applies while any layer still has stale resources.
        if layer.apply_required() && !self.all_pruned(repo, layer).await? {
            layer.transition_to(LayerState::PendingApply, reasons::APPLY_PENDING)?;
            return Ok(Requeue::After(self.config.requeue_delay));
        }

        // Rule 6: dependency gate.
        if !dependencies_satisfied(repo, layer).await? {
            layer.transition_to(
                LayerState::PendingApply,
                reasons::WAITING_FOR_DEPENDENCIES,
            )?;
            return Ok(Requeue::After(self.config.requeue_delay));
        }

        // Rule 7: applying.
        if layer.apply_required() {
            layer.transition_to(LayerState::Applying, reasons::APPLYING)?;
            self.invoke(ActionKind::Apply, layer).await?;
            layer.record_applied();
            layer.clear_error();
            return Ok(Requeue::After(self.config.requeue_delay));
        }

        // Rule 8: quiescence. A failed apply leaves its resources missing
        // from the applied set, so reaching this rule means the last apply
        // attempt succeeded. Any leftover failure note was recorded outside
        // a prune/apply phase and cannot describe the current desired
        // state, so it is cleared instead of blocking convergence.
        layer.clear_error();
        layer.transition_to(LayerState::Deployed, reasons::DEPLOYED)?;
        Ok(Requeue::None)
    }

    /// Invokes one capability action, recording the outcome.
    async fn invoke(&self, kind: ActionKind, layer: &Layer) -> Result<()> {
        let result = match kind {
            ActionKind::Prune => self.applier.prune(layer).await,
            ActionKind::Apply => self.applier.apply(layer).await,
        };
        self.metrics
            .record_capability(kind.as_label(), result.is_ok());
        debug!(
            layer = %layer.name,
            capability = kind.as_label(),
            ok = result.is_ok(),
            "capability invoked"
        );
        result
    }

    /// Pulls every changed, unheld layer outside the prune/apply cycle into
    /// `PENDING_PRUNE`.
    ///
    /// The current layer is transitioned in memory by the caller; siblings
    /// are written through the repository.
    async fn stage_prune_pending(&self, repo: &dyn LayerRepository, current: &Layer) -> Result<()> {
        for mut sibling in repo.list().await? {
            if sibling.name == current.name
                || sibling.is_hold()
                || sibling.status.state.in_change_cycle()
                || !(sibling.pruning_required() || sibling.apply_required())
            {
                continue;
            }
            sibling.transition_to(LayerState::PendingPrune, reasons::CHANGE_DETECTED)?;
            match repo.update_status(&sibling.name, &sibling.status).await? {
                UpdateResult::Success => {}
                // A lost write means another actor touched the sibling; its
                // own pass will restage it from the fresher state.
                UpdateResult::NotFound | UpdateResult::VersionConflict { .. } => {
                    debug!(
                        layer = %sibling.name,
                        "staging write lost a race, leaving sibling to its own pass"
                    );
                }
            }
        }
        Ok(())
    }

    /// Returns true when no layer still has pruning ahead of it.
    ///
    /// `current` stands in for its (possibly stale) persisted row.
    async fn all_pruned(&self, repo: &dyn LayerRepository, current: &Layer) -> Result<bool> {
        for sibling in repo.list().await? {
            let layer = if sibling.name == current.name {
                current
            } else {
                &sibling
            };
            if layer.is_hold() {
                continue;
            }
            if layer.pruning_required()
                || matches!(
                    layer.status.state,
                    LayerState::PendingPrune | LayerState::Pruning
                )
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Promotes every pruned sibling to `PENDING_APPLY`.
    async fn promote_pruned(&self, repo: &dyn LayerRepository, current: &Layer) -> Result<()> {
        for mut sibling in repo.list().await? {
            if sibling.name == current.name
                || sibling.is_hold()
                || sibling.status.state != LayerState::Pruned
            {
                continue;
            }
            sibling.transition_to(LayerState::PendingApply, reasons::APPLY_PENDING)?;
            match repo.update_status(&sibling.name, &sibling.status).await? {
                UpdateResult::Success => {}
                // The sibling stays PRUNED and a later pass promotes it.
                UpdateResult::NotFound | UpdateResult::VersionConflict { .. } => {
                    debug!(
                        layer = %sibling.name,
                        "promotion write lost a race, leaving sibling to a later pass"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::capability::memory::{FixedPrecondition, RecordingApplier};
    use crate::layer::{LayerSpec, LayerStatus, ResourceRef};
    use crate::store::memory::MemoryLayerRepository;
    use strata_core::LayerName;

    fn name(s: &str) -> LayerName {
        s.parse().expect("valid layer name")
    }

    fn resources(names: &[&str]) -> Vec<ResourceRef> {
        names.iter().map(|n| ResourceRef::new("release", *n)).collect()
    }

    struct Harness {
        repo: MemoryLayerRepository,
        applier: Arc<RecordingApplier>,
        precondition: Arc<FixedPrecondition>,
        machine: LayerStateMachine,
    }

    impl Harness {
        fn new() -> Self {
            let applier = Arc::new(RecordingApplier::new());
            let precondition = Arc::new(FixedPrecondition::new(true));
            let machine = LayerStateMachine::new(
                applier.clone(),
                precondition.clone(),
                ControllerRuntimeConfig::default(),
            );
            Self {
                repo: MemoryLayerRepository::new(),
                applier,
                precondition,
                machine,
            }
        }

        async fn step(&self, layer: &mut Layer) -> Result<Requeue> {
            self.machine.step(&self.repo, layer).await
        }
    }

    fn delayed(requeue: Requeue) -> bool {
        matches!(requeue, Requeue::After(_))
    }

    #[tokio::test]
    async fn held_layer_only_reaffirms_hold() -> Result<()> {
        let h = Harness::new();
        let mut layer = Layer::new(
            name("db"),
            LayerSpec {
                resources: resources(&["a"]),
                hold: true,
                ..LayerSpec::default()
            },
        );
        h.repo.save(&layer).await?;

        let requeue = h.step(&mut layer).await?;
        assert_eq!(layer.status.state, LayerState::Hold);
        assert_eq!(requeue, Requeue::None);
        assert!(h.applier.invocations()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_precondition_parks_the_layer() -> Result<()> {
        let h = Harness::new();
        h.precondition.set(false);
        let mut layer = Layer::new(
            name("x"),
            LayerSpec {
                resources: resources(&["a"]),
                ..LayerSpec::default()
            },
        );
        h.repo.save(&layer).await?;

        let requeue = h.step(&mut layer).await?;
        assert_eq!(layer.status.state, LayerState::PendingEnvVersion);
        assert_eq!(layer.status.precondition_ok, Some(false));
        assert!(delayed(requeue));
        assert!(h.applier.invocations()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn changed_layer_runs_the_full_prune_apply_sequence() -> Result<()> {
        let h = Harness::new();
        let mut layer = Layer::new(
            name("db"),
            LayerSpec {
                resources: resources(&["new"]),
                ..LayerSpec::default()
            },
        );
        // Previously deployed with a now-obsolete resource.
        layer.status.state = LayerState::Deployed;
        layer.status.applied_resources = resources(&["old"]);
        h.repo.save(&layer).await?;

        let mut observed = Vec::new();
        for _ in 0..6 {
            let requeue = h.step(&mut layer).await?;
            observed.push((layer.status.state, requeue));
            h.repo.update_status(&layer.name, &layer.status).await?;
            let mut reloaded = h.repo.get(&layer.name).await?.expect("layer exists");
            std::mem::swap(&mut layer, &mut reloaded);
        }

        let states: Vec<LayerState> = observed.iter().map(|(s, _)| *s).collect();
        assert_eq!(
            states,
            vec![
                LayerState::PendingPrune,
                LayerState::Pruning,
                LayerState::Pruned,
                LayerState::PendingApply,
                LayerState::Applying,
                LayerState::Deployed,
            ]
        );
        // Every non-terminal pass returned a delayed requeue.
        for (state, requeue) in &observed {
            if *state == LayerState::Deployed {
                assert_eq!(*requeue, Requeue::None);
            } else {
                assert!(delayed(*requeue), "state {state} must delay");
            }
        }
        assert_eq!(h.applier.count(&layer.name, ActionKind::Prune)?, 1);
        assert_eq!(h.applier.count(&layer.name, ActionKind::Apply)?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn dependency_gate_blocks_apply() -> Result<()> {
        let h = Harness::new();
        let mut db = Layer::new(
            name("db"),
            LayerSpec {
                resources: resources(&["d"]),
                ..LayerSpec::default()
            },
        );
        db.status.state = LayerState::PendingApply;
        h.repo.save(&db).await?;

        let mut app = Layer::new(
            name("app"),
            LayerSpec {
                resources: resources(&["a"]),
                depends_on: vec![name("db")],
                ..LayerSpec::default()
            },
        );
        h.repo.save(&app).await?;

        let requeue = h.step(&mut app).await?;
        assert_eq!(app.status.state, LayerState::PendingApply);
        assert_eq!(app.status.reason, reasons::WAITING_FOR_DEPENDENCIES);
        assert!(delayed(requeue));
        assert_eq!(h.applier.count(&app.name, ActionKind::Apply)?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn deployed_dependency_unblocks_apply() -> Result<()> {
        let h = Harness::new();
        let mut db = Layer::new(name("db"), LayerSpec::default());
        db.status.state = LayerState::Deployed;
        h.repo.save(&db).await?;

        let mut app = Layer::new(
            name("app"),
            LayerSpec {
                resources: resources(&["a"]),
                depends_on: vec![name("db")],
                ..LayerSpec::default()
            },
        );
        h.repo.save(&app).await?;

        let requeue = h.step(&mut app).await?;
        assert_eq!(app.status.state, LayerState::Applying);
        assert!(delayed(requeue));
        assert_eq!(h.applier.count(&app.name, ActionKind::Apply)?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn apply_waits_until_siblings_finish_pruning() -> Result<()> {
        let h = Harness::new();
        // Sibling still holds an obsolete resource.
        let mut sibling = Layer::new(
            name("web"),
            LayerSpec {
                resources: resources(&[]),
                ..LayerSpec::default()
            },
        );
        sibling.status.state = LayerState::Pruning;
        sibling.status.applied_resources = resources(&["stale"]);
        h.repo.save(&sibling).await?;

        let mut app = Layer::new(
            name("app"),
            LayerSpec {
                resources: resources(&["a"]),
                ..LayerSpec::default()
            },
        );
        h.repo.save(&app).await?;

        let requeue = h.step(&mut app).await?;
        assert_eq!(app.status.state, LayerState::PendingApply);
        assert_eq!(app.status.reason, reasons::APPLY_PENDING);
        assert!(delayed(requeue));
        assert_eq!(h.applier.count(&app.name, ActionKind::Apply)?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn staging_pulls_changed_siblings_into_pending_prune() -> Result<()> {
        let h = Harness::new();
        let mut sibling = Layer::new(
            name("web"),
            LayerSpec {
                resources: resources(&["w2"]),
                ..LayerSpec::default()
            },
        );
        sibling.status.state = LayerState::Deployed;
        sibling.status.applied_resources = resources(&["w1"]);
        h.repo.save(&sibling).await?;

        let mut db = Layer::new(
            name("db"),
            LayerSpec {
                resources: resources(&["d"]),
                ..LayerSpec::default()
            },
        );
        db.status.state = LayerState::Deployed;
        db.status.applied_resources = resources(&[]);
        h.repo.save(&db).await?;

        h.step(&mut db).await?;

        let staged = h.repo.get(&name("web")).await?.expect("sibling exists");
        assert_eq!(staged.status.state, LayerState::PendingPrune);
        Ok(())
    }

    #[tokio::test]
    async fn promotion_moves_all_pruned_layers_together() -> Result<()> {
        let h = Harness::new();
        let mut sibling = Layer::new(name("web"), LayerSpec::default());
        sibling.status.state = LayerState::Pruned;
        h.repo.save(&sibling).await?;

        let mut db = Layer::new(
            name("db"),
            LayerSpec {
                resources: resources(&["d"]),
                ..LayerSpec::default()
            },
        );
        db.status.state = LayerState::Pruned;
        h.repo.save(&db).await?;

        let requeue = h.step(&mut db).await?;
        assert_eq!(db.status.state, LayerState::PendingApply);
        assert!(delayed(requeue));

        let promoted = h.repo.get(&name("web")).await?.expect("sibling exists");
        assert_eq!(promoted.status.state, LayerState::PendingApply);
        Ok(())
    }

    #[tokio::test]
    async fn failed_apply_keeps_applying_state_for_retry() -> Result<()> {
        let h = Harness::new();
        h.applier.set_apply_error(Some("release rejected"))?;
        let mut layer = Layer::new(
            name("y"),
            LayerSpec {
                resources: resources(&["a"]),
                ..LayerSpec::default()
            },
        );
        h.repo.save(&layer).await?;

        let err = h.step(&mut layer).await.expect_err("scripted apply failure");
        assert!(err.is_recoverable());
        assert_eq!(layer.status.state, LayerState::Applying);

        // Next pass retries apply without re-entering pruning.
        h.applier.set_apply_error(None)?;
        let requeue = h.step(&mut layer).await?;
        assert_eq!(layer.status.state, LayerState::Applying);
        assert!(delayed(requeue));
        assert_eq!(h.applier.count(&layer.name, ActionKind::Apply)?, 2);
        assert_eq!(h.applier.count(&layer.name, ActionKind::Prune)?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn cyclic_dependencies_park_both_layers_without_deadlock() -> Result<()> {
        let h = Harness::new();
        let mut a = Layer::new(
            name("a"),
            LayerSpec {
                resources: resources(&["ra"]),
                depends_on: vec![name("b")],
                ..LayerSpec::default()
            },
        );
        let mut b = Layer::new(
            name("b"),
            LayerSpec {
                resources: resources(&["rb"]),
                depends_on: vec![name("a")],
                ..LayerSpec::default()
            },
        );
        h.repo.save(&a).await?;
        h.repo.save(&b).await?;

        for _ in 0..3 {
            let ra = h.step(&mut a).await?;
            let rb = h.step(&mut b).await?;
            assert!(delayed(ra));
            assert!(delayed(rb));
        }
        assert_eq!(a.status.state, LayerState::PendingApply);
        assert_eq!(b.status.state, LayerState::PendingApply);
        assert!(h.applier.invocations()?.is_empty());
        Ok(())
    }

    // A recoverable failure recorded outside any prune/apply phase (for
    // example a dependency read that hit a transient repository error) must
    // not wedge a layer whose resources already match its declaration.
    #[tokio::test]
    async fn transient_failure_outside_a_phase_clears_on_the_next_pass() -> Result<()> {
        let h = Harness::new();
        let mut layer = Layer::new(
            name("app"),
            LayerSpec {
                resources: resources(&["a"]),
                ..LayerSpec::default()
            },
        );
        layer.status.state = LayerState::Deployed;
        layer.status.applied_resources = resources(&["a"]);
        h.repo.save(&layer).await?;

        layer.record_failure("storage error: transient read failure");
        assert_eq!(layer.status.state, LayerState::Failed);

        let requeue = h.step(&mut layer).await?;
        assert_eq!(layer.status.state, LayerState::Deployed);
        assert!(layer.status.last_error.is_none());
        assert_eq!(requeue, Requeue::None);
        assert!(h.applier.invocations()?.is_empty());
        Ok(())
    }

    /// Delegating repository that reports a version conflict for one layer's
    /// status writes.
    struct ConflictingRepo {
        inner: MemoryLayerRepository,
        conflict_on: LayerName,
    }

    #[async_trait]
    impl LayerRepository for ConflictingRepo {
        async fn get(&self, name: &LayerName) -> Result<Option<Layer>> {
            self.inner.get(name).await
        }

        async fn list(&self) -> Result<Vec<Layer>> {
            self.inner.list().await
        }

        async fn save(&self, layer: &Layer) -> Result<()> {
            self.inner.save(layer).await
        }

        async fn update_status(
            &self,
            name: &LayerName,
            status: &LayerStatus,
        ) -> Result<UpdateResult> {
            if *name == self.conflict_on {
                return Ok(UpdateResult::VersionConflict { actual: 99 });
            }
            self.inner.update_status(name, status).await
        }
    }

    // A sibling staging write losing a version race says nothing about the
    // current layer, so the pass proceeds instead of reporting a failure.
    #[tokio::test]
    async fn sibling_staging_race_does_not_fail_the_current_layer() -> Result<()> {
        let repo = ConflictingRepo {
            inner: MemoryLayerRepository::new(),
            conflict_on: name("web"),
        };
        let mut sibling = Layer::new(
            name("web"),
            LayerSpec {
                resources: resources(&["w2"]),
                ..LayerSpec::default()
            },
        );
        sibling.status.state = LayerState::Deployed;
        sibling.status.applied_resources = resources(&["w1"]);
        repo.save(&sibling).await?;

        let mut db = Layer::new(
            name("db"),
            LayerSpec {
                resources: resources(&["d"]),
                ..LayerSpec::default()
            },
        );
        db.status.state = LayerState::Deployed;
        db.status.applied_resources = resources(&[]);
        repo.save(&db).await?;

        let machine = LayerStateMachine::new(
            Arc::new(RecordingApplier::new()),
            Arc::new(FixedPrecondition::new(true)),
            ControllerRuntimeConfig::default(),
        );
        let requeue = machine.step(&repo, &mut db).await?;
        assert_eq!(db.status.state, LayerState::PendingPrune);
        assert!(delayed(requeue));

        // The sibling keeps its own state; its next pass restages it.
        let untouched = repo.get(&name("web")).await?.expect("sibling exists");
        assert_eq!(untouched.status.state, LayerState::Deployed);
        Ok(())
    }

    #[tokio::test]
    async fn quiescent_layer_stays_deployed_without_requeue() -> Result<()> {
        let h = Harness::new();
        let mut layer = Layer::new(
            name("db"),
            LayerSpec {
                resources: resources(&["a"]),
                ..LayerSpec::default()
            },
        );
        layer.status.state = LayerState::Deployed;
        layer.status.applied_resources = resources(&["a"]);
        h.repo.save(&layer).await?;

        let requeue = h.step(&mut layer).await?;
        assert_eq!(layer.status.state, LayerState::Deployed);
        assert_eq!(requeue, Requeue::None);
        assert!(h.applier.invocations()?.is_empty());
        Ok(())
    }
}
