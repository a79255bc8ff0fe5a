//! Layer entity: the persisted representation of one rollout unit.
//!
//! This module provides:
//! - `LayerState`: The reconciliation state machine's state enumeration
//! - `LayerSpec`: Declared resources, dependencies, and the hold flag
//! - `LayerStatus`: The externally observable rollout status
//! - `Layer`: The per-pass entity combining spec and status
//!
//! A `Layer` is constructed fresh on every reconciliation pass from the
//! repository, mutated only within that pass, and written back once at the
//! end. There are no long-lived in-memory layer objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::LayerName;

use crate::error::{Error, Result};

/// Status reason strings shared between the machine and the driver.
pub mod reasons {
    /// The layer's hold flag is set.
    pub const HOLD_SET: &str = "layer is held, processing suspended";
    /// The environment precondition check failed.
    pub const PRECONDITION_FAILED: &str = "waiting for environment version";
    /// Declared resources differ from applied resources.
    pub const CHANGE_DETECTED: &str = "resource changes detected, pruning pending";
    /// Obsolete resources are being pruned.
    pub const PRUNING: &str = "pruning obsolete resources";
    /// Pruning finished for this layer.
    pub const PRUNED: &str = "obsolete resources pruned";
    /// All change-set layers are pruned, apply may begin.
    pub const APPLY_PENDING: &str = "pruning complete, apply pending";
    /// Declared dependencies are not yet deployed.
    pub const WAITING_FOR_DEPENDENCIES: &str = "waiting for dependencies to be deployed";
    /// Declared resources are being applied.
    pub const APPLYING: &str = "applying declared resources";
    /// Every declared resource has been applied.
    pub const DEPLOYED: &str = "all declared resources deployed";
    /// A capability or staging operation failed.
    pub const FAILED: &str = "reconciliation failed";
}

/// Reconciliation state of a layer.
///
/// States mirror the priority rules of the state machine:
///
/// ```text
/// ┌──────┐     ┌───────────────────┐
/// │ HOLD │     │ PENDING_ENV_VERSION │   (both re-entered from anywhere)
/// └──────┘     └───────────────────┘
///
/// ┌───────────────┐    ┌─────────┐    ┌────────┐    ┌───────────────┐
/// │ PENDING_PRUNE │───►│ PRUNING │───►│ PRUNED │───►│ PENDING_APPLY │
/// └───────────────┘    └─────────┘    └────────┘    └───────────────┘
///                                                          │
///                                                          ▼
///                                                    ┌──────────┐    ┌──────────┐
///                                                    │ APPLYING │───►│ DEPLOYED │
///                                                    └──────────┘    └──────────┘
/// ```
///
/// `FAILED` is non-blocking: the failure is reported and the layer is
/// retried on the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayerState {
    /// Externally held; every other transition is suppressed.
    Hold,
    /// The environment precondition failed; waiting for an upgrade.
    PendingEnvVersion,
    /// Staged for pruning as part of a change set.
    PendingPrune,
    /// Obsolete resources are being pruned.
    Pruning,
    /// Pruning finished; waiting for sibling layers to finish pruning.
    Pruned,
    /// Waiting for dependencies before applying.
    PendingApply,
    /// Declared resources are being applied.
    Applying,
    /// All declared resources applied successfully (terminal).
    Deployed,
    /// Reconciliation failed outside an in-progress phase (terminal-flavored,
    /// retried).
    Failed,
}

impl LayerState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Deployed | Self::Failed)
    }

    /// Returns true if a layer in this state needs no requeue.
    ///
    /// Quiescent layers are revisited only by an external change
    /// notification, never by a timer.
    #[must_use]
    pub const fn is_quiescent(&self) -> bool {
        matches!(self, Self::Deployed | Self::Hold)
    }

    /// Returns true while the layer is inside the prune/apply cycle.
    ///
    /// Change-set staging only pulls layers *outside* the cycle into
    /// `PendingPrune`; layers already cycling keep their phase.
    #[must_use]
    pub const fn in_change_cycle(&self) -> bool {
        matches!(
            self,
            Self::PendingPrune | Self::Pruning | Self::Pruned | Self::PendingApply | Self::Applying
        )
    }

    /// Returns true if the transition from self to target is valid.
    ///
    /// Re-affirming the current state is always valid. `Hold`,
    /// `PendingEnvVersion`, `PendingPrune`, and `Failed` are reachable from
    /// anywhere because the corresponding priority rules fire regardless of
    /// the current state. `Applying` is only reachable through
    /// `PendingApply`, which is what makes the prune-before-apply and
    /// dependency gates structural rather than advisory.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        if *self == target {
            return true;
        }
        match target {
            Self::Hold | Self::PendingEnvVersion | Self::PendingPrune | Self::Failed => true,
            Self::Pruning => matches!(self, Self::PendingPrune),
            Self::Pruned => matches!(self, Self::Pruning),
            Self::PendingApply => !matches!(self, Self::PendingPrune | Self::Pruning),
            Self::Applying => matches!(self, Self::PendingApply),
            Self::Deployed => !matches!(self, Self::PendingPrune | Self::Pruning | Self::Pruned),
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::PendingEnvVersion => "pending_env_version",
            Self::PendingPrune => "pending_prune",
            Self::Pruning => "pruning",
            Self::Pruned => "pruned",
            Self::PendingApply => "pending_apply",
            Self::Applying => "applying",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
        }
    }
}

impl Default for LayerState {
    fn default() -> Self {
        Self::PendingApply
    }
}

impl std::fmt::Display for LayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hold => write!(f, "HOLD"),
            Self::PendingEnvVersion => write!(f, "PENDING_ENV_VERSION"),
            Self::PendingPrune => write!(f, "PENDING_PRUNE"),
            Self::Pruning => write!(f, "PRUNING"),
            Self::Pruned => write!(f, "PRUNED"),
            Self::PendingApply => write!(f, "PENDING_APPLY"),
            Self::Applying => write!(f, "APPLYING"),
            Self::Deployed => write!(f, "DEPLOYED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Reference to a managed resource owned by a layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// Resource kind (e.g., a release manifest type).
    pub kind: String,
    /// Resource name, unique within the layer for its kind.
    pub name: String,
}

impl ResourceRef {
    /// Creates a new resource reference.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Declared (desired) configuration of a layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSpec {
    /// Resources this layer owns in its desired state.
    #[serde(default)]
    pub resources: Vec<ResourceRef>,
    /// Layers that must be `DEPLOYED` before this layer may apply.
    #[serde(default)]
    pub depends_on: Vec<LayerName>,
    /// Freezes all processing for the layer when true.
    #[serde(default)]
    pub hold: bool,
    /// Minimum environment version this layer requires, passed opaquely to
    /// the precondition capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_version: Option<String>,
}

/// Externally observable rollout status of a layer.
///
/// This is the persisted single source of truth: it must reflect the last
/// action attempted, including failure, so the next pass observes accurate
/// state rather than re-deriving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStatus {
    /// Current reconciliation state.
    pub state: LayerState,
    /// Human-readable reason for the current state.
    pub reason: String,
    /// Message from the most recent failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Resources observed as applied by the last successful apply/prune.
    #[serde(default)]
    pub applied_resources: Vec<ResourceRef>,
    /// Cached result of the last precondition check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition_ok: Option<bool>,
    /// Timestamp of the last state transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_at: Option<DateTime<Utc>>,
    /// Version counter for optimistic concurrency on status writes.
    #[serde(default)]
    pub observed_version: u64,
}

impl Default for LayerStatus {
    fn default() -> Self {
        Self {
            state: LayerState::default(),
            reason: "awaiting first reconciliation".to_string(),
            last_error: None,
            applied_resources: Vec::new(),
            precondition_ok: None,
            last_transition_at: None,
            observed_version: 0,
        }
    }
}

/// One rollout unit: a named layer with its declared spec and observed
/// status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    /// Unique, system-scoped layer name.
    pub name: LayerName,
    /// Declared configuration.
    pub spec: LayerSpec,
    /// Observed rollout status.
    pub status: LayerStatus,
    /// True when status changed during this pass and must be persisted.
    #[serde(skip)]
    updated: bool,
}

impl Layer {
    /// Creates a new layer with a default status.
    #[must_use]
    pub fn new(name: LayerName, spec: LayerSpec) -> Self {
        Self {
            name,
            spec,
            status: LayerStatus::default(),
            updated: false,
        }
    }

    /// Returns true when the hold flag is set.
    #[must_use]
    pub const fn is_hold(&self) -> bool {
        self.spec.hold
    }

    /// Returns true when previously applied resources are no longer declared.
    #[must_use]
    pub fn pruning_required(&self) -> bool {
        self.status
            .applied_resources
            .iter()
            .any(|r| !self.spec.resources.contains(r))
    }

    /// Returns true when declared resources have not yet been applied.
    #[must_use]
    pub fn apply_required(&self) -> bool {
        self.spec
            .resources
            .iter()
            .any(|r| !self.status.applied_resources.contains(r))
    }

    /// Returns true when the declared set is fully applied and the last
    /// attempt did not fail.
    #[must_use]
    pub fn successfully_applied(&self) -> bool {
        !self.apply_required() && !self.pruning_required() && self.status.last_error.is_none()
    }

    /// Returns true when status changed during this pass.
    #[must_use]
    pub const fn is_updated(&self) -> bool {
        self.updated
    }

    /// Transitions to a new state with the given reason.
    ///
    /// Re-affirming the current state and reason is a no-op that leaves the
    /// dirty flag untouched.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` when no priority rule can
    /// produce the requested edge. This is an invariant violation and fails
    /// the pass loudly.
    pub fn transition_to(&mut self, state: LayerState, reason: &str) -> Result<()> {
        if self.status.state == state && self.status.reason == reason {
            return Ok(());
        }
        if !self.status.state.can_transition_to(state) {
            return Err(Error::InvalidStateTransition {
                from: self.status.state.to_string(),
                to: state.to_string(),
                reason: "no reconcile rule produces this edge".to_string(),
            });
        }
        self.status.state = state;
        self.status.reason = reason.to_string();
        self.status.last_transition_at = Some(Utc::now());
        self.updated = true;
        Ok(())
    }

    /// Records a failure in the status without losing the current phase.
    ///
    /// In-progress states (`Pruning`, `Applying`) are kept so the next pass
    /// retries the same operation; any other state moves to `Failed`.
    pub fn record_failure(&mut self, message: impl Into<String>) {
        let message = message.into();
        if matches!(
            self.status.state,
            LayerState::Pruning | LayerState::Applying
        ) {
            self.status.reason = format!("{} (will retry)", reasons::FAILED);
        } else {
            self.status.state = LayerState::Failed;
            self.status.reason = reasons::FAILED.to_string();
            self.status.last_transition_at = Some(Utc::now());
        }
        self.status.last_error = Some(message);
        self.updated = true;
    }

    /// Clears the last-error message after a successful action.
    pub fn clear_error(&mut self) {
        if self.status.last_error.take().is_some() {
            self.updated = true;
        }
    }

    /// Caches the result of the latest precondition check.
    pub fn set_precondition(&mut self, ok: bool) {
        if self.status.precondition_ok != Some(ok) {
            self.status.precondition_ok = Some(ok);
            self.updated = true;
        }
    }

    /// Records a successful prune: undeclared resources leave the applied
    /// set.
    pub fn record_pruned(&mut self) {
        let declared = &self.spec.resources;
        let before = self.status.applied_resources.len();
        self.status.applied_resources.retain(|r| declared.contains(r));
        if self.status.applied_resources.len() != before {
            self.updated = true;
        }
    }

    /// Records a successful apply: the applied set now matches the declared
    /// set.
    pub fn record_applied(&mut self) {
        if self.status.applied_resources != self.spec.resources {
            self.status.applied_resources = self.spec.resources.clone();
            self.updated = true;
        }
    }
}
