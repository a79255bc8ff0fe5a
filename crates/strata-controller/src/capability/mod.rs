//! Capability boundaries consumed by the state machine.
//!
//! This module provides:
//!
//! - [`PreconditionCheck`]: Environment readiness probe (e.g., version
//!   compatibility)
//! - [`LayerApplier`]: The resource applier/pruner that creates and deletes
//!   managed resources
//! - [`ActionKind`]: Label for the capability action a pass performed
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: The machine sees success/failure per invocation,
//!   nothing about transports or credentials
//! - **Idempotent**: Apply and prune are safe to repeat with an unchanged
//!   declared resource set
//! - **Constructor injection**: Capabilities are explicitly constructed and
//!   passed, never process-wide globals

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::layer::Layer;

/// The capability action invoked during a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Delete resources no longer declared.
    Prune,
    /// Create or update declared resources.
    Apply,
}

impl ActionKind {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Prune => "prune",
            Self::Apply => "apply",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

/// Environment precondition probe.
///
/// Called on every pass, so implementations must be cheap or cache-friendly.
/// The check has no side effects; a `false` answer parks the layer in
/// `PENDING_ENV_VERSION` until the environment catches up.
#[async_trait]
pub trait PreconditionCheck: Send + Sync {
    /// Returns true when the environment satisfies the layer's requirements.
    async fn check(&self, layer: &Layer) -> bool;
}

/// The resource applier/pruner capability.
///
/// Both operations are idempotent with commit-or-fail semantics per
/// resource: partial application is allowed and failures come back as one
/// aggregated error. The capability is safe for concurrent use across
/// different layers.
#[async_trait]
pub trait LayerApplier: Send + Sync {
    /// Creates or updates the layer's declared resources.
    ///
    /// # Errors
    ///
    /// Returns `Error::ApplyFailed` with aggregated per-resource detail.
    async fn apply(&self, layer: &Layer) -> Result<()>;

    /// Deletes resources the layer no longer declares.
    ///
    /// # Errors
    ///
    /// Returns `Error::PruneFailed` with aggregated per-resource detail.
    async fn prune(&self, layer: &Layer) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kind_labels() {
        assert_eq!(ActionKind::Prune.as_label(), "prune");
        assert_eq!(ActionKind::Apply.to_string(), "apply");
    }
}
