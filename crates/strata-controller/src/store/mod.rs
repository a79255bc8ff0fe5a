//! Pluggable persistence for layer state.
//!
//! The `LayerRepository` trait defines the object-repository boundary the
//! controller consumes: get/update/list over persisted layers. Change
//! notification delivery and per-layer trigger serialization belong to the
//! outer queueing collaborator and are deliberately not modeled here.
//!
//! ## Design Principles
//!
//! - **Version-checked writes**: Status updates carry the version observed
//!   at load time so concurrent writers are detected, not overwritten
//! - **Testability**: In-memory implementation for tests, real object
//!   stores behind the same trait in production

pub mod memory;

use async_trait::async_trait;

use strata_core::LayerName;

use crate::error::Result;
use crate::layer::{Layer, LayerStatus};

/// Result of a version-checked status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateResult {
    /// The status was persisted.
    Success,
    /// The layer no longer exists (deleted concurrently).
    NotFound,
    /// Another writer updated the layer since it was loaded.
    VersionConflict {
        /// The version currently persisted.
        actual: u64,
    },
}

impl UpdateResult {
    /// Returns true if the update was persisted.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Storage abstraction for persisted layers.
///
/// The persisted layer status is the single source of truth; only one
/// in-flight pass per layer may write it. That serialization is the
/// contract of the external trigger queue, so implementations only need
/// version checking to surface races, not to prevent them.
#[async_trait]
pub trait LayerRepository: Send + Sync {
    /// Gets a layer by name.
    ///
    /// Returns `None` if the layer does not exist.
    async fn get(&self, name: &LayerName) -> Result<Option<Layer>>;

    /// Lists all layers.
    ///
    /// Used by change-set staging and the dependency resolver. Ordering is
    /// unspecified.
    async fn list(&self) -> Result<Vec<Layer>>;

    /// Saves a layer (insert or full replacement).
    ///
    /// This is the path external actors use to create layers and edit
    /// specs; the reconciler itself only writes status.
    async fn save(&self, layer: &Layer) -> Result<()>;

    /// Writes a layer's status if the persisted version still matches
    /// `status.observed_version`.
    ///
    /// On success the persisted version is incremented.
    async fn update_status(&self, name: &LayerName, status: &LayerStatus) -> Result<UpdateResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_result_is_success() {
        assert!(UpdateResult::Success.is_success());
        assert!(!UpdateResult::NotFound.is_success());
        assert!(!UpdateResult::VersionConflict { actual: 3 }.is_success());
    }
}
