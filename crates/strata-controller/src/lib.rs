//! # strata-controller
//!
//! Dependency-ordered rollout controller for layered deployments.
//!
//! This crate implements the reconciliation domain, providing:
//!
//! - **Layer Model**: Declarative layers with resources, dependencies, and
//!   per-layer status
//! - **State Machine**: A priority-ordered, level-triggered machine that
//!   walks each layer through prune-before-apply
//! - **Dependency Gating**: A layer applies only after every dependency is
//!   fully deployed
//! - **Requeue Policy**: Every non-terminal pass schedules its own revisit
//!
//! ## Core Concepts
//!
//! - **Layer**: A named deployment unit declaring resources and the layers
//!   it depends on
//! - **Pass**: One re-entrant reconciliation of one layer, advancing its
//!   state by at most one transition
//! - **Change set**: The layers whose declared resources diverge from what
//!   is applied; the whole set prunes before any member applies
//!
//! ## Guarantees
//!
//! - **Level-triggered**: Every pass re-derives its decision from persisted
//!   state, so missed or duplicated triggers are harmless
//! - **Prune before apply**: No layer applies new resources while any layer
//!   in the change set still holds stale ones
//! - **Progress or delay**: Every pass either changes observable state or
//!   schedules a revisit; held and quiescent layers park without one
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use strata_controller::capability::memory::{FixedPrecondition, RecordingApplier};
//! use strata_controller::error::Result;
//! use strata_controller::layer::{Layer, LayerSpec, ResourceRef};
//! use strata_controller::reconciler::Reconciler;
//! use strata_controller::runtime::ControllerRuntimeConfig;
//! use strata_controller::store::memory::MemoryLayerRepository;
//! use strata_controller::store::LayerRepository;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let repo = Arc::new(MemoryLayerRepository::new());
//! let layer = Layer::new(
//!     "database".parse()?,
//!     LayerSpec {
//!         resources: vec![ResourceRef::new("release", "postgres")],
//!         ..LayerSpec::default()
//!     },
//! );
//! repo.save(&layer).await?;
//!
//! let reconciler = Reconciler::new(
//!     repo,
//!     Arc::new(RecordingApplier::new()),
//!     Arc::new(FixedPrecondition::new(true)),
//!     ControllerRuntimeConfig::from_env()?,
//! );
//!
//! // Drive passes until the layer parks.
//! while reconciler.reconcile(&"database".parse()?).await?.is_scheduled() {}
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod capability;
pub mod deps;
pub mod error;
pub mod layer;
pub mod machine;
pub mod metrics;
pub mod reconciler;
pub mod runtime;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::capability::{ActionKind, LayerApplier, PreconditionCheck};
    pub use crate::deps::{dependencies_satisfied, DependencyGraph};
    pub use crate::error::{Error, Result};
    pub use crate::layer::{Layer, LayerSpec, LayerState, LayerStatus, ResourceRef};
    pub use crate::machine::{LayerStateMachine, Requeue};
    pub use crate::metrics::ControllerMetrics;
    pub use crate::reconciler::Reconciler;
    pub use crate::runtime::ControllerRuntimeConfig;
    pub use crate::store::{LayerRepository, UpdateResult};
    pub use strata_core::{LayerName, PassId};
}
