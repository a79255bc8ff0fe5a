//! # strata-core
//!
//! Core abstractions for the Strata rollout controller.
//!
//! This crate provides the foundational types used across all Strata
//! components:
//!
//! - **Identifiers**: Strongly-typed names for layers and reconcile passes
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Structured logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `strata-core` is the only crate allowed to define shared primitives.
//! Everything the controller crates exchange across their boundaries is
//! defined here.
//!
//! ## Example
//!
//! ```rust
//! use strata_core::prelude::*;
//!
//! let name: LayerName = "base-apps".parse().expect("valid layer name");
//! let pass = PassId::generate();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use strata_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{LayerName, PassId};
    pub use crate::observability::{init_logging, reconcile_span, LogFormat};
}

pub use error::{Error, Result};
pub use id::{LayerName, PassId};
