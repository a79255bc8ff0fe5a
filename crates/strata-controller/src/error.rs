//! Error types for the rollout controller domain.

use strata_core::LayerName;

/// The result type used throughout strata-controller.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during layer reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A layer was not found in the repository.
    ///
    /// Not-found is soft at the driver boundary: the layer may have been
    /// deleted concurrently, so the pass simply stops.
    #[error("layer not found: {name}")]
    LayerNotFound {
        /// The layer name that was not found.
        name: LayerName,
    },

    /// A cycle was detected in the layer dependency graph.
    #[error("cycle detected in layer dependencies: {cycle:?}")]
    DependencyCycle {
        /// The cycle path (layer names).
        cycle: Vec<String>,
    },

    /// The apply capability reported a failure.
    #[error("apply failed for layer '{name}': {message}")]
    ApplyFailed {
        /// The layer whose apply failed.
        name: LayerName,
        /// Aggregated failure detail from the applier.
        message: String,
    },

    /// The prune capability reported a failure.
    #[error("prune failed for layer '{name}': {message}")]
    PruneFailed {
        /// The layer whose prune failed.
        name: LayerName,
        /// Aggregated failure detail from the pruner.
        message: String,
    },

    /// A repository operation failed.
    ///
    /// Treated as transient: a persistence failure on status write triggers
    /// an immediate requeue so no state update is silently lost.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An invalid state transition was attempted.
    ///
    /// This is an invariant violation: it should not occur by construction,
    /// and when it does the pass fails loudly instead of silently choosing
    /// an incorrect transition.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// A configuration value was missing or malformed.
    ///
    /// The only error class that is fatal to the process, at setup time.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration failure.
        message: String,
    },

    /// An error from strata-core.
    #[error("core error: {0}")]
    Core(#[from] strata_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a storage error with an underlying cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns true when this error is recoverable by retrying the pass.
    ///
    /// Recoverable errors are absorbed at the driver boundary and converted
    /// into a requeue decision plus a status annotation.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ApplyFailed { .. } | Self::PruneFailed { .. } | Self::Storage { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> LayerName {
        s.parse().expect("valid layer name")
    }

    #[test]
    fn capability_failures_are_recoverable() {
        assert!(Error::ApplyFailed {
            name: name("db"),
            message: "boom".into(),
        }
        .is_recoverable());
        assert!(Error::PruneFailed {
            name: name("db"),
            message: "boom".into(),
        }
        .is_recoverable());
        assert!(Error::storage("write lost").is_recoverable());
    }

    #[test]
    fn invariant_violations_are_not_recoverable() {
        let err = Error::InvalidStateTransition {
            from: "DEPLOYED".into(),
            to: "PRUNED".into(),
            reason: "no rule produces this edge".into(),
        };
        assert!(!err.is_recoverable());
        assert!(!Error::configuration("bad delay").is_recoverable());
    }

    #[test]
    fn storage_error_preserves_source() {
        let io = std::io::Error::other("disk gone");
        let err = Error::storage_with_source("status write failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
