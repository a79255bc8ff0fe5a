//! In-memory capability implementations for testing.
//!
//! [`FixedPrecondition`] answers the precondition probe from a switchable
//! flag, and [`RecordingApplier`] records every apply/prune invocation and
//! can be scripted to fail, so tests can assert exactly which capability
//! calls a pass made.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use strata_core::LayerName;

use super::{ActionKind, LayerApplier, PreconditionCheck};
use crate::error::{Error, Result};
use crate::layer::Layer;

/// Precondition probe returning a switchable fixed answer.
#[derive(Debug)]
pub struct FixedPrecondition {
    ok: AtomicBool,
}

impl FixedPrecondition {
    /// Creates a probe with the given initial answer.
    #[must_use]
    pub fn new(ok: bool) -> Self {
        Self {
            ok: AtomicBool::new(ok),
        }
    }

    /// Changes the answer, simulating an environment upgrade or regression.
    pub fn set(&self, ok: bool) {
        self.ok.store(ok, Ordering::SeqCst);
    }
}

#[async_trait]
impl PreconditionCheck for FixedPrecondition {
    async fn check(&self, _layer: &Layer) -> bool {
        self.ok.load(Ordering::SeqCst)
    }
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// Applier/pruner that records invocations and supports scripted failures.
#[derive(Debug, Default)]
pub struct RecordingApplier {
    invocations: RwLock<Vec<(LayerName, ActionKind)>>,
    apply_error: RwLock<Option<String>>,
    prune_error: RwLock<Option<String>>,
}

impl RecordingApplier {
    /// Creates an applier that succeeds on every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts every subsequent apply to fail with the given message, or
    /// clears the script with `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn set_apply_error(&self, message: Option<&str>) -> Result<()> {
        *self.apply_error.write().map_err(poison_err)? = message.map(ToString::to_string);
        Ok(())
    }

    /// Scripts every subsequent prune to fail with the given message, or
    /// clears the script with `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn set_prune_error(&self, message: Option<&str>) -> Result<()> {
        *self.prune_error.write().map_err(poison_err)? = message.map(ToString::to_string);
        Ok(())
    }

    /// Returns every invocation in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn invocations(&self) -> Result<Vec<(LayerName, ActionKind)>> {
        Ok(self.invocations.read().map_err(poison_err)?.clone())
    }

    /// Returns how often the given action ran for the given layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn count(&self, name: &LayerName, kind: ActionKind) -> Result<usize> {
        Ok(self
            .invocations
            .read()
            .map_err(poison_err)?
            .iter()
            .filter(|(n, k)| n == name && *k == kind)
            .count())
    }

    fn record(&self, name: &LayerName, kind: ActionKind) -> Result<()> {
        self.invocations
            .write()
            .map_err(poison_err)?
            .push((name.clone(), kind));
        Ok(())
    }
}

#[async_trait]
impl LayerApplier for RecordingApplier {
    async fn apply(&self, layer: &Layer) -> Result<()> {
        self.record(&layer.name, ActionKind::Apply)?;
        if let Some(message) = self.apply_error.read().map_err(poison_err)?.clone() {
            return Err(Error::ApplyFailed {
                name: layer.name.clone(),
                message,
            });
        }
        Ok(())
    }

    async fn prune(&self, layer: &Layer) -> Result<()> {
        self.record(&layer.name, ActionKind::Prune)?;
        if let Some(message) = self.prune_error.read().map_err(poison_err)?.clone() {
            return Err(Error::PruneFailed {
                name: layer.name.clone(),
                message,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerSpec;

    fn layer(name: &str) -> Layer {
        Layer::new(name.parse().expect("valid layer name"), LayerSpec::default())
    }

    #[tokio::test]
    async fn records_invocations_in_order() -> Result<()> {
        let applier = RecordingApplier::new();
        let db = layer("db");

        applier.prune(&db).await?;
        applier.apply(&db).await?;

        let calls = applier.invocations()?;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, ActionKind::Prune);
        assert_eq!(calls[1].1, ActionKind::Apply);
        assert_eq!(applier.count(&db.name, ActionKind::Apply)?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn scripted_apply_failure_still_records() -> Result<()> {
        let applier = RecordingApplier::new();
        let db = layer("db");

        applier.set_apply_error(Some("release rejected"))?;
        let err = applier.apply(&db).await.expect_err("scripted failure");
        assert!(matches!(err, Error::ApplyFailed { .. }));
        assert_eq!(applier.count(&db.name, ActionKind::Apply)?, 1);

        applier.set_apply_error(None)?;
        applier.apply(&db).await?;
        Ok(())
    }

    #[tokio::test]
    async fn fixed_precondition_is_switchable() {
        let probe = FixedPrecondition::new(false);
        let db = layer("x");
        assert!(!probe.check(&db).await);
        probe.set(true);
        assert!(probe.check(&db).await);
    }
}
