//! In-memory repository implementation for testing.
//!
//! This module provides [`MemoryLayerRepository`], a simple in-memory
//! implementation of the [`LayerRepository`] trait suitable for testing and
//! development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no change notification
//! - **Single-process only**: State is not shared across process boundaries

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use strata_core::LayerName;

use super::{LayerRepository, UpdateResult};
use crate::error::{Error, Result};
use crate::layer::{Layer, LayerStatus};

/// In-memory repository for testing.
///
/// Thread-safe via `RwLock`. Supports injecting a failure on the next
/// status update to exercise the driver's persistence-failure path.
#[derive(Debug, Default)]
pub struct MemoryLayerRepository {
    layers: RwLock<HashMap<LayerName, Layer>>,
    fail_next_get: AtomicBool,
    fail_next_update: AtomicBool,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl MemoryLayerRepository {
    /// Creates a new empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `get` call fail with a storage error.
    pub fn fail_next_get(&self) {
        self.fail_next_get.store(true, Ordering::SeqCst);
    }

    /// Makes the next `update_status` call fail with a storage error.
    pub fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }

    /// Returns the number of layers currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn layer_count(&self) -> Result<usize> {
        let count = {
            let layers = self.layers.read().map_err(poison_err)?;
            layers.len()
        };
        Ok(count)
    }

    /// Removes a layer, simulating concurrent deletion by an external actor.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn remove(&self, name: &LayerName) -> Result<()> {
        let mut layers = self.layers.write().map_err(poison_err)?;
        layers.remove(name);
        Ok(())
    }
}

#[async_trait]
impl LayerRepository for MemoryLayerRepository {
    async fn get(&self, name: &LayerName) -> Result<Option<Layer>> {
        if self.fail_next_get.swap(false, Ordering::SeqCst) {
            return Err(Error::storage("injected read failure"));
        }

        let result = {
            let layers = self.layers.read().map_err(poison_err)?;
            layers.get(name).cloned()
        };
        Ok(result)
    }

    async fn list(&self) -> Result<Vec<Layer>> {
        let result = {
            let layers = self.layers.read().map_err(poison_err)?;
            let mut all: Vec<Layer> = layers.values().cloned().collect();
            all.sort_by(|a, b| a.name.cmp(&b.name));
            all
        };
        Ok(result)
    }

    async fn save(&self, layer: &Layer) -> Result<()> {
        {
            let mut layers = self.layers.write().map_err(poison_err)?;
            layers.insert(layer.name.clone(), layer.clone());
        }
        Ok(())
    }

    async fn update_status(&self, name: &LayerName, status: &LayerStatus) -> Result<UpdateResult> {
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(Error::storage("injected update failure"));
        }

        let mut layers = self.layers.write().map_err(poison_err)?;
        let Some(existing) = layers.get_mut(name) else {
            return Ok(UpdateResult::NotFound);
        };

        if existing.status.observed_version != status.observed_version {
            return Ok(UpdateResult::VersionConflict {
                actual: existing.status.observed_version,
            });
        }

        existing.status = status.clone();
        existing.status.observed_version += 1;
        Ok(UpdateResult::Success)
    }
}
