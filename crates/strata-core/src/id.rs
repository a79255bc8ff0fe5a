//! Strongly-typed identifiers for Strata entities.
//!
//! All identifiers in Strata are:
//! - **Strongly typed**: Prevents mixing up different identifier kinds at
//!   compile time
//! - **Validated**: Layer names are checked at construction, never downstream
//!
//! # Example
//!
//! ```rust
//! use strata_core::id::{LayerName, PassId};
//!
//! let layer: LayerName = "base-apps".parse().expect("valid layer name");
//! let pass = PassId::generate();
//!
//! // Identifiers are different types - this won't compile:
//! // let wrong: LayerName = pass;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// Maximum length of a layer name.
const MAX_LAYER_NAME_LEN: usize = 63;

/// The unique, system-scoped name of a rollout layer.
///
/// Layer names identify the unit of reconciliation. They are lowercase
/// alphanumeric labels with interior hyphens, at most 63 characters, so
/// they remain usable as object-repository keys and metric label values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerName(String);

impl LayerName {
    /// Creates a layer name, validating the label format.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, longer than 63 characters,
    /// contains characters outside `[a-z0-9-]`, or starts/ends with a hyphen.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid_id("layer name must not be empty"));
        }
        if name.len() > MAX_LAYER_NAME_LEN {
            return Err(Error::invalid_id(format!(
                "layer name '{name}' exceeds {MAX_LAYER_NAME_LEN} characters"
            )));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(Error::invalid_id(format!(
                "layer name '{name}' must match [a-z0-9-]"
            )));
        }
        if name.starts_with('-') || name.ends_with('-') {
            return Err(Error::invalid_id(format!(
                "layer name '{name}' must not start or end with '-'"
            )));
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LayerName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for LayerName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// A unique identifier for one reconciliation pass.
///
/// Pass identifiers correlate log lines and metrics emitted while a single
/// pass is in flight. ULIDs sort by creation time and require no
/// coordination to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassId(Ulid);

impl PassId {
    /// Generates a new unique pass ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = self.0.timestamp_ms();
        i64::try_from(ms)
            .ok()
            .and_then(chrono::DateTime::from_timestamp_millis)
            .unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PassId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::invalid_id(format!("invalid pass ID '{s}': {e}")))
    }
}
