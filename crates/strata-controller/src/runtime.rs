//! Runtime configuration for the rollout controller.
//!
//! Delay magnitudes are deliberately configurable: the delay-after-success
//! requeue policy is backpressure against tight reconcile loops, so its
//! duration is an operator decision, not a hardwired constant.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const ENV_REQUEUE_DELAY_SECS: &str = "STRATA_REQUEUE_DELAY_SECS";
const ENV_PRECONDITION_DELAY_SECS: &str = "STRATA_PRECONDITION_DELAY_SECS";

const DEFAULT_REQUEUE_DELAY_SECS: u64 = 30;
const DEFAULT_PRECONDITION_DELAY_SECS: u64 = 60;

/// Delay configuration for the reconciliation driver.
///
/// Deserializes from config files with human-readable durations
/// (`"30s"`, `"2m"`); environment variables override per
/// [`Self::from_env`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerRuntimeConfig {
    /// Delay attached whenever a pass leaves work incomplete, including
    /// after a successful prune or apply.
    #[serde(with = "humantime_serde")]
    pub requeue_delay: Duration,
    /// Delay while waiting for the environment precondition to pass.
    /// Environment upgrades are slow, so this is typically longer.
    #[serde(with = "humantime_serde")]
    pub precondition_delay: Duration,
}

impl Default for ControllerRuntimeConfig {
    fn default() -> Self {
        Self {
            requeue_delay: Duration::from_secs(DEFAULT_REQUEUE_DELAY_SECS),
            precondition_delay: Duration::from_secs(DEFAULT_PRECONDITION_DELAY_SECS),
        }
    }
}

impl ControllerRuntimeConfig {
    /// Loads runtime config from the process environment with strict
    /// validation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an environment value is not a
    /// positive integer number of seconds.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads runtime config with a custom environment source.
    ///
    /// This entry point is test-friendly and accepts a key lookup function.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an environment value is not a
    /// positive integer number of seconds.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let requeue_delay_secs =
            parse_positive_u64_env(&get_env, ENV_REQUEUE_DELAY_SECS, DEFAULT_REQUEUE_DELAY_SECS)?;
        let precondition_delay_secs = parse_positive_u64_env(
            &get_env,
            ENV_PRECONDITION_DELAY_SECS,
            DEFAULT_PRECONDITION_DELAY_SECS,
        )?;

        Ok(Self {
            requeue_delay: Duration::from_secs(requeue_delay_secs),
            precondition_delay: Duration::from_secs(precondition_delay_secs),
        })
    }
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    let parsed = raw.parse::<u64>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == 0 {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}
