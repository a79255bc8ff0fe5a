//! Shared error definitions for Strata components.

/// The result type used throughout strata-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors defined by the core crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier failed validation or parsing.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of the validation failure.
        message: String,
    },

    /// A configuration value was missing or malformed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration failure.
        message: String,
    },
}

impl Error {
    /// Creates a new invalid-identifier error.
    #[must_use]
    pub fn invalid_id(message: impl Into<String>) -> Self {
        Self::InvalidId {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
