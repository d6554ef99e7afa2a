//! Errors raised while resolving an [`AppConfig`](crate::AppConfig).
//!
//! File failures name the config file; value failures name the key that
//! carried the bad value (a JSON field or a `STRATA_*` variable).

use std::path::PathBuf;

use thiserror::Error;

/// A config source could not be turned into a usable value.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON, or does not fit the config shape.
    #[error("malformed config {}: {source}", path.display())]
    Json {
        /// Config file path.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// A single setting holds a value it cannot take.
    #[error("{key}={value:?}: {reason}")]
    InvalidValue {
        /// Setting name, e.g. `logFormat` or `STRATA_STORE_MAX_OPEN_CONNS`.
        key: String,
        /// The rejected raw value.
        value: String,
        /// What the setting accepts.
        reason: String,
    },
}

impl ConfigError {
    /// Reject `value` for `key`.
    pub fn invalid(key: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// The setting name for value errors.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::InvalidValue { key, .. } => Some(key),
            Self::Io { .. } | Self::Json { .. } => None,
        }
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
