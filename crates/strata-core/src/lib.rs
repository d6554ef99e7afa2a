//! # strata-core
//!
//! Shared vocabulary for the strata storage facade and its callers:
//!
//! - **Configuration**: [`AppConfig`], [`StoreConfig`], [`TlsConfig`] with
//!   layered loading (defaults, JSON file, `STRATA_*` environment overrides)
//! - **Records**: [`AuditRecord`], the persisted request audit entry
//! - **Utilities**: millisecond clock, DSN password masking
//! - **Logging**: `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod audit;
pub mod config;
pub mod errors;
pub mod loader;
pub mod logging;
pub mod text;
pub mod time;

pub use audit::AuditRecord;
pub use config::{AppConfig, LogFormat, StoreConfig, TlsConfig};
pub use errors::{ConfigError, Result};
pub use loader::{apply_env_overrides, apply_env_overrides_with, deep_merge, load_config_from_path, parse_env};
pub use text::mask_password;
pub use time::now_millis;
