//! Config loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`AppConfig::default()`]
//! 2. If a config file exists, deep-merge its JSON over the defaults
//! 3. Apply `STRATA_*` environment overrides (highest priority)
//!
//! Command-line flags are applied by the binary on top of the result.

use std::path::Path;
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{AppConfig, LogFormat};
use crate::errors::{ConfigError, Result};

/// Load config from a JSON file with env var overrides.
///
/// A missing file yields the defaults. Invalid JSON is an error.
pub fn load_config_from_path(path: &Path) -> Result<AppConfig> {
    let malformed = |source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    };
    let defaults = serde_json::to_value(AppConfig::default()).map_err(malformed)?;

    let merged = if path.exists() {
        debug!(?path, "loading config from file");
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(malformed)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "config file not found, using defaults");
        defaults
    };

    let mut config: AppConfig = serde_json::from_value(merged).map_err(malformed)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: &mut AppConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

/// Apply overrides using an arbitrary variable lookup.
///
/// Empty values are treated as unset. Unparseable numbers and formats are
/// ignored with a warning, keeping the file/default value.
pub fn apply_env_overrides_with<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("STRATA_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Some(v) = read("STRATA_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => config.log_format = format,
            Err(_) => ignored(&ConfigError::invalid("STRATA_LOG_FORMAT", v, "expected text or json")),
        }
    }

    let store = &mut config.store;
    if let Some(v) = read("STRATA_STORE_DRIVER") {
        store.driver = v;
    }
    if let Some(v) = read("STRATA_STORE_DSN") {
        store.dsn = v;
    }
    if let Some(v) = read("STRATA_STORE_TLS_CA") {
        store.tls.ca = v;
    }
    if let Some(v) = read("STRATA_STORE_TLS_CERT") {
        store.tls.cert = v;
    }
    if let Some(v) = read("STRATA_STORE_TLS_KEY") {
        store.tls.key = v;
    }
    if let Some(v) = read("STRATA_STORE_MAX_OPEN_CONNS").and_then(|v| count("STRATA_STORE_MAX_OPEN_CONNS", &v)) {
        store.max_open_conns = v;
    }
    if let Some(v) = read("STRATA_STORE_MAX_IDLE_CONNS").and_then(|v| count("STRATA_STORE_MAX_IDLE_CONNS", &v)) {
        store.max_idle_conns = v;
    }
    if let Some(v) = read("STRATA_STORE_CONN_MAX_LIFETIME_SECS") {
        match parse_env::<u64>("STRATA_STORE_CONN_MAX_LIFETIME_SECS", &v) {
            Ok(secs) => store.conn_max_lifetime_secs = secs,
            Err(e) => ignored(&e),
        }
    }
    if let Some(v) = read("STRATA_STORE_PARAMS") {
        store.params.extend(parse_params(&v));
    }
}

/// Parse a `key=value,key=value` parameter list. Malformed pairs are skipped.
pub fn parse_params(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parse one numeric environment value.
pub fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, raw, format!("expected {}", std::any::type_name::<T>())))
}

fn count(key: &str, raw: &str) -> Option<u32> {
    parse_env(key, raw).map_err(|e| ignored(&e)).ok()
}

fn ignored(err: &ConfigError) {
    warn!(key = err.key().unwrap_or_default(), error = %err, "ignoring environment override");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
