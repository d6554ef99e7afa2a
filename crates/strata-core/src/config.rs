//! Configuration types consumed by the storage facade.
//!
//! [`StoreConfig`] is owned by the caller and read-only to the storage core:
//! a facade copies it on connect and never mutates it. Pool bounds are
//! advisory for engines that cannot honour them (the embedded engine always
//! runs on a single connection).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default driver identifier.
pub const DEFAULT_DRIVER: &str = "sqlite3";
/// Default data-source descriptor.
pub const DEFAULT_DSN: &str = "db.sqlite";
/// Default maximum number of open connections.
pub const DEFAULT_MAX_OPEN_CONNS: u32 = 10;
/// Default maximum number of idle connections.
pub const DEFAULT_MAX_IDLE_CONNS: u32 = 2;

/// Top-level application configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Datastore settings.
    pub store: StoreConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            store: StoreConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable compact lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::invalid("logFormat", s, "expected text or json")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Per-connection datastore settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Driver identifier: `sqlite3`, `mysql` or `postgres`.
    pub driver: String,
    /// Data-source descriptor (file path, `:memory:`, or server URL).
    pub dsn: String,
    /// Optional TLS material for the networked engines.
    pub tls: TlsConfig,
    /// Maximum number of open connections (0 = engine default).
    pub max_open_conns: u32,
    /// Maximum number of idle connections kept warm.
    pub max_idle_conns: u32,
    /// Maximum connection lifetime in seconds (0 = unlimited).
    pub conn_max_lifetime_secs: u64,
    /// Driver parameters passed through to the engine.
    pub params: BTreeMap<String, String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: DEFAULT_DRIVER.to_string(),
            dsn: DEFAULT_DSN.to_string(),
            tls: TlsConfig::default(),
            max_open_conns: DEFAULT_MAX_OPEN_CONNS,
            max_idle_conns: DEFAULT_MAX_IDLE_CONNS,
            conn_max_lifetime_secs: 0,
            params: BTreeMap::new(),
        }
    }
}

impl StoreConfig {
    /// Build a config for a driver and DSN with every other field defaulted.
    pub fn new(driver: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            dsn: dsn.into(),
            ..Self::default()
        }
    }

    /// Connection lifetime bound, `None` when unlimited.
    pub fn conn_max_lifetime(&self) -> Option<Duration> {
        (self.conn_max_lifetime_secs > 0).then(|| Duration::from_secs(self.conn_max_lifetime_secs))
    }
}

/// TLS material: paths to PEM-encoded CA, client certificate and key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// CA certificate path.
    pub ca: String,
    /// Client certificate path.
    pub cert: String,
    /// Client private key path (PKCS#8).
    pub key: String,
}

impl TlsConfig {
    /// TLS is only usable when all three pieces are present.
    pub fn is_valid(&self) -> bool {
        !self.ca.is_empty() && !self.cert.is_empty() && !self.key.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn default_store_config() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.driver, "sqlite3");
        assert_eq!(cfg.dsn, "db.sqlite");
        assert_eq!(cfg.max_open_conns, 10);
        assert_eq!(cfg.max_idle_conns, 2);
        assert!(cfg.conn_max_lifetime().is_none());
        assert!(cfg.params.is_empty());
        assert!(!cfg.tls.is_valid());
    }

    #[test]
    fn conn_max_lifetime_converts_seconds() {
        let cfg = StoreConfig {
            conn_max_lifetime_secs: 90,
            ..StoreConfig::default()
        };
        assert_eq!(cfg.conn_max_lifetime(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn tls_requires_all_three_parts() {
        let mut tls = TlsConfig {
            ca: "ca.pem".into(),
            cert: "client.pem".into(),
            key: String::new(),
        };
        assert!(!tls.is_valid());
        tls.key = "client.key".into();
        assert!(tls.is_valid());
        tls.ca.clear();
        assert!(!tls.is_valid());
    }

    #[test]
    fn store_config_deserializes_camel_case_with_defaults() {
        let cfg: StoreConfig = serde_json::from_str(
            r#"{"driver":"postgres","dsn":"postgres://u@h/db","maxOpenConns":4,
                "params":{"statement_timeout":"5000"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.driver, "postgres");
        assert_eq!(cfg.max_open_conns, 4);
        assert_eq!(cfg.max_idle_conns, DEFAULT_MAX_IDLE_CONNS);
        assert_eq!(cfg.params["statement_timeout"], "5000");
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
    }

    #[test]
    fn unknown_log_format_names_the_setting() {
        let err = "yaml".parse::<LogFormat>().unwrap_err();
        assert_matches!(err, ConfigError::InvalidValue { ref key, ref value, .. } if key == "logFormat" && value == "yaml");
    }

    #[test]
    fn app_config_round_trips_log_format() {
        let cfg: AppConfig = serde_json::from_str(r#"{"logFormat":"json"}"#).unwrap();
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.store, StoreConfig::default());
    }
}
