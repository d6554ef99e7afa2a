//! Per-engine capability dispatch.
//!
//! [`EngineAdapter`] is selected once from a [`Driver`] and never changes for
//! the lifetime of a facade. Each variant owns an `r2d2` pool and implements
//! the same capability set: placeholder style, pre/post-connect tuning,
//! transactional execution, table introspection, table clearing and
//! duplicate-key classification.
//!
//! Engine-neutral plumbing lives here too: [`SqlValue`], [`Row`] and the
//! object-safe [`Executor`] trait that pooled connections and open
//! transactions of every engine implement.

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use r2d2::{ManageConnection, Pool};
use strata_core::config::DEFAULT_MAX_OPEN_CONNS;
use strata_core::{StoreConfig, mask_password};
use tracing::{debug, info, warn};

use crate::errors::{NativeError, Result, StoreError};
use crate::sql::{is_valid_param_key, is_valid_table_name};

pub use self::mysql::MySqlEngine;
pub use self::postgres::PostgresEngine;
pub use self::sqlite::SqliteEngine;

/// How long a pool checkout waits for a connection.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle connections above `min_idle` are closed after this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

/// Supported database engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Driver {
    /// Embedded single-file engine (`sqlite3`).
    Sqlite,
    /// MySQL server (`mysql`).
    MySql,
    /// PostgreSQL server (`postgres`, alias `pgx`).
    Postgres,
}

impl Driver {
    /// Every supported driver.
    pub const ALL: [Self; 3] = [Self::Sqlite, Self::MySql, Self::Postgres];

    /// Canonical identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite3",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    /// Directory name of this engine's bundled schema scripts.
    pub fn script_dir(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    /// Statement placeholder style.
    pub fn placeholder(self) -> Placeholder {
        match self {
            Self::Sqlite | Self::MySql => Placeholder::Question,
            Self::Postgres => Placeholder::Dollar,
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Driver {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sqlite3" => Ok(Self::Sqlite),
            "mysql" => Ok(Self::MySql),
            "postgres" | "pgx" => Ok(Self::Postgres),
            other => Err(StoreError::DbNotSupported {
                op: "driver.parse",
                driver: other.to_string(),
            }),
        }
    }
}

/// Positional parameter syntax.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placeholder {
    /// `?`
    Question,
    /// `$1`, `$2`, ...
    Dollar,
}

impl Placeholder {
    /// Placeholder for the 1-based parameter position `n`.
    pub fn nth(self, n: usize) -> String {
        match self {
            Self::Question => "?".to_string(),
            Self::Dollar => format!("${n}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Values, rows, executors
// ─────────────────────────────────────────────────────────────────────────────

/// An engine-neutral statement parameter or column value.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// Any integer column.
    Int(i64),
    /// Any floating-point column.
    Real(f64),
    /// Character data.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One result row, columns in select order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    /// Wrap decoded column values.
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw column value.
    pub fn get(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    /// Column as text. `None` for `NULL` or a missing column.
    pub fn text(&self, idx: usize) -> Option<String> {
        match self.values.get(idx)? {
            SqlValue::Null => None,
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            SqlValue::Int(v) => Some(v.to_string()),
            SqlValue::Real(v) => Some(v.to_string()),
        }
    }

    /// Column as an integer. Text holding a number is parsed.
    pub fn int(&self, idx: usize) -> Option<i64> {
        match self.values.get(idx)? {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            SqlValue::Null | SqlValue::Real(_) => None,
        }
    }
}

/// Runs statements on a connection or inside an open transaction.
pub trait Executor {
    /// Execute one statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<u64, NativeError>;

    /// Run a query and collect every row.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<Vec<Row>, NativeError>;

    /// Execute one or more `;`-separated statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> std::result::Result<(), NativeError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Pool bounds
// ─────────────────────────────────────────────────────────────────────────────

/// Effective pool sizing, decided before the pool is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolBounds {
    /// Maximum open connections.
    pub max_open: u32,
    /// Idle connections kept warm.
    pub min_idle: u32,
    /// Connection lifetime bound.
    pub max_lifetime: Option<Duration>,
    /// Idle connection reap time.
    pub idle_timeout: Option<Duration>,
}

impl PoolBounds {
    /// Configured bounds, applied as-is. Zero max open means the default.
    pub fn from_config(cfg: &StoreConfig) -> Self {
        let max_open = if cfg.max_open_conns == 0 {
            DEFAULT_MAX_OPEN_CONNS
        } else {
            cfg.max_open_conns
        };
        Self {
            max_open,
            min_idle: cfg.max_idle_conns.min(max_open),
            max_lifetime: cfg.conn_max_lifetime(),
            idle_timeout: Some(IDLE_TIMEOUT),
        }
    }

    /// One connection, never recycled.
    pub fn single() -> Self {
        Self {
            max_open: 1,
            min_idle: 1,
            max_lifetime: None,
            idle_timeout: None,
        }
    }

    /// An `r2d2` builder carrying these bounds and a tracing error handler.
    pub(crate) fn builder<M>(&self) -> r2d2::Builder<M>
    where
        M: ManageConnection,
        M::Error: fmt::Display,
    {
        Pool::builder()
            .max_size(self.max_open)
            .min_idle(Some(self.min_idle))
            .max_lifetime(self.max_lifetime)
            .idle_timeout(self.idle_timeout)
            .connection_timeout(CONNECTION_TIMEOUT)
            .error_handler(Box::new(TracingErrorHandler))
    }
}

/// Reports background pool errors through `tracing`.
#[derive(Debug)]
pub(crate) struct TracingErrorHandler;

impl<E: fmt::Display> r2d2::HandleError<E> for TracingErrorHandler {
    fn handle_error(&self, error: E) {
        warn!(error = %error, "connection pool error");
    }
}

/// Reject parameter-bag keys that are not plain identifiers.
pub(crate) fn check_param_keys(cfg: &StoreConfig) -> std::result::Result<(), String> {
    match cfg.params.keys().find(|k| !is_valid_param_key(k)) {
        Some(key) => Err(format!("invalid parameter name {key:?}")),
        None => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Adapter
// ─────────────────────────────────────────────────────────────────────────────

/// The per-engine implementation of the storage capability set.
#[derive(Debug)]
pub enum EngineAdapter {
    /// Embedded single-writer engine.
    Sqlite(SqliteEngine),
    /// MySQL server.
    MySql(MySqlEngine),
    /// PostgreSQL server.
    Postgres(PostgresEngine),
}

impl EngineAdapter {
    /// Build the engine's connection pool without dialing.
    ///
    /// Unreachable servers surface on the first checkout (see `ping`).
    pub fn open(driver: Driver, cfg: &StoreConfig) -> Result<Self> {
        let bounds = Self::pre_connect(driver, cfg);
        let opened = match driver {
            Driver::Sqlite => SqliteEngine::open(cfg, bounds).map(Self::Sqlite),
            Driver::MySql => MySqlEngine::open(cfg, bounds).map(Self::MySql),
            Driver::Postgres => PostgresEngine::open(cfg, bounds).map(Self::Postgres),
        };
        opened.map_err(|detail| StoreError::DbOpen {
            op: "adapter.open",
            dsn: mask_password(&cfg.dsn),
            detail,
        })
    }

    /// Pool bounds for `driver`: the single-writer engine is forced to one
    /// connection, server engines take the configured bounds.
    pub fn pre_connect(driver: Driver, cfg: &StoreConfig) -> PoolBounds {
        match driver {
            Driver::Sqlite => PoolBounds::single(),
            Driver::MySql | Driver::Postgres => PoolBounds::from_config(cfg),
        }
    }

    /// Log the effective pool tuning once connectivity is confirmed.
    pub fn post_connect(&self, cfg: &StoreConfig) {
        let bounds = self.bounds();
        if self.driver() == Driver::Sqlite && (cfg.max_open_conns != 1 || cfg.max_idle_conns != 1) {
            debug!(
                driver = %self.driver(),
                configured_max_open = cfg.max_open_conns,
                configured_max_idle = cfg.max_idle_conns,
                "pool bounds overridden to a single connection"
            );
        }
        info!(
            driver = %self.driver(),
            max_open = bounds.max_open,
            min_idle = bounds.min_idle,
            max_lifetime_secs = bounds.max_lifetime.map(|d| d.as_secs()),
            "connection pool ready"
        );
    }

    /// Engine identifier.
    pub fn driver(&self) -> Driver {
        match self {
            Self::Sqlite(_) => Driver::Sqlite,
            Self::MySql(_) => Driver::MySql,
            Self::Postgres(_) => Driver::Postgres,
        }
    }

    /// Statement placeholder style.
    pub fn placeholder(&self) -> Placeholder {
        self.driver().placeholder()
    }

    /// Effective pool bounds.
    pub fn bounds(&self) -> PoolBounds {
        match self {
            Self::Sqlite(e) => e.bounds(),
            Self::MySql(e) => e.bounds(),
            Self::Postgres(e) => e.bounds(),
        }
    }

    /// One connectivity check: checkout bounded by `timeout`, then `SELECT 1`.
    pub fn ping(&self, timeout: Duration) -> std::result::Result<(), NativeError> {
        match self {
            Self::Sqlite(e) => e.ping(timeout),
            Self::MySql(e) => e.ping(timeout),
            Self::Postgres(e) => e.ping(timeout),
        }
    }

    /// Run `work` inside one serializable read-write transaction.
    ///
    /// The embedded engine holds its process-wide write lock for the whole
    /// transaction.
    pub fn transact<T, F>(&self, op: &'static str, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Executor) -> Result<T>,
    {
        match self {
            Self::Sqlite(e) => e.transact(op, work),
            Self::MySql(e) => e.transact(op, work),
            Self::Postgres(e) => e.transact(op, work),
        }
    }

    /// Run `work` on a pooled connection outside any explicit transaction.
    pub fn with_conn<T, F>(&self, op: &'static str, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Executor) -> Result<T>,
    {
        match self {
            Self::Sqlite(e) => e.with_conn(op, work),
            Self::MySql(e) => e.with_conn(op, work),
            Self::Postgres(e) => e.with_conn(op, work),
        }
    }

    /// Names of every base table in the current database/schema.
    pub fn table_names(&self) -> Result<Vec<String>> {
        const OP: &str = "adapter.table_names";
        let sql = match self {
            Self::Sqlite(_) => sqlite::TABLE_NAMES_SQL,
            Self::MySql(_) => mysql::TABLE_NAMES_SQL,
            Self::Postgres(_) => postgres::TABLE_NAMES_SQL,
        };
        let rows = self.with_conn(OP, |conn| {
            conn.query(sql, &[])
                .map_err(|source| StoreError::SqlExecute { op: OP, source })
        })?;
        Ok(rows.iter().filter_map(|row| row.text(0)).collect())
    }

    /// Whether `table` exists. Any introspection failure reads as absent.
    pub fn table_exists(&self, table: &str) -> bool {
        match self.table_names() {
            Ok(names) => names.iter().any(|name| name == table),
            Err(e) => {
                debug!(table, error = %e, "table introspection failed");
                false
            }
        }
    }

    /// Remove every row of `table`.
    pub fn clear_table(&self, table: &str) -> Result<()> {
        const OP: &str = "adapter.clear_table";
        if !is_valid_table_name(table) {
            return Err(StoreError::InvalidTableName {
                op: OP,
                table: table.to_string(),
            });
        }
        let sql = match self {
            Self::Sqlite(_) => format!("DELETE FROM {table}"),
            Self::MySql(_) | Self::Postgres(_) => format!("TRUNCATE TABLE {table}"),
        };
        self.transact(OP, |tx| {
            tx.execute_batch(&sql)
                .map_err(|source| StoreError::SqlExecute { op: OP, source })
        })?;
        debug!(driver = %self.driver(), table, "table cleared");
        Ok(())
    }

    /// Whether `err` is this engine's native duplicate-key violation.
    ///
    /// Errors from another engine, pool errors and any unrecognized shape
    /// return `false`.
    pub fn is_duplicate_error(&self, err: &NativeError) -> bool {
        match (self, err) {
            (Self::Sqlite(_), NativeError::Sqlite(e)) => sqlite::is_duplicate(e),
            (Self::MySql(_), NativeError::MySql(e)) => mysql::is_duplicate(e),
            (Self::Postgres(_), NativeError::Postgres(e)) => postgres::is_duplicate(e),
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn driver_parses_supported_identifiers() {
        assert_eq!("sqlite3".parse::<Driver>().unwrap(), Driver::Sqlite);
        assert_eq!("mysql".parse::<Driver>().unwrap(), Driver::MySql);
        assert_eq!("postgres".parse::<Driver>().unwrap(), Driver::Postgres);
        assert_eq!("pgx".parse::<Driver>().unwrap(), Driver::Postgres);
    }

    #[test]
    fn driver_rejects_unknown_identifier() {
        let err = "oracle".parse::<Driver>().unwrap_err();
        assert_matches!(err, StoreError::DbNotSupported { ref driver, .. } if driver == "oracle");
    }

    #[test]
    fn placeholders_per_engine() {
        assert_eq!(Driver::Sqlite.placeholder().nth(3), "?");
        assert_eq!(Driver::MySql.placeholder().nth(3), "?");
        assert_eq!(Driver::Postgres.placeholder().nth(3), "$3");
    }

    #[test]
    fn row_accessors_convert() {
        let row = Row::new(vec![
            SqlValue::Text("r1".into()),
            SqlValue::Int(201),
            SqlValue::Null,
            SqlValue::Bytes(b"42".to_vec()),
        ]);
        assert_eq!(row.len(), 4);
        assert_eq!(row.text(0).as_deref(), Some("r1"));
        assert_eq!(row.int(1), Some(201));
        assert_eq!(row.text(1).as_deref(), Some("201"));
        assert_eq!(row.text(2), None);
        assert_eq!(row.int(3), Some(42));
        assert_eq!(row.text(9), None);
    }

    #[test]
    fn pool_bounds_from_config() {
        let mut cfg = StoreConfig::new("mysql", "mysql://localhost/strata");
        cfg.max_open_conns = 4;
        cfg.max_idle_conns = 8;
        cfg.conn_max_lifetime_secs = 30;
        let bounds = PoolBounds::from_config(&cfg);
        assert_eq!(bounds.max_open, 4);
        assert_eq!(bounds.min_idle, 4);
        assert_eq!(bounds.max_lifetime, Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_max_open_uses_default() {
        let mut cfg = StoreConfig::default();
        cfg.max_open_conns = 0;
        assert_eq!(PoolBounds::from_config(&cfg).max_open, DEFAULT_MAX_OPEN_CONNS);
    }

    #[test]
    fn sqlite_is_forced_to_single_connection() {
        let mut cfg = StoreConfig::new("sqlite3", ":memory:");
        cfg.max_open_conns = 50;
        cfg.max_idle_conns = 10;
        assert_eq!(EngineAdapter::pre_connect(Driver::Sqlite, &cfg), PoolBounds::single());
        assert_eq!(EngineAdapter::pre_connect(Driver::Postgres, &cfg).max_open, 50);
    }

    #[test]
    fn duplicate_check_fails_closed() {
        let adapter = EngineAdapter::open(Driver::Sqlite, &StoreConfig::new("sqlite3", ":memory:")).unwrap();
        let not_a_constraint = NativeError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(!adapter.is_duplicate_error(&not_a_constraint));
    }

    #[test]
    fn invalid_param_key_fails_open() {
        let mut cfg = StoreConfig::new("sqlite3", ":memory:");
        let _ = cfg.params.insert("cache_size; DROP TABLE x".into(), "1".into());
        let err = EngineAdapter::open(Driver::Sqlite, &cfg).unwrap_err();
        assert_matches!(err, StoreError::DbOpen { .. });
    }
}
