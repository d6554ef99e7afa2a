//! Embedded single-file engine.
//!
//! The engine has no multi-writer arbitration, so the pool is pinned to one
//! connection and every transaction runs under a process-wide write lock.
//! The [`PragmaCustomizer`] runs on each new connection to set the busy
//! timeout, foreign keys, WAL mode and any configured pragmas.

use std::fmt;
use std::fmt::Write as _;
use std::time::Duration;

use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, Transaction, TransactionBehavior, ffi, params_from_iter};
use strata_core::StoreConfig;
use tracing::debug;

use super::{Executor, PoolBounds, Row, SqlValue, check_param_keys};
use crate::errors::{NativeError, Result, StoreError, TxStage};
use crate::tx::{TxControl, run_in_transaction};

/// DSN selecting a private in-memory database.
pub const MEMORY_DSN: &str = ":memory:";

/// Busy timeout applied to every connection.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Base tables, excluding the engine's internal catalog tables.
pub(crate) const TABLE_NAMES_SQL: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

/// Serializes every embedded-engine transaction in the process.
static WRITE_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Pooled embedded database.
pub struct SqliteEngine {
    pool: ConnectionPool,
    bounds: PoolBounds,
}

impl fmt::Debug for SqliteEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteEngine")
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}

/// Pragmas that run on each new connection.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
    wal: bool,
    pragmas: Vec<(String, String)>,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        let mut batch = format!(
            "PRAGMA busy_timeout = {};\
             PRAGMA foreign_keys = ON;",
            self.busy_timeout_ms
        );
        if self.wal {
            batch.push_str("PRAGMA journal_mode = WAL;");
        }
        for (key, value) in &self.pragmas {
            let _ = write!(batch, "PRAGMA {key} = {value};");
        }
        // Inherent call: on `&mut Connection` method syntax picks `Executor::execute_batch`.
        Connection::execute_batch(conn, &batch)
    }
}

impl SqliteEngine {
    pub(crate) fn open(cfg: &StoreConfig, bounds: PoolBounds) -> std::result::Result<Self, String> {
        check_param_keys(cfg)?;
        if cfg.tls.is_valid() {
            debug!("tls settings ignored by the embedded engine");
        }

        let in_memory = cfg.dsn == MEMORY_DSN;
        let manager = if in_memory {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(&cfg.dsn)
        };
        let customizer = PragmaCustomizer {
            busy_timeout_ms: BUSY_TIMEOUT_MS,
            wal: !in_memory,
            pragmas: cfg.params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };

        let pool = bounds
            .builder()
            .connection_customizer(Box::new(customizer))
            .build_unchecked(manager);
        Ok(Self { pool, bounds })
    }

    pub(crate) fn bounds(&self) -> PoolBounds {
        self.bounds
    }

    pub(crate) fn ping(&self, timeout: Duration) -> std::result::Result<(), NativeError> {
        let conn = self.pool.get_timeout(timeout)?;
        Connection::execute_batch(&conn, "SELECT 1")?;
        Ok(())
    }

    pub(crate) fn transact<T, F>(&self, op: &'static str, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Executor) -> Result<T>,
    {
        let _guard = WRITE_LOCK.lock();
        let mut conn = self.pool.get().map_err(|e| StoreError::SqlTx {
            op,
            stage: TxStage::Begin,
            source: e.into(),
        })?;
        let begun = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(NativeError::from);
        run_in_transaction(op, begun, work)
    }

    pub(crate) fn with_conn<T, F>(&self, op: &'static str, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Executor) -> Result<T>,
    {
        let mut conn = self.pool.get().map_err(|e| StoreError::SqlExecute {
            op,
            source: e.into(),
        })?;
        work(&mut *conn)
    }
}

/// Primary-key or unique constraint violation.
pub(crate) fn is_duplicate(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor plumbing
// ─────────────────────────────────────────────────────────────────────────────

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Self::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(v) => Self::Int(v),
            ValueRef::Real(v) => Self::Real(v),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Bytes(b.to_vec()),
        }
    }
}

fn run_execute(conn: &Connection, sql: &str, params: &[SqlValue]) -> std::result::Result<u64, NativeError> {
    let affected = conn.execute(sql, params_from_iter(params.iter()))?;
    Ok(affected as u64)
}

fn run_query(conn: &Connection, sql: &str, params: &[SqlValue]) -> std::result::Result<Vec<Row>, NativeError> {
    let mut stmt = conn.prepare(sql)?;
    let width = stmt.column_count();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..width)
            .map(|i| row.get_ref(i).map(SqlValue::from))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.push(Row::new(values));
    }
    Ok(out)
}

fn run_batch(conn: &Connection, sql: &str) -> std::result::Result<(), NativeError> {
    conn.execute_batch(sql)?;
    Ok(())
}

impl Executor for Connection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<u64, NativeError> {
        run_execute(self, sql, params)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<Vec<Row>, NativeError> {
        run_query(self, sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> std::result::Result<(), NativeError> {
        run_batch(self, sql)
    }
}

impl Executor for Transaction<'_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<u64, NativeError> {
        run_execute(self, sql, params)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<Vec<Row>, NativeError> {
        run_query(self, sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> std::result::Result<(), NativeError> {
        run_batch(self, sql)
    }
}

impl TxControl for Transaction<'_> {
    fn commit(self) -> std::result::Result<(), NativeError> {
        Transaction::commit(self).map_err(NativeError::from)
    }

    fn rollback(self) -> std::result::Result<(), NativeError> {
        Transaction::rollback(self).map_err(NativeError::from)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use assert_matches::assert_matches;

    use super::*;
    use crate::engine::{Driver, EngineAdapter};
    use crate::errors::ErrorKind;

    const SCHEMA: &str = "CREATE TABLE items (id TEXT PRIMARY KEY, n INTEGER NOT NULL);";

    fn memory_adapter() -> EngineAdapter {
        let adapter = EngineAdapter::open(Driver::Sqlite, &StoreConfig::new("sqlite3", MEMORY_DSN)).unwrap();
        adapter
            .transact("test.schema", |tx| {
                tx.execute_batch(SCHEMA)
                    .map_err(|source| StoreError::SqlExecute { op: "test", source })
            })
            .unwrap();
        adapter
    }

    fn insert(adapter: &EngineAdapter, id: &str, n: i64) -> Result<u64> {
        adapter.transact("test.insert", |tx| {
            tx.execute("INSERT INTO items (id, n) VALUES (?, ?)", &[id.into(), n.into()])
                .map_err(|source| StoreError::SqlExecute { op: "test", source })
        })
    }

    fn count(adapter: &EngineAdapter) -> i64 {
        adapter
            .with_conn("test.count", |conn| {
                conn.query("SELECT COUNT(*) FROM items", &[])
                    .map_err(|source| StoreError::SqlExecute { op: "test", source })
            })
            .unwrap()[0]
            .int(0)
            .unwrap()
    }

    #[test]
    fn file_database_uses_wal_and_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let adapter =
            EngineAdapter::open(Driver::Sqlite, &StoreConfig::new("sqlite3", path.to_str().unwrap())).unwrap();
        let rows = adapter
            .with_conn("test.pragmas", |conn| {
                let mut mode = conn.query("PRAGMA journal_mode", &[]).map_err(|source| StoreError::SqlExecute { op: "test", source })?;
                let mut fks = conn.query("PRAGMA foreign_keys", &[]).map_err(|source| StoreError::SqlExecute { op: "test", source })?;
                Ok((mode.remove(0), fks.remove(0)))
            })
            .unwrap();
        assert_eq!(rows.0.text(0).as_deref(), Some("wal"));
        assert_eq!(rows.1.int(0), Some(1));
    }

    #[test]
    fn configured_pragmas_are_applied() {
        let mut cfg = StoreConfig::new("sqlite3", MEMORY_DSN);
        cfg.params.insert("cache_size".into(), "-4096".into());
        let adapter = EngineAdapter::open(Driver::Sqlite, &cfg).unwrap();
        let rows = adapter
            .with_conn("test.pragmas", |conn| {
                conn.query("PRAGMA cache_size", &[])
                    .map_err(|source| StoreError::SqlExecute { op: "test", source })
            })
            .unwrap();
        assert_eq!(rows[0].int(0), Some(-4096));
    }

    #[test]
    fn pool_is_pinned_to_one_connection() {
        let mut cfg = StoreConfig::new("sqlite3", MEMORY_DSN);
        cfg.max_open_conns = 32;
        let adapter = EngineAdapter::open(Driver::Sqlite, &cfg).unwrap();
        let EngineAdapter::Sqlite(engine) = &adapter else {
            panic!("expected sqlite engine");
        };
        assert_eq!(engine.pool.max_size(), 1);
    }

    #[test]
    fn duplicate_primary_key_is_classified() {
        let adapter = memory_adapter();
        insert(&adapter, "a", 1).unwrap();
        let err = insert(&adapter, "a", 2).unwrap_err();
        let native = err.native().unwrap();
        assert!(adapter.is_duplicate_error(native));
        assert_eq!(count(&adapter), 1);
    }

    #[test]
    fn not_null_violation_is_not_a_duplicate() {
        let adapter = memory_adapter();
        let err = adapter
            .transact("test.insert", |tx| {
                tx.execute("INSERT INTO items (id, n) VALUES (?, ?)", &["a".into(), SqlValue::Null])
                    .map_err(|source| StoreError::SqlExecute { op: "test", source })
            })
            .unwrap_err();
        assert!(!adapter.is_duplicate_error(err.native().unwrap()));
    }

    #[test]
    fn failed_work_leaves_table_unchanged() {
        let adapter = memory_adapter();
        insert(&adapter, "a", 1).unwrap();
        let before = count(&adapter);

        let err = adapter
            .transact::<(), _>("test.partial", |tx| {
                tx.execute("INSERT INTO items (id, n) VALUES ('b', 2)", &[])
                    .map_err(|source| StoreError::SqlExecute { op: "test", source })?;
                Err(StoreError::Internal {
                    op: "test",
                    detail: "abort".into(),
                })
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(count(&adapter), before);
    }

    #[test]
    fn introspection_and_clear() {
        let adapter = memory_adapter();
        insert(&adapter, "a", 1).unwrap();
        assert_eq!(adapter.table_names().unwrap(), vec!["items".to_string()]);
        assert!(adapter.table_exists("items"));
        assert!(!adapter.table_exists("missing"));

        adapter.clear_table("items").unwrap();
        assert_eq!(count(&adapter), 0);
    }

    #[test]
    fn clear_rejects_invalid_table_name() {
        let adapter = memory_adapter();
        let err = adapter.clear_table("items; DROP TABLE items").unwrap_err();
        assert_matches!(err, StoreError::InvalidTableName { .. });
        assert!(adapter.table_exists("items"));
    }

    #[test]
    fn concurrent_writers_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concurrent.db");
        let adapter = Arc::new(
            EngineAdapter::open(Driver::Sqlite, &StoreConfig::new("sqlite3", path.to_str().unwrap())).unwrap(),
        );
        adapter
            .transact("test.schema", |tx| {
                tx.execute_batch(SCHEMA)
                    .map_err(|source| StoreError::SqlExecute { op: "test", source })
            })
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let adapter = Arc::clone(&adapter);
                thread::spawn(move || {
                    for i in 0..10 {
                        insert(&adapter, &format!("t{t}-{i}"), i).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(count(&adapter), 80);
    }

    #[test]
    fn ping_succeeds_on_memory_database() {
        let adapter = memory_adapter();
        adapter.ping(Duration::from_secs(1)).unwrap();
    }
}
