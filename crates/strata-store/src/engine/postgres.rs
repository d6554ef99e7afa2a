//! PostgreSQL server engine.
//!
//! Uses `r2d2_postgres` over the synchronous `postgres` client with a
//! `native-tls` connector. The parameter bag becomes `-c key=value` startup
//! options. Statements use `$n` placeholders.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use bytes::BytesMut;
use native_tls::{Certificate, Identity, TlsConnector};
use postgres::error::SqlState;
use postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use postgres::{Client, Config, GenericClient, IsolationLevel, Transaction};
use postgres_native_tls::MakeTlsConnector;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use strata_core::{StoreConfig, TlsConfig};

use super::{CONNECTION_TIMEOUT, Executor, PoolBounds, Row, SqlValue, check_param_keys};
use crate::errors::{NativeError, Result, StoreError, TxStage};
use crate::tx::{TxControl, run_in_transaction};

/// Base tables of the session's current schema.
pub(crate) const TABLE_NAMES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' ORDER BY table_name";

type Manager = PostgresConnectionManager<MakeTlsConnector>;

/// Pooled PostgreSQL database.
pub struct PostgresEngine {
    pool: Pool<Manager>,
    bounds: PoolBounds,
}

impl fmt::Debug for PostgresEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresEngine")
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}

impl PostgresEngine {
    pub(crate) fn open(cfg: &StoreConfig, bounds: PoolBounds) -> std::result::Result<Self, String> {
        check_param_keys(cfg)?;
        let mut config: Config = cfg.dsn.parse().map_err(|e: postgres::Error| e.to_string())?;
        let _ = config.connect_timeout(CONNECTION_TIMEOUT);

        if !cfg.params.is_empty() {
            let mut options: Vec<String> = config.get_options().map(str::to_string).into_iter().collect();
            options.extend(cfg.params.iter().map(|(k, v)| format!("-c {k}={v}")));
            let _ = config.options(&options.join(" "));
        }

        let tls = MakeTlsConnector::new(tls_connector(&cfg.tls)?);
        let pool = bounds.builder().build_unchecked(Manager::new(config, tls));
        Ok(Self { pool, bounds })
    }

    pub(crate) fn bounds(&self) -> PoolBounds {
        self.bounds
    }

    pub(crate) fn ping(&self, timeout: Duration) -> std::result::Result<(), NativeError> {
        let mut conn = self.pool.get_timeout(timeout)?;
        conn.batch_execute("SELECT 1")?;
        Ok(())
    }

    pub(crate) fn transact<T, F>(&self, op: &'static str, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Executor) -> Result<T>,
    {
        let mut conn = self.pool.get().map_err(|e| StoreError::SqlTx {
            op,
            stage: TxStage::Begin,
            source: e.into(),
        })?;
        let begun = conn
            .build_transaction()
            .isolation_level(IsolationLevel::Serializable)
            .read_only(false)
            .start()
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

/// Build the TLS connector, loading CA and PKCS#8 client identity when the
/// TLS material is complete.
fn tls_connector(tls: &TlsConfig) -> std::result::Result<TlsConnector, String> {
    let mut builder = TlsConnector::builder();
    if tls.is_valid() {
        let read = |path: &str| std::fs::read(path).map_err(|e| format!("read {path}: {e}"));
        let ca = Certificate::from_pem(&read(&tls.ca)?).map_err(|e| format!("ca {}: {e}", tls.ca))?;
        let identity = Identity::from_pkcs8(&read(&tls.cert)?, &read(&tls.key)?)
            .map_err(|e| format!("client identity {}: {e}", tls.cert))?;
        let _ = builder.add_root_certificate(ca).identity(identity);
    }
    builder.build().map_err(|e| e.to_string())
}

/// `unique_violation` (SQLSTATE 23505).
pub(crate) fn is_duplicate(err: &postgres::Error) -> bool {
    err.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor plumbing
// ─────────────────────────────────────────────────────────────────────────────

impl ToSql for SqlValue {
    #[allow(clippy::cast_possible_truncation)]
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Int(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    (*v != 0).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Self::Real(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Self::Text(s) => s.as_str().to_sql(ty, out),
            Self::Bytes(b) => b.as_slice().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn decode(row: &postgres::Row, idx: usize) -> std::result::Result<SqlValue, postgres::Error> {
    let ty = row.columns()[idx].type_();
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map(|v| SqlValue::Int(i64::from(v)))
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?.map(|v| SqlValue::Int(i64::from(v)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?.map(|v| SqlValue::Int(i64::from(v)))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Int)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?.map(|v| SqlValue::Real(f64::from(v)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::Real)
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::Bytes)
    } else {
        row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text)
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

fn param_refs(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn run_execute<C: GenericClient>(client: &mut C, sql: &str, params: &[SqlValue]) -> std::result::Result<u64, NativeError> {
    Ok(client.execute(sql, &param_refs(params))?)
}

fn run_query<C: GenericClient>(
    client: &mut C,
    sql: &str,
    params: &[SqlValue],
) -> std::result::Result<Vec<Row>, NativeError> {
    let rows = client.query(sql, &param_refs(params))?;
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let values = (0..row.len())
            .map(|i| decode(row, i))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        out.push(Row::new(values));
    }
    Ok(out)
}

fn run_batch<C: GenericClient>(client: &mut C, sql: &str) -> std::result::Result<(), NativeError> {
    client.batch_execute(sql)?;
    Ok(())
}

impl Executor for Client {
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
