//! SQL-backed audit record store.
//!
//! Shows the pattern every entity store follows: statements come from the
//! builder with the adapter's placeholder style, writes run inside
//! `EngineAdapter::transact`, and the one engine-specific inspection is the
//! duplicate-key check.

use std::sync::Arc;

use strata_core::AuditRecord;
use tracing::debug;

use crate::engine::{EngineAdapter, Row, SqlValue};
use crate::errors::{Result, StoreError};
use crate::sql::{Insert, Select};
use crate::store::AuditStore;

/// Table holding audit records.
pub const AUDITS_TABLE: &str = "audits";

const COLUMNS: [&str; 7] = [
    "request_id",
    "created_at",
    "client_agent",
    "client_address",
    "status_code",
    "error",
    "event",
];

/// Audit records persisted through an [`EngineAdapter`].
#[derive(Clone, Debug)]
pub struct SqlAuditStore {
    adapter: Arc<EngineAdapter>,
}

impl SqlAuditStore {
    /// Store bound to `adapter`.
    pub fn new(adapter: Arc<EngineAdapter>) -> Self {
        Self { adapter }
    }
}

fn record_from_row(row: &Row) -> AuditRecord {
    AuditRecord {
        request_id: row.text(0).unwrap_or_default(),
        created_at: row.int(1).unwrap_or_default(),
        client_agent: row.text(2).unwrap_or_default(),
        client_address: row.text(3).unwrap_or_default(),
        status_code: row.int(4).and_then(|v| i32::try_from(v).ok()).unwrap_or_default(),
        error: row.text(5).unwrap_or_default(),
        event: row.text(6).unwrap_or_default(),
    }
}

impl AuditStore for SqlAuditStore {
    fn clear(&self) -> Result<()> {
        self.adapter.clear_table(AUDITS_TABLE)
    }

    fn get(&self, request_id: &str) -> Result<AuditRecord> {
        const OP: &str = "audits.get";
        let (sql, params) = Select::columns(&COLUMNS)
            .from(AUDITS_TABLE)
            .where_eq("request_id", request_id)
            .order_by("created_at ASC")
            .build(self.adapter.placeholder())?;

        let rows = self
            .adapter
            .with_conn(OP, |conn| {
                conn.query(&sql, &params)
                    .map_err(|source| StoreError::SqlExecute { op: OP, source })
            })
            .map_err(|e| StoreError::Internal {
                op: OP,
                detail: format!("id={request_id}: {e}"),
            })?;

        rows.first().map(record_from_row).ok_or_else(|| StoreError::NoRows {
            op: OP,
            id: request_id.to_string(),
        })
    }

    fn insert(&self, mut record: AuditRecord) -> Result<AuditRecord> {
        const OP: &str = "audits.insert";
        record.pre_save();

        let (sql, params) = Insert::into(AUDITS_TABLE)
            .columns(&COLUMNS)
            .values(vec![
                SqlValue::from(record.request_id.as_str()),
                SqlValue::Int(record.created_at),
                SqlValue::from(record.client_agent.as_str()),
                SqlValue::from(record.client_address.as_str()),
                SqlValue::from(record.status_code),
                SqlValue::from(record.error.as_str()),
                SqlValue::from(record.event.as_str()),
            ])
            .build(self.adapter.placeholder())?;

        let adapter = &self.adapter;
        let id = record.request_id.as_str();
        adapter.transact(OP, |tx| {
            let affected = tx.execute(&sql, &params).map_err(|source| {
                if adapter.is_duplicate_error(&source) {
                    StoreError::SqlDuplicate {
                        op: OP,
                        id: id.to_string(),
                    }
                } else {
                    StoreError::SqlExecute { op: OP, source }
                }
            })?;
            if affected == 0 {
                return Err(StoreError::NoRows {
                    op: OP,
                    id: id.to_string(),
                });
            }
            Ok(())
        })?;

        debug!(request_id = %record.request_id, created_at = record.created_at, "audit record inserted");
        Ok(record)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
