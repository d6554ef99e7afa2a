//! Error types for the storage facade.
//!
//! [`StoreError`] is returned by every facade, migration and entity-store
//! operation. Each variant carries the operation that failed and the
//! identifier it was working on (masked DSN, table, request id, script).
//! Callers match on [`ErrorKind`] through [`StoreError::kind`] or
//! [`StoreError::has_kind`] rather than on engine-specific errors.

use std::fmt;

use thiserror::Error;

/// An error reported by one of the underlying database drivers.
#[derive(Debug, Error)]
pub enum NativeError {
    /// Embedded engine error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// MySQL client error.
    #[error("mysql: {0}")]
    MySql(#[from] mysql::Error),

    /// PostgreSQL client error.
    #[error("postgres: {0}")]
    Postgres(#[from] postgres::Error),

    /// Connection pool checkout failed.
    #[error("pool: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Which step of a transaction failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStage {
    /// Acquiring a connection or issuing `BEGIN`.
    Begin,
    /// Issuing `COMMIT`.
    Commit,
}

impl fmt::Display for TxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => f.write_str("begin"),
            Self::Commit => f.write_str("commit"),
        }
    }
}

/// Normalized error taxonomy shared by all engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The database could not be opened or reached.
    DbOpen,
    /// The driver identifier is not one of the supported engines.
    DbNotSupported,
    /// A schema script failed.
    Migration,
    /// The script directory could not be read.
    ReadDir,
    /// A transaction could not be started, committed or rolled back.
    SqlTx,
    /// A statement could not be constructed.
    SqlBuild,
    /// A statement failed to execute.
    SqlExecute,
    /// A uniqueness constraint was violated.
    SqlDuplicate,
    /// No matching row.
    NoRows,
    /// Unclassified failure.
    Internal,
    /// A dynamic table identifier failed validation.
    InvalidTableName,
}

/// Errors returned by storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening or reaching the database failed.
    #[error("{op}: cannot open database dsn={dsn}: {detail}")]
    DbOpen {
        /// Operation name.
        op: &'static str,
        /// Data-source descriptor with the password masked.
        dsn: String,
        /// Underlying failure.
        detail: String,
    },

    /// Unsupported or misrouted driver identifier.
    #[error("{op}: database driver not supported: {driver}")]
    DbNotSupported {
        /// Operation name.
        op: &'static str,
        /// Requested driver identifier.
        driver: String,
    },

    /// A migration script failed; `source` holds the underlying failure.
    #[error("{op}: migration {target} failed: {source}")]
    Migration {
        /// Operation name.
        op: &'static str,
        /// Script (or migration set) that failed.
        target: String,
        /// Wrapped cause.
        source: Box<StoreError>,
    },

    /// A script directory could not be listed or a script read.
    #[error("{op}: cannot read migration directory {dir}: {detail}")]
    ReadDir {
        /// Operation name.
        op: &'static str,
        /// Directory or file path.
        dir: String,
        /// Underlying failure.
        detail: String,
    },

    /// A transaction failed to begin or commit.
    #[error("{op}: transaction {stage} failed: {source}")]
    SqlTx {
        /// Operation name.
        op: &'static str,
        /// Failing step.
        stage: TxStage,
        /// Driver error.
        source: NativeError,
    },

    /// Rolling back after a failure itself failed.
    #[error("{op}: rollback failed: {source} (rolling back after: {cause})")]
    Rollback {
        /// Operation name.
        op: &'static str,
        /// Rollback driver error.
        source: NativeError,
        /// The failure that triggered the rollback.
        cause: Box<StoreError>,
    },

    /// Statement construction failed.
    #[error("{op}: cannot build statement: {detail}")]
    SqlBuild {
        /// Operation name.
        op: &'static str,
        /// What was wrong.
        detail: String,
    },

    /// Statement execution failed.
    #[error("{op}: statement failed: {source}")]
    SqlExecute {
        /// Operation name.
        op: &'static str,
        /// Driver error.
        source: NativeError,
    },

    /// Uniqueness conflict.
    #[error("{op}: duplicate key id={id}")]
    SqlDuplicate {
        /// Operation name.
        op: &'static str,
        /// Conflicting identifier.
        id: String,
    },

    /// Nothing matched.
    #[error("{op}: no rows id={id}")]
    NoRows {
        /// Operation name.
        op: &'static str,
        /// Identifier looked up.
        id: String,
    },

    /// Unclassified failure.
    #[error("{op}: internal error: {detail}")]
    Internal {
        /// Operation name.
        op: &'static str,
        /// Underlying failure.
        detail: String,
    },

    /// A dynamic table identifier failed validation.
    #[error("{op}: invalid table name {table:?}")]
    InvalidTableName {
        /// Operation name.
        op: &'static str,
        /// Rejected identifier.
        table: String,
    },
}

impl StoreError {
    /// The normalized kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DbOpen { .. } => ErrorKind::DbOpen,
            Self::DbNotSupported { .. } => ErrorKind::DbNotSupported,
            Self::Migration { .. } => ErrorKind::Migration,
            Self::ReadDir { .. } => ErrorKind::ReadDir,
            Self::SqlTx { .. } | Self::Rollback { .. } => ErrorKind::SqlTx,
            Self::SqlBuild { .. } => ErrorKind::SqlBuild,
            Self::SqlExecute { .. } => ErrorKind::SqlExecute,
            Self::SqlDuplicate { .. } => ErrorKind::SqlDuplicate,
            Self::NoRows { .. } => ErrorKind::NoRows,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::InvalidTableName { .. } => ErrorKind::InvalidTableName,
        }
    }

    /// Whether this error, or any error it wraps, is of `kind`.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        if self.kind() == kind {
            return true;
        }
        match self {
            Self::Migration { source, .. } => source.has_kind(kind),
            Self::Rollback { cause, .. } => cause.has_kind(kind),
            _ => false,
        }
    }

    /// The underlying driver error, if this error carries one.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Self::SqlTx { source, .. }
            | Self::Rollback { source, .. }
            | Self::SqlExecute { source, .. } => Some(source),
            Self::Migration { source, .. } => source.native(),
            _ => None,
        }
    }
}

/// Convenience type alias for storage results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
