//! # strata-store
//!
//! A storage facade over three interchangeable SQL engines: the embedded
//! single-file engine (`sqlite3`), MySQL and PostgreSQL.
//!
//! - **Engines**: [`EngineAdapter`] dispatches placeholder style, pool
//!   tuning, transactions, introspection, table clearing and duplicate-key
//!   classification per engine
//! - **Transactions**: serializable, read-write, commit-or-rollback; the
//!   embedded engine additionally serializes writers behind a process lock
//! - **Migrations**: ordered per-engine scripts, bundled or from a directory
//! - **Facade**: [`SqlStore`] implements [`Store`] (connect, ping with
//!   retry, init, clear, close) and exposes entity stores like [`AuditStore`]
//! - **Errors**: [`StoreError`] with a normalized [`ErrorKind`]
//!
//! All operations are synchronous and may block on I/O.

#![deny(unsafe_code)]

pub mod audit;
pub mod engine;
pub mod errors;
pub mod migrate;
pub mod sql;
pub mod store;
pub mod tx;

pub use audit::SqlAuditStore;
pub use engine::{Driver, EngineAdapter, Executor, Placeholder, PoolBounds, Row, SqlValue};
pub use errors::{ErrorKind, NativeError, Result, StoreError, TxStage};
pub use migrate::{Direction, Migrator, Script, ScriptSource};
pub use store::{AuditStore, PingPolicy, SqlStore, Store};
