//! Transaction runner shared by every engine.
//!
//! Engines open a native transaction handle (serializable, read-write) and
//! hand it to [`run_in_transaction`], which owns the commit-or-rollback
//! contract:
//!
//! - begin fails: [`StoreError::SqlTx`] at [`TxStage::Begin`]
//! - unit of work fails: roll back, return the work's error unchanged
//! - rollback fails: [`StoreError::Rollback`] carrying both failures
//! - commit fails: [`StoreError::SqlTx`] at [`TxStage::Commit`]; the consumed
//!   native handle rolls back on drop

use tracing::warn;

use crate::engine::Executor;
use crate::errors::{NativeError, Result, StoreError, TxStage};

/// A native transaction handle that can be finished exactly once.
pub trait TxControl: Executor {
    /// Make the transaction's changes durable.
    fn commit(self) -> std::result::Result<(), NativeError>;

    /// Discard the transaction's changes.
    fn rollback(self) -> std::result::Result<(), NativeError>;
}

/// Run `work` inside the transaction `begun`, committing on success and
/// rolling back on failure.
pub fn run_in_transaction<X, T, F>(
    op: &'static str,
    begun: std::result::Result<X, NativeError>,
    work: F,
) -> Result<T>
where
    X: TxControl,
    F: FnOnce(&mut dyn Executor) -> Result<T>,
{
    let mut tx = begun.map_err(|source| StoreError::SqlTx {
        op,
        stage: TxStage::Begin,
        source,
    })?;

    match work(&mut tx) {
        Ok(value) => {
            tx.commit().map_err(|source| StoreError::SqlTx {
                op,
                stage: TxStage::Commit,
                source,
            })?;
            Ok(value)
        }
        Err(cause) => match tx.rollback() {
            Ok(()) => Err(cause),
            Err(source) => {
                warn!(op, error = %source, cause = %cause, "rollback failed");
                Err(StoreError::Rollback {
                    op,
                    source,
                    cause: Box::new(cause),
                })
            }
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
