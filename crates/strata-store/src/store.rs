//! Storage facade.
//!
//! [`SqlStore`] is bound to one [`Driver`] at construction. Lifecycle:
//! `connect` opens the pool and confirms connectivity with a bounded retry,
//! `init_db` applies the forward migrations and builds the entity stores,
//! `close` releases the pool. Entity stores are reached through accessors
//! such as [`Store::audits`].

use std::fmt;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use strata_core::{AuditRecord, StoreConfig, mask_password};
use tracing::{debug, info, warn};

use crate::audit::SqlAuditStore;
use crate::engine::{Driver, EngineAdapter};
use crate::errors::{Result, StoreError};
use crate::migrate::Migrator;

/// Read/write access to audit records.
pub trait AuditStore: fmt::Debug + Send + Sync {
    /// Delete every audit record.
    fn clear(&self) -> Result<()>;

    /// Fetch the record for `request_id`.
    fn get(&self, request_id: &str) -> Result<AuditRecord>;

    /// Persist `record`, returning it with insert-time fields assigned.
    fn insert(&self, record: AuditRecord) -> Result<AuditRecord>;
}

/// The engine-agnostic storage contract.
pub trait Store {
    /// Open the pool for `cfg` and confirm connectivity.
    fn connect(&mut self, cfg: &StoreConfig) -> Result<()>;

    /// Check connectivity with the facade's retry policy.
    fn ping(&self) -> Result<()>;

    /// Apply forward migrations and build the entity stores.
    fn init_db(&mut self) -> Result<()>;

    /// Empty every table, stopping at the first failure.
    fn clear(&self) -> Result<()>;

    /// Release the pool. A no-op when never connected.
    fn close(&mut self) -> Result<()>;

    /// The config passed to the last `connect`.
    fn config(&self) -> Option<&StoreConfig>;

    /// Audit record store. Available after `init_db`.
    fn audits(&self) -> Result<&dyn AuditStore>;
}

/// Connectivity retry policy for [`Store::ping`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingPolicy {
    /// Number of attempts.
    pub attempts: u32,
    /// Upper bound on each attempt, from checkout to the `SELECT 1` reply.
    pub timeout: Duration,
    /// Sleep between failed attempts.
    pub backoff: Duration,
}

impl Default for PingPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(10),
            backoff: Duration::from_secs(10),
        }
    }
}

/// SQL implementation of [`Store`].
#[derive(Debug)]
pub struct SqlStore {
    driver: Driver,
    ping_policy: PingPolicy,
    config: Option<StoreConfig>,
    adapter: Option<Arc<EngineAdapter>>,
    audits: Option<SqlAuditStore>,
}

impl SqlStore {
    /// Facade bound to `driver`.
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            ping_policy: PingPolicy::default(),
            config: None,
            adapter: None,
            audits: None,
        }
    }

    /// Facade for a driver identifier. Unknown identifiers are rejected.
    pub fn for_driver(driver: &str) -> Result<Self> {
        let driver: Driver = driver.parse().map_err(|_| StoreError::DbNotSupported {
            op: "store.new",
            driver: driver.to_string(),
        })?;
        Ok(Self::new(driver))
    }

    /// Override the connectivity retry policy.
    #[must_use]
    pub fn with_ping_policy(mut self, policy: PingPolicy) -> Self {
        self.ping_policy = policy;
        self
    }

    /// The engine this facade is bound to.
    pub fn driver(&self) -> Driver {
        self.driver
    }

    /// The engine adapter, once connected.
    pub fn adapter(&self) -> Option<&EngineAdapter> {
        self.adapter.as_deref()
    }

    /// A migrator over the connected adapter.
    pub fn migrator(&self) -> Result<Migrator<'_>> {
        Ok(Migrator::new(self.connected("store.migrator")?))
    }

    fn masked_dsn(&self) -> String {
        self.config.as_ref().map(|c| mask_password(&c.dsn)).unwrap_or_default()
    }

    fn connected(&self, op: &'static str) -> Result<&Arc<EngineAdapter>> {
        self.adapter.as_ref().ok_or_else(|| StoreError::DbOpen {
            op,
            dsn: self.masked_dsn(),
            detail: "database not connected".into(),
        })
    }
}

impl Store for SqlStore {
    fn connect(&mut self, cfg: &StoreConfig) -> Result<()> {
        const OP: &str = "store.connect";
        let dsn = mask_password(&cfg.dsn);
        info!(driver = %cfg.driver, %dsn, "connecting to datastore");

        let requested: Driver = cfg.driver.parse().map_err(|_| StoreError::DbNotSupported {
            op: OP,
            driver: cfg.driver.clone(),
        })?;
        if requested != self.driver {
            warn!(requested = %requested, bound = %self.driver, "driver does not match this store");
            return Err(StoreError::DbNotSupported {
                op: OP,
                driver: cfg.driver.clone(),
            });
        }

        self.audits = None;
        self.adapter = None;
        let adapter = Arc::new(EngineAdapter::open(self.driver, cfg)?);
        ping_with_retry(&adapter, self.ping_policy, &dsn)?;

        adapter.post_connect(cfg);
        self.config = Some(cfg.clone());
        self.adapter = Some(adapter);
        info!(driver = %self.driver, %dsn, "connected to datastore");
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        let adapter = self.connected("store.ping")?;
        ping_with_retry(adapter, self.ping_policy, &self.masked_dsn())
    }

    fn init_db(&mut self) -> Result<()> {
        const OP: &str = "store.init_db";
        let adapter = Arc::clone(self.connected(OP)?);

        info!(driver = %self.driver, "starting database migrations");
        let _ = Migrator::new(&adapter).up().map_err(|e| StoreError::Migration {
            op: OP,
            target: format!("{} schema", self.driver),
            source: Box::new(e),
        })?;

        self.audits = Some(SqlAuditStore::new(adapter));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let adapter = self.connected("store.clear")?;
        for table in adapter.table_names()? {
            adapter.clear_table(&table)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.audits = None;
        if self.adapter.take().is_some() {
            info!(driver = %self.driver, dsn = %self.masked_dsn(), "datastore closed");
        }
        Ok(())
    }

    fn config(&self) -> Option<&StoreConfig> {
        self.config.as_ref()
    }

    fn audits(&self) -> Result<&dyn AuditStore> {
        self.audits
            .as_ref()
            .map(|store| store as &dyn AuditStore)
            .ok_or_else(|| StoreError::Internal {
                op: "store.audits",
                detail: "audit store not initialised; call init_db first".into(),
            })
    }
}

/// Ping up to `policy.attempts` times, sleeping `policy.backoff` between
/// failed attempts. Exhaustion is `DbOpen` carrying the last failure.
fn ping_with_retry(adapter: &Arc<EngineAdapter>, policy: PingPolicy, dsn: &str) -> Result<()> {
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match ping_once(adapter, policy.timeout) {
            Ok(()) => {
                debug!(attempt, %dsn, "ping succeeded");
                return Ok(());
            }
            Err(e) => {
                if attempt < attempts {
                    info!(attempt, %dsn, error = %e, retry_in = ?policy.backoff, "ping failed, retrying");
                    thread::sleep(policy.backoff);
                } else {
                    warn!(attempt, %dsn, error = %e, "ping failed, giving up");
                }
                last_error = e;
            }
        }
    }

    Err(StoreError::DbOpen {
        op: "store.ping",
        dsn: dsn.to_string(),
        detail: last_error,
    })
}

/// One ping attempt. Checkout, connection validation and the `SELECT 1`
/// statement together finish within `timeout`, or the attempt fails and
/// the stalled check is abandoned on its worker thread.
fn ping_once(adapter: &Arc<EngineAdapter>, timeout: Duration) -> std::result::Result<(), String> {
    let target = Arc::clone(adapter);
    match with_deadline(timeout, move || target.ping(timeout).map_err(|e| e.to_string())) {
        Some(outcome) => outcome,
        None => Err(format!("no response within {timeout:?}")),
    }
}

/// Run `work` on a worker thread, returning `None` if it has not finished
/// after `timeout`.
fn with_deadline<T, F>(timeout: Duration, work: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new().name("strata-ping".into()).spawn(move || {
        let _ = tx.send(work());
    });
    if let Err(e) = spawned {
        warn!(error = %e, "could not spawn ping worker");
        return None;
    }
    rx.recv_timeout(timeout).ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
