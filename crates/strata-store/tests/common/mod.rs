//! Engine-agnostic facade scenarios shared by the integration suites.

#![allow(dead_code)]

use std::time::Duration;

use strata_core::{AuditRecord, StoreConfig};
use strata_store::{ErrorKind, PingPolicy, SqlStore, Store, StoreError};

pub fn fast_ping() -> PingPolicy {
    PingPolicy {
        attempts: 2,
        timeout: Duration::from_secs(2),
        backoff: Duration::from_millis(50),
    }
}

/// Connect, migrate and start from empty tables.
pub fn ready_store(cfg: &StoreConfig) -> SqlStore {
    let mut store = SqlStore::for_driver(&cfg.driver).unwrap().with_ping_policy(fast_ping());
    store.connect(cfg).unwrap();
    store.init_db().unwrap();
    store.clear().unwrap();
    store
}

pub fn create_user(id: &str) -> AuditRecord {
    AuditRecord {
        request_id: id.into(),
        client_agent: "Mozilla/5.0".into(),
        client_address: "192.0.2.10".into(),
        status_code: 201,
        event: "createUser".into(),
        ..AuditRecord::default()
    }
}

fn row_count(store: &SqlStore, id: &str) -> i64 {
    let adapter = store.adapter().unwrap();
    let sql = format!(
        "SELECT COUNT(*) FROM audits WHERE request_id = {}",
        adapter.placeholder().nth(1)
    );
    adapter
        .with_conn("test.count", |conn| {
            conn.query(&sql, &[id.into()])
                .map_err(|source| StoreError::SqlExecute { op: "test.count", source })
        })
        .unwrap()[0]
        .int(0)
        .unwrap()
}

/// Insert r1, read it back, reject the duplicate, keep exactly one row.
pub fn insert_get_duplicate(store: &SqlStore) {
    let audits = store.audits().unwrap();

    let inserted = audits.insert(create_user("r1")).unwrap();
    assert!(inserted.created_at > 0);

    let fetched = audits.get("r1").unwrap();
    assert_eq!(fetched.request_id, "r1");
    assert_eq!(fetched.status_code, 201);
    assert_eq!(fetched.event, "createUser");
    assert_eq!(fetched.created_at, inserted.created_at);

    let err = audits.insert(create_user("r1")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SqlDuplicate);
    assert_eq!(row_count(store, "r1"), 1);
}

pub fn preset_timestamp_preserved(store: &SqlStore) {
    let audits = store.audits().unwrap();
    let mut record = create_user("r-preset");
    record.created_at = 1_600_000_000_000;
    let _ = audits.insert(record).unwrap();
    assert_eq!(audits.get("r-preset").unwrap().created_at, 1_600_000_000_000);
}

pub fn absent_is_no_rows(store: &SqlStore) {
    let err = store.audits().unwrap().get("does-not-exist").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoRows);
}

pub fn clear_then_get_is_no_rows(store: &SqlStore) {
    let audits = store.audits().unwrap();
    let _ = audits.insert(create_user("r-clear")).unwrap();
    store.clear().unwrap();
    assert_eq!(audits.get("r-clear").unwrap_err().kind(), ErrorKind::NoRows);
}

/// A failing unit of work leaves row counts unchanged.
pub fn failed_work_rolls_back(store: &SqlStore) {
    let adapter = store.adapter().unwrap();
    let before = row_count(store, "r-rollback");
    let sql = format!(
        "INSERT INTO audits (request_id, created_at, error) VALUES ({}, 1, '')",
        adapter.placeholder().nth(1)
    );

    let err = adapter
        .transact::<(), _>("test.rollback", |tx| {
            tx.execute(&sql, &["r-rollback".into()])
                .map_err(|source| StoreError::SqlExecute { op: "test.rollback", source })?;
            Err(StoreError::Internal {
                op: "test.rollback",
                detail: "abort".into(),
            })
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(row_count(store, "r-rollback"), before);
}

/// Forward then reverse migrations leave no tables behind.
pub fn migrations_round_trip(store: &SqlStore) {
    let adapter = store.adapter().unwrap();
    let migrator = store.migrator().unwrap();
    let _ = migrator.down().unwrap();
    assert!(!adapter.table_exists("audits"));
    let _ = migrator.up().unwrap();
    assert!(adapter.table_exists("audits"));
}

pub fn run_all(cfg: &StoreConfig) {
    let mut store = ready_store(cfg);
    insert_get_duplicate(&store);
    preset_timestamp_preserved(&store);
    absent_is_no_rows(&store);
    clear_then_get_is_no_rows(&store);
    failed_work_rolls_back(&store);
    migrations_round_trip(&store);
    store.clear().unwrap();
    store.close().unwrap();
}
