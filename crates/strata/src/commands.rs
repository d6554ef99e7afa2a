//! Subcommand handlers. Each one connects a fresh facade, does its work and
//! closes the pool again.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use strata_core::{AppConfig, AuditRecord, StoreConfig, mask_password};
use strata_store::{ScriptSource, SqlStore, Store};
use tracing::info;

use crate::cli::{AuditCommand, Command, InsertArgs, MigrateCommand};

/// Dispatch `command`, writing its output to `out`.
pub fn run<W: Write>(command: &Command, config: &AppConfig, out: &mut W) -> Result<()> {
    match command {
        Command::Ping => ping(&config.store, out),
        Command::Init => init(&config.store, out),
        Command::Migrate { direction } => migrate(&config.store, direction, out),
        Command::Clear => clear(&config.store, out),
        Command::Audit { command } => audit(&config.store, command, out),
        Command::Config => print_config(config, out),
    }
}

fn connect(cfg: &StoreConfig) -> Result<SqlStore> {
    let mut store = SqlStore::for_driver(&cfg.driver)?;
    store
        .connect(cfg)
        .with_context(|| format!("Failed to connect to {}", mask_password(&cfg.dsn)))?;
    Ok(store)
}

fn ping<W: Write>(cfg: &StoreConfig, out: &mut W) -> Result<()> {
    let mut store = connect(cfg)?;
    store.ping()?;
    store.close()?;
    writeln!(out, "ok")?;
    Ok(())
}

fn init<W: Write>(cfg: &StoreConfig, out: &mut W) -> Result<()> {
    let mut store = connect(cfg)?;
    store.init_db().context("Failed to initialise schema")?;
    store.close()?;
    writeln!(out, "schema ready")?;
    Ok(())
}

fn migrate<W: Write>(cfg: &StoreConfig, direction: &MigrateCommand, out: &mut W) -> Result<()> {
    let source = |dir: &Option<PathBuf>| dir.clone().map_or(ScriptSource::Bundled, ScriptSource::Directory);

    let mut store = connect(cfg)?;
    let applied = {
        let migrator = store.migrator()?;
        match direction {
            MigrateCommand::Up { dir } => migrator.with_source(source(dir)).up()?,
            MigrateCommand::Down { dir } => migrator.with_source(source(dir)).down()?,
        }
    };
    store.close()?;
    info!(applied, "migration command finished");
    writeln!(out, "applied {applied} script(s)")?;
    Ok(())
}

fn clear<W: Write>(cfg: &StoreConfig, out: &mut W) -> Result<()> {
    let mut store = connect(cfg)?;
    store.clear()?;
    store.close()?;
    writeln!(out, "cleared")?;
    Ok(())
}

fn audit<W: Write>(cfg: &StoreConfig, command: &AuditCommand, out: &mut W) -> Result<()> {
    let mut store = connect(cfg)?;
    store.init_db().context("Failed to initialise schema")?;

    let record = match command {
        AuditCommand::Get { id } => store.audits()?.get(id)?,
        AuditCommand::Insert(args) => store.audits()?.insert(record_from_args(args))?,
    };
    store.close()?;

    writeln!(out, "{}", serde_json::to_string_pretty(&record)?)?;
    Ok(())
}

fn record_from_args(args: &InsertArgs) -> AuditRecord {
    AuditRecord {
        request_id: args.request_id.clone(),
        created_at: 0,
        client_agent: args.client_agent.clone(),
        client_address: args.client_address.clone(),
        status_code: args.status_code,
        error: args.error.clone(),
        event: args.event.clone(),
    }
}

fn print_config<W: Write>(config: &AppConfig, out: &mut W) -> Result<()> {
    let mut shown = config.clone();
    shown.store.dsn = mask_password(&shown.store.dsn);
    writeln!(out, "{}", serde_json::to_string_pretty(&shown)?)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
