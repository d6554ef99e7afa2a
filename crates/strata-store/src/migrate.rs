//! Schema migration runner.
//!
//! Scripts are per-engine raw SQL named `NNNNNN_description_{up,down}.sql`.
//! The bundled set is embedded at compile time via [`include_str!`]; an
//! operator may point the runner at a directory laid out the same way
//! (`<dir>/<engine>/*.sql`).
//!
//! Both directions run their scripts in ascending filename order. Each
//! script runs in its own transaction through the adapter. The first failure aborts the run; there is no version table and
//! no resume, so scripts are written to be idempotent.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::engine::{Driver, EngineAdapter};
use crate::errors::{Result, StoreError};

/// Which half of each script pair to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Forward (`*_up.sql`).
    Up,
    /// Reverse (`*_down.sql`).
    Down,
}

impl Direction {
    fn suffix(self) -> &'static str {
        match self {
            Self::Up => "up.sql",
            Self::Down => "down.sql",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Where scripts are loaded from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ScriptSource {
    /// Scripts compiled into the binary.
    #[default]
    Bundled,
    /// `<dir>/<engine>/*.sql` on disk.
    Directory(PathBuf),
}

/// One schema script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Script {
    /// File name, used for ordering and error reporting.
    pub name: String,
    /// Raw SQL in the engine's dialect.
    pub sql: Cow<'static, str>,
}

struct BundledScript {
    driver: Driver,
    name: &'static str,
    sql: &'static str,
}

macro_rules! bundled {
    ($driver:expr, $dir:literal, $name:literal) => {
        BundledScript {
            driver: $driver,
            name: $name,
            sql: include_str!(concat!("../migrations/", $dir, "/", $name)),
        }
    };
}

const BUNDLED: &[BundledScript] = &[
    bundled!(Driver::Sqlite, "sqlite", "000001_create_audits_up.sql"),
    bundled!(Driver::Sqlite, "sqlite", "000001_create_audits_down.sql"),
    bundled!(Driver::MySql, "mysql", "000001_create_audits_up.sql"),
    bundled!(Driver::MySql, "mysql", "000001_create_audits_down.sql"),
    bundled!(Driver::Postgres, "postgres", "000001_create_audits_up.sql"),
    bundled!(Driver::Postgres, "postgres", "000001_create_audits_down.sql"),
];

fn ordered(mut scripts: Vec<Script>) -> Vec<Script> {
    scripts.sort_by(|a, b| a.name.cmp(&b.name));
    scripts
}

/// Bundled scripts for a driver identifier, in application order.
pub fn bundled_scripts(driver: &str, direction: Direction) -> Result<Vec<Script>> {
    let driver: Driver = driver.parse().map_err(|_| StoreError::DbNotSupported {
        op: "migrate.bundled",
        driver: driver.to_string(),
    })?;
    let scripts = BUNDLED
        .iter()
        .filter(|s| s.driver == driver && s.name.ends_with(direction.suffix()))
        .map(|s| Script {
            name: s.name.to_string(),
            sql: Cow::Borrowed(s.sql),
        })
        .collect();
    Ok(ordered(scripts))
}

/// Scripts from `<root>/<engine>/`, in application order.
pub fn directory_scripts(root: &Path, driver: Driver, direction: Direction) -> Result<Vec<Script>> {
    const OP: &str = "migrate.directory";
    let dir = root.join(driver.script_dir());
    let read_dir_err = |path: &Path, e: std::io::Error| StoreError::ReadDir {
        op: OP,
        dir: path.display().to_string(),
        detail: e.to_string(),
    };

    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(&dir).map_err(|e| read_dir_err(&dir, e))? {
        let path = entry.map_err(|e| read_dir_err(&dir, e))?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_file() || !name.ends_with(direction.suffix()) {
            continue;
        }
        let sql = std::fs::read_to_string(&path).map_err(|e| read_dir_err(&path, e))?;
        scripts.push(Script {
            name: name.to_string(),
            sql: Cow::Owned(sql),
        });
    }
    debug!(dir = %dir.display(), count = scripts.len(), %direction, "loaded migration scripts");
    Ok(ordered(scripts))
}

/// Applies schema scripts through an adapter.
#[derive(Debug)]
pub struct Migrator<'a> {
    adapter: &'a EngineAdapter,
    source: ScriptSource,
}

impl<'a> Migrator<'a> {
    /// Migrator over the bundled scripts for the adapter's engine.
    pub fn new(adapter: &'a EngineAdapter) -> Self {
        Self {
            adapter,
            source: ScriptSource::Bundled,
        }
    }

    /// Use a different script source.
    #[must_use]
    pub fn with_source(mut self, source: ScriptSource) -> Self {
        self.source = source;
        self
    }

    /// The scripts `direction` would apply, in order.
    pub fn scripts(&self, direction: Direction) -> Result<Vec<Script>> {
        let driver = self.adapter.driver();
        match &self.source {
            ScriptSource::Bundled => bundled_scripts(driver.as_str(), direction),
            ScriptSource::Directory(root) => directory_scripts(root, driver, direction),
        }
    }

    /// Apply every forward script. Returns the number applied.
    pub fn up(&self) -> Result<usize> {
        self.run(Direction::Up)
    }

    /// Apply every reverse script. Returns the number applied.
    pub fn down(&self) -> Result<usize> {
        self.run(Direction::Down)
    }

    fn run(&self, direction: Direction) -> Result<usize> {
        const OP: &str = "migrate.run";
        let driver = self.adapter.driver();
        let scripts = self.scripts(direction)?;

        for script in &scripts {
            info!(%driver, script = %script.name, %direction, "applying migration script");
            self.adapter
                .transact(OP, |tx| {
                    tx.execute_batch(&script.sql)
                        .map_err(|source| StoreError::SqlExecute { op: OP, source })
                })
                .map_err(|e| StoreError::Migration {
                    op: OP,
                    target: script.name.clone(),
                    source: Box::new(e),
                })?;
        }

        info!(%driver, %direction, applied = scripts.len(), "migrations complete");
        Ok(scripts.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
