//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use strata_core::{AppConfig, LogFormat};

/// Operate a strata datastore.
#[derive(Parser, Debug)]
#[command(name = "strata", about = "Operate a strata datastore", version)]
pub struct Cli {
    /// Path to the JSON config file. A missing file means defaults.
    #[arg(long, global = true, default_value = "strata.json")]
    pub config: PathBuf,

    /// Driver identifier (`sqlite3`, `mysql`, `postgres`).
    #[arg(long, global = true)]
    pub driver: Option<String>,

    /// Data-source descriptor.
    #[arg(long, global = true)]
    pub dsn: Option<String>,

    /// Minimum log level.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log output format (`text` or `json`).
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Flags win over file and environment values.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(ref driver) = self.driver {
            config.store.driver.clone_from(driver);
        }
        if let Some(ref dsn) = self.dsn {
            config.store.dsn.clone_from(dsn);
        }
        if let Some(ref level) = self.log_level {
            config.log_level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Connect and confirm the datastore is reachable.
    Ping,
    /// Apply forward migrations.
    Init,
    /// Run migration scripts in one direction.
    Migrate {
        #[command(subcommand)]
        direction: MigrateCommand,
    },
    /// Delete every row of every table.
    Clear,
    /// Read or write audit records.
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
    /// Print the effective configuration (password masked).
    Config,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum MigrateCommand {
    /// Apply forward scripts.
    Up {
        /// Script root laid out as `<dir>/<engine>/*.sql` instead of the bundled set.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Apply reverse scripts.
    Down {
        /// Script root laid out as `<dir>/<engine>/*.sql` instead of the bundled set.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum AuditCommand {
    /// Fetch the record for a request id.
    Get {
        /// Request identifier.
        id: String,
    },
    /// Insert a record.
    Insert(InsertArgs),
}

#[derive(Args, Debug, PartialEq, Eq)]
pub struct InsertArgs {
    /// Event name, e.g. `createUser`.
    #[arg(long)]
    pub event: String,
    /// Response status code.
    #[arg(long)]
    pub status_code: i32,
    /// Request identifier. Generated when omitted.
    #[arg(long, default_value = "")]
    pub request_id: String,
    /// Client user agent.
    #[arg(long, default_value = "")]
    pub client_agent: String,
    /// Client network address.
    #[arg(long, default_value = "")]
    pub client_address: String,
    /// Error text.
    #[arg(long, default_value = "")]
    pub error: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("strata").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn default_config_path() {
        let cli = parse(&["ping"]);
        assert_eq!(cli.config, PathBuf::from("strata.json"));
        assert_eq!(cli.command, Command::Ping);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&["clear", "--driver", "postgres", "--log-format", "json"]);
        assert_eq!(cli.driver.as_deref(), Some("postgres"));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn invalid_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["strata", "--log-format", "xml", "ping"]).is_err());
    }

    #[test]
    fn migrate_down_with_dir() {
        let cli = parse(&["migrate", "down", "--dir", "/srv/scripts"]);
        assert_eq!(
            cli.command,
            Command::Migrate {
                direction: MigrateCommand::Down {
                    dir: Some(PathBuf::from("/srv/scripts"))
                }
            }
        );
    }

    #[test]
    fn audit_insert_defaults_optional_fields() {
        let cli = parse(&["audit", "insert", "--event", "createUser", "--status-code", "201"]);
        let Command::Audit {
            command: AuditCommand::Insert(args),
        } = cli.command
        else {
            panic!("expected audit insert");
        };
        assert_eq!(args.event, "createUser");
        assert_eq!(args.status_code, 201);
        assert!(args.request_id.is_empty());
    }

    #[test]
    fn insert_help_describes_every_option() {
        let mut cmd = Cli::command();
        let insert = cmd
            .find_subcommand_mut("audit")
            .unwrap()
            .find_subcommand_mut("insert")
            .unwrap();
        let options = insert
            .get_arguments()
            .filter(|a| a.get_long().is_some() && a.get_id() != "help");
        for arg in options {
            assert!(arg.get_help().is_some(), "--{} has no help text", arg.get_id());
        }
    }

    #[test]
    fn audit_insert_requires_event() {
        assert!(Cli::try_parse_from(["strata", "audit", "insert", "--status-code", "201"]).is_err());
    }

    #[test]
    fn flags_override_loaded_config() {
        let cli = parse(&["--driver", "mysql", "--dsn", "mysql://u:p@db/app", "--log-level", "debug", "ping"]);
        let mut config = AppConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.store.driver, "mysql");
        assert_eq!(config.store.dsn, "mysql://u:p@db/app");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Text);
    }
}
