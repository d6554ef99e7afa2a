//! # strata
//!
//! Operator CLI over the strata storage facade: connectivity checks,
//! schema migrations, table clearing and audit record access.

#![deny(unsafe_code)]

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use strata_core::load_config_from_path;
use strata_core::logging::init_subscriber;

use crate::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config_from_path(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    cli.apply_overrides(&mut config);

    init_subscriber(&config.log_level, config.log_format);

    let stdout = std::io::stdout();
    commands::run(&cli.command, &config, &mut stdout.lock())
}
