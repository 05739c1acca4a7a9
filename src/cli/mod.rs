//! cli
//!
//! Command-line interface layer for refcoord.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Install logging
//! - Load configuration and connect the shared ref store
//! - Delegate to command handlers
//!
//! # Architecture
//!
//! The CLI layer is thin. Handlers call [`crate::refdb::SharedRefStore`] and
//! return a [`Report`]; printing and exit codes are decided here.

pub mod args;
pub mod commands;

pub use args::{Cli, Shell};

use std::process::ExitCode;

use anyhow::{Context as _, Result};
use tracing_subscriber::EnvFilter;

use crate::core::codec::CodecRegistry;
use crate::core::config::Config;
use crate::refdb::SharedRefStore;
use crate::ui::output::{self, Report, Verbosity};
use args::Command;

/// Everything a store-backed command needs.
#[derive(Debug)]
pub struct Context {
    pub store: SharedRefStore,
    pub verbosity: Verbosity,
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse_args();
    init_tracing(cli.quiet, cli.debug, cli.verbose);
    let verbosity = Verbosity::from_flags(cli.quiet, cli.debug_enabled());

    // Completion needs neither configuration nor a connection.
    if let Command::Completion { shell } = cli.command {
        commands::completion(shell, &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let loaded = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    for warning in &loaded.warnings {
        output::warn(
            format!("{} ({})", warning.message, warning.path.display()),
            verbosity,
        );
    }
    let mut config = loaded.config;
    config
        .apply_overrides(cli.connect.clone(), cli.root.clone())
        .context("Invalid command-line override")?;

    let report = match cli.command {
        Command::Config { action } => commands::config(&config, action)?,
        command => {
            let settings = config.settings().context("Invalid configuration")?;
            let store = SharedRefStore::from_settings(&settings, CodecRegistry::builtin())
                .context("Failed to connect to the coordination service")?;
            let ctx = Context { store, verbosity };
            let report = commands::dispatch(command, &ctx);
            if let Err(e) = ctx.store.close() {
                tracing::warn!(error = %e, "failed to close coordination client");
            }
            report?
        }
    };

    finish(&report, cli.json, verbosity)
}

fn finish(report: &Report, json: bool, verbosity: Verbosity) -> Result<ExitCode> {
    output::emit(report, json, verbosity).context("Failed to write output")?;
    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Install a stderr `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level follows the flags.
fn init_tracing(quiet: bool, debug: bool, verbose: u8) {
    let level = if quiet {
        "off"
    } else if debug {
        "debug"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
