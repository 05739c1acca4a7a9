//! ui::output
//!
//! Output formatting and display.
//!
//! # Design
//!
//! Output is formatted consistently and respects the quiet flag.
//! When `--json` is enabled, command results are machine-readable JSON.
//! Logging goes through `tracing` to stderr and is configured separately.

use std::fmt::Display;

use serde::Serialize;

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Quiet mode - minimal output
    Quiet,
    /// Normal mode - standard output
    Normal,
    /// Debug mode - verbose output
    Debug,
}

impl Verbosity {
    /// Create verbosity from flags.
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }
}

/// Outcome of a command, printed as text or JSON.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Report {
    /// Whether the command achieved what was asked (drives the exit code).
    pub success: bool,
    pub message: String,
    /// Structured fields for `--json`.
    pub details: serde_json::Value,
}

impl Report {
    pub fn new(success: bool, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            success,
            message: message.into(),
            details,
        }
    }
}

/// Print a command report.
///
/// In JSON mode the whole report goes to stdout, even when quiet.
pub fn emit(report: &Report, json: bool, verbosity: Verbosity) -> serde_json::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print(&report.message, verbosity);
        if verbosity == Verbosity::Debug && !report.details.is_null() {
            debug(&report.details, verbosity);
        }
    }
    Ok(())
}

/// Print a message (respects quiet mode).
pub fn print(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        println!("{}", message);
    }
}

/// Print a debug message (only in debug mode).
pub fn debug(message: impl Display, verbosity: Verbosity) {
    if verbosity == Verbosity::Debug {
        eprintln!("[debug] {}", message);
    }
}

/// Print an error message (always shown).
pub fn error(message: impl Display) {
    eprintln!("error: {}", message);
}

/// Print a warning message (respects quiet mode).
pub fn warn(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        eprintln!("warning: {}", message);
    }
}
