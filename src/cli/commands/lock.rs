//! lock command - Hold a ref lock around an external command

use std::process::Command;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde_json::json;

use super::{parse_project, parse_ref};
use crate::cli::Context;
use crate::ui::output::{self, Report};

/// Acquire the ref lock, run `command` (if any) and release.
pub fn lock(
    ctx: &Context,
    project: &str,
    ref_name: &str,
    timeout_ms: Option<u64>,
    command: &[String],
) -> Result<Report> {
    let project = parse_project(project)?;
    let name = parse_ref(ref_name)?;
    let timeout = timeout_ms.map_or(ctx.store.lock_timeout(), Duration::from_millis);

    let mut handle = ctx.store.lock_ref_with_timeout(&project, &name, timeout)?;
    output::debug(format!("holding {}", handle.path()), ctx.verbosity);

    let status = match command.split_first() {
        Some((program, args)) => Some(
            Command::new(program)
                .args(args)
                .status()
                .with_context(|| format!("Failed to run '{program}'"))?,
        ),
        None => None,
    };

    let held_ms = whole_millis(handle.held_for());
    let path = handle.path().to_string();
    handle.release()?;

    let report = match status {
        None => Report::new(
            true,
            format!("Lock on {name} is free"),
            json!({ "path": path, "held_ms": held_ms }),
        ),
        Some(status) => Report::new(
            status.success(),
            format!("Released lock on {name} after command exited with {status}"),
            json!({
                "path": path,
                "held_ms": held_ms,
                "exit_code": status.code(),
            }),
        ),
    };
    Ok(report)
}

/// Milliseconds in `d`, saturating at `u64::MAX`.
fn whole_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
