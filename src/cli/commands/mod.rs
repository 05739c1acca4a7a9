//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Validates command-specific arguments into domain types
//! 2. Calls the shared ref store
//! 3. Returns a [`Report`] for the CLI layer to print
//!
//! A `false` store result becomes an unsuccessful report, not an error.

mod completion;
mod config_cmd;
mod lock;
mod refs;
mod values;

pub use completion::completion;
pub use config_cmd::config;

use anyhow::{bail, Context as _, Result};

use crate::cli::args::Command;
use crate::cli::Context;
use crate::core::types::{ObjectId, ProjectKey, RefName};
use crate::ui::output::Report;

/// Dispatch a store-backed command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<Report> {
    match command {
        Command::Exists { project, ref_name } => refs::exists(ctx, &project, &ref_name),
        Command::Check {
            project,
            ref_name,
            oid,
        } => refs::check(ctx, &project, &ref_name, oid.as_deref()),
        Command::Cas {
            project,
            ref_name,
            expected,
            new_value,
            delete,
        } => {
            let new_value = if delete { None } else { new_value };
            refs::cas(ctx, &project, &ref_name, expected.as_deref(), new_value.as_deref())
        }
        Command::Remove { project } => refs::remove(ctx, &project),
        Command::Get {
            project,
            key,
            value_type,
        } => values::get(ctx, &project, &key, value_type),
        Command::Put {
            project,
            key,
            value,
            expected,
            value_type,
        } => values::put(ctx, &project, &key, &value, expected.as_deref(), value_type),
        Command::Lock {
            project,
            ref_name,
            timeout_ms,
            command,
        } => lock::lock(ctx, &project, &ref_name, timeout_ms, &command),
        Command::Config { .. } | Command::Completion { .. } => {
            bail!("this command does not use the coordination service")
        }
    }
}

fn parse_project(raw: &str) -> Result<ProjectKey> {
    ProjectKey::new(raw).with_context(|| format!("Invalid project name '{raw}'"))
}

fn parse_ref(raw: &str) -> Result<RefName> {
    RefName::new(raw).with_context(|| format!("Invalid ref name '{raw}'"))
}

fn parse_oid(raw: &str) -> Result<ObjectId> {
    ObjectId::new(raw).with_context(|| format!("Invalid object id '{raw}'"))
}
