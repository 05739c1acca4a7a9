//! Ref commands: exists, check, cas, remove

use anyhow::{Context as _, Result};
use serde_json::json;

use super::{parse_oid, parse_project, parse_ref};
use crate::cli::Context;
use crate::core::paths::PathScheme;
use crate::core::types::Ref;
use crate::ui::output::Report;

/// Check whether a ref's path exists.
pub fn exists(ctx: &Context, project: &str, ref_name: &str) -> Result<Report> {
    let project = parse_project(project)?;
    let name = parse_ref(ref_name)?;
    let found = ctx.store.exists(&project, &name)?;

    let message = if found {
        format!("{name} exists in {project}")
    } else {
        format!("{name} does not exist in {project}")
    };
    Ok(Report::new(
        found,
        message,
        json!({
            "project": project,
            "ref": name,
            "path": PathScheme::value_path(&project, &name),
            "exists": found,
        }),
    ))
}

/// Compare a local ref value against the shared one.
pub fn check(ctx: &Context, project: &str, ref_name: &str, oid: Option<&str>) -> Result<Report> {
    let project = parse_project(project)?;
    let name = parse_ref(ref_name)?;
    let object_id = oid.map(parse_oid).transpose()?;
    let local = Ref::new(name, object_id);

    let up_to_date = ctx.store.is_up_to_date(&project, &local)?;
    let message = if up_to_date {
        format!("{} is up to date", local.name)
    } else {
        format!("{} is out of date", local.name)
    };
    Ok(Report::new(
        up_to_date,
        message,
        json!({
            "project": project,
            "ref": local.name,
            "local": local.object_id,
            "up_to_date": up_to_date,
        }),
    ))
}

/// Move a ref from `expected` to `new_value` (tombstone when `None`).
pub fn cas(
    ctx: &Context,
    project: &str,
    ref_name: &str,
    expected: Option<&str>,
    new_value: Option<&str>,
) -> Result<Report> {
    let project = parse_project(project)?;
    let name = parse_ref(ref_name)?;
    let old = Ref::new(name, expected.map(parse_oid).transpose()?);
    let new_value = new_value.map(parse_oid).transpose()?;

    let updated = ctx.store.compare_and_put(&project, &old, new_value)?;
    let target = new_value.map_or_else(|| "tombstone".to_string(), |id| id.short(12));
    let message = if updated {
        format!("{} updated to {target}", old.name)
    } else {
        format!(
            "{} was not updated: shared value no longer matches the expected id",
            old.name
        )
    };
    Ok(Report::new(
        updated,
        message,
        json!({
            "project": project,
            "ref": old.name,
            "expected": old.object_id,
            "new": new_value,
            "updated": updated,
        }),
    ))
}

/// Delete a project's whole subtree.
pub fn remove(ctx: &Context, project: &str) -> Result<Report> {
    let project = parse_project(project)?;
    ctx.store
        .remove(&project)
        .with_context(|| format!("Failed to remove project {project}"))?;
    Ok(Report::new(
        true,
        format!("Removed shared refs of {project}"),
        json!({ "project": project, "removed": true }),
    ))
}
