//! Typed value commands: get, put

use std::fmt::Display;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;

use super::{parse_project, parse_ref};
use crate::cli::args::ValueType;
use crate::cli::Context;
use crate::core::codec::RefValue;
use crate::core::types::{ObjectId, ProjectKey, RefName};
use crate::refdb::Lookup;
use crate::ui::output::Report;

/// Read a value of the requested type.
pub fn get(ctx: &Context, project: &str, key: &str, value_type: ValueType) -> Result<Report> {
    let project = parse_project(project)?;
    let key = parse_ref(key)?;
    match value_type {
        ValueType::Text => get_typed::<String>(ctx, &project, &key),
        ValueType::Int => get_typed::<i32>(ctx, &project, &key),
        ValueType::Long => get_typed::<i64>(ctx, &project, &key),
        ValueType::Oid => get_typed::<ObjectId>(ctx, &project, &key),
    }
}

fn get_typed<T>(ctx: &Context, project: &ProjectKey, key: &RefName) -> Result<Report>
where
    T: RefValue + Display + Serialize,
{
    let lookup = ctx.store.try_get::<T>(project, key)?;
    let (state, message) = match &lookup {
        Lookup::Missing => ("missing", format!("{key} is not set in {project}")),
        Lookup::Cleared => ("cleared", format!("{key} was cleared in {project}")),
        Lookup::Found(value) => ("found", value.to_string()),
    };
    let found = matches!(lookup, Lookup::Found(_));
    Ok(Report::new(
        found,
        message,
        json!({
            "project": project,
            "key": key,
            "kind": T::KIND.to_string(),
            "state": state,
            "value": lookup.into_option(),
        }),
    ))
}

/// Compare-and-put a value of the requested type.
pub fn put(
    ctx: &Context,
    project: &str,
    key: &str,
    value: &str,
    expected: Option<&str>,
    value_type: ValueType,
) -> Result<Report> {
    let project = parse_project(project)?;
    let key = parse_ref(key)?;
    match value_type {
        ValueType::Text => put_typed::<String>(ctx, &project, &key, value, expected),
        ValueType::Int => put_typed::<i32>(ctx, &project, &key, value, expected),
        ValueType::Long => put_typed::<i64>(ctx, &project, &key, value, expected),
        ValueType::Oid => put_typed::<ObjectId>(ctx, &project, &key, value, expected),
    }
}

fn put_typed<T>(
    ctx: &Context,
    project: &ProjectKey,
    key: &RefName,
    value: &str,
    expected: Option<&str>,
) -> Result<Report>
where
    T: RefValue + Display + Serialize,
{
    let parse = |raw: &str| T::decode(raw).map_err(|e| anyhow!("Invalid value: {e}"));
    let new_value = parse(value)?;
    let expected = expected.map(parse).transpose()?;

    let updated = ctx
        .store
        .compare_and_put_value(project, key, expected.as_ref(), &new_value)?;
    let message = if updated {
        format!("{key} set to {new_value}")
    } else {
        format!("{key} was not updated: stored value does not match")
    };
    Ok(Report::new(
        updated,
        message,
        json!({
            "project": project,
            "key": key,
            "kind": T::KIND.to_string(),
            "expected": expected,
            "value": new_value,
            "updated": updated,
        }),
    ))
}
