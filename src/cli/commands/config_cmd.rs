//! config command - Show, locate, or initialize configuration

use anyhow::{bail, Context as _, Result};
use serde_json::json;

use crate::cli::args::ConfigAction;
use crate::core::config::Config;
use crate::ui::output::Report;

/// Run a config subcommand against the loaded configuration.
pub fn config(config: &Config, action: ConfigAction) -> Result<Report> {
    match action {
        ConfigAction::Show => show(config),
        ConfigAction::Path => path(config),
        ConfigAction::Init { path, force } => {
            let path = match path {
                Some(path) => path,
                None => Config::default_config_path()?,
            };
            if path.exists() && !force {
                bail!(
                    "{} already exists; pass --force to overwrite it",
                    path.display()
                );
            }
            let effective = config.effective()?;
            Config::write(&path, &effective)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(Report::new(
                true,
                format!("Wrote {}", path.display()),
                json!({ "path": path }),
            ))
        }
    }
}

fn show(config: &Config) -> Result<Report> {
    let effective = config.effective()?;
    let text = toml::to_string_pretty(&effective).context("Failed to render configuration")?;
    Ok(Report::new(
        true,
        text.trim_end(),
        serde_json::to_value(&effective)?,
    ))
}

fn path(config: &Config) -> Result<Report> {
    Ok(match config.loaded_from() {
        Some(path) => Report::new(
            true,
            path.display().to_string(),
            json!({ "path": path }),
        ),
        None => Report::new(
            false,
            "No configuration file found; using defaults",
            json!({ "path": null }),
        ),
    })
}
