//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Location
//!
//! Searched in order:
//! 1. `--config <path>` on the command line
//! 2. `$REFCOORD_CONFIG` if set
//! 3. `$XDG_CONFIG_HOME/refcoord/config.toml`
//! 4. `~/.refcoord/config.toml` (canonical write location)
//!
//! # Validation
//!
//! Values are validated after parsing: the endpoint must use a known scheme,
//! timeouts must be positive and retry caps must not be below their base.

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::coord::Endpoint;
use crate::core::paths::PathScheme;

/// Top-level configuration file.
///
/// # Example
///
/// ```toml
/// [coordinator]
/// connect = "fs:/var/lib/refcoord"
/// root_node = "refcoord/multi-site"
/// transaction_lock_timeout_ms = 1000
///
/// [coordinator.cas_retry]
/// base_sleep_ms = 100
/// max_sleep_ms = 300
/// max_retries = 3
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Coordination service settings
    pub coordinator: Option<CoordinatorConfig>,
}

impl FileConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(coordinator) = &self.coordinator {
            coordinator.validate()?;
        }
        Ok(())
    }
}

/// Connection to the coordination service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Endpoint, `memory:` or `fs:<dir>`
    pub connect: Option<String>,

    /// Namespace prefix for every path
    pub root_node: Option<String>,

    /// Lifetime recorded on mutex leases
    pub session_timeout_ms: Option<u64>,

    /// Upper bound on establishing the connection
    pub connection_timeout_ms: Option<u64>,

    /// Wait bound for ref locks
    pub transaction_lock_timeout_ms: Option<u64>,

    /// Backoff for ordinary calls
    pub retry: Option<RetryConfig>,

    /// Backoff for compare-and-set calls
    pub cas_retry: Option<RetryConfig>,
}

impl CoordinatorConfig {
    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(connect) = &self.connect {
            connect
                .parse::<Endpoint>()
                .map_err(|e| ConfigError::InvalidValue(format!("connect: {e}")))?;
        }

        if let Some(root) = &self.root_node {
            validate_root_node(root)?;
        }

        for (key, value) in [
            ("session_timeout_ms", self.session_timeout_ms),
            ("connection_timeout_ms", self.connection_timeout_ms),
            ("transaction_lock_timeout_ms", self.transaction_lock_timeout_ms),
        ] {
            if value == Some(0) {
                return Err(ConfigError::InvalidValue(format!(
                    "{key} must be greater than zero"
                )));
            }
        }

        if let Some(retry) = &self.retry {
            retry.validate("retry")?;
        }
        if let Some(cas_retry) = &self.cas_retry {
            cas_retry.validate("cas_retry")?;
        }
        Ok(())
    }
}

fn validate_root_node(root: &str) -> Result<(), ConfigError> {
    let mut segments = PathScheme::segments(root).peekable();
    if segments.peek().is_none() {
        return Err(ConfigError::InvalidValue(
            "root_node cannot be empty".to_string(),
        ));
    }
    if let Some(bad) = segments.find(|s| s.starts_with('.')) {
        return Err(ConfigError::InvalidValue(format!(
            "root_node segment '{bad}' cannot start with '.'"
        )));
    }
    Ok(())
}

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Initial sleep between attempts
    pub base_sleep_ms: Option<u64>,

    /// Cap on any single sleep
    pub max_sleep_ms: Option<u64>,

    /// Retries after the first attempt
    pub max_retries: Option<u32>,
}

impl RetryConfig {
    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.base_sleep_ms == Some(0) {
            return Err(ConfigError::InvalidValue(format!(
                "{section}.base_sleep_ms must be greater than zero"
            )));
        }
        if let (Some(base), Some(max)) = (self.base_sleep_ms, self.max_sleep_ms) {
            if max < base {
                return Err(ConfigError::InvalidValue(format!(
                    "{section}.max_sleep_ms ({max}) is below base_sleep_ms ({base})"
                )));
            }
        }
        Ok(())
    }
}
