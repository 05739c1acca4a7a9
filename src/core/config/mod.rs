//! core::config
//!
//! Configuration schema and loading.
//!
//! # Precedence
//!
//! Values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Config file
//! 3. CLI flags (`--connect`, `--root`), applied with [`Config::apply_overrides`]
//!
//! # Config Locations
//!
//! Searched in order, first hit wins:
//! 1. An explicit path (`--config`); must exist
//! 2. `$REFCOORD_CONFIG` if set (warns when it points nowhere)
//! 3. `$XDG_CONFIG_HOME/refcoord/config.toml`
//! 4. `~/.refcoord/config.toml` (canonical write location)
//!
//! # Example
//!
//! ```no_run
//! use refcoord::core::config::Config;
//!
//! let result = Config::load(None).unwrap();
//! let settings = result.config.settings().unwrap();
//! println!("Endpoint: {}", settings.endpoint);
//! println!("Lock timeout: {:?}", settings.lock_timeout);
//! ```

pub mod schema;

pub use schema::{CoordinatorConfig, FileConfig, RetryConfig};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::coord::{CoordinatorSettings, Endpoint, DEFAULT_ROOT_NODE};
use crate::core::retry::RetryPolicy;

/// Endpoint used when nothing is configured.
pub const DEFAULT_CONNECT: &str = "fs:.refcoord";

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "REFCOORD_CONFIG";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("home directory not found")]
    NoHomeDir,
}

/// Warnings generated during config loading.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    /// The warning message.
    pub message: String,
    /// The path that triggered the warning.
    pub path: PathBuf,
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// Any warnings generated during loading.
    pub warnings: Vec<ConfigWarning>,
}

/// Loaded configuration with defaults applied through accessors.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub file: FileConfig,
    /// Path the file was loaded from, if any
    path: Option<PathBuf>,
}

impl Config {
    /// Load configuration, preferring `explicit` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the explicit file is missing, or if a config file
    /// exists but cannot be parsed or fails validation. A missing default
    /// file is not an error.
    pub fn load(explicit: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let mut warnings = Vec::new();

        let (file, path) = match explicit {
            Some(path) => (Self::read_config(path)?, Some(path.to_path_buf())),
            None => Self::search(&mut warnings)?,
        };
        file.validate()?;

        Ok(ConfigLoadResult {
            config: Config { file, path },
            warnings,
        })
    }

    /// Build a configuration from an in-memory file, validating it.
    pub fn from_file(file: FileConfig) -> Result<Self, ConfigError> {
        file.validate()?;
        Ok(Self { file, path: None })
    }

    fn search(
        warnings: &mut Vec<ConfigWarning>,
    ) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
        // 1. $REFCOORD_CONFIG
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                let config = Self::read_config(&path)?;
                return Ok((config, Some(path)));
            }
            warnings.push(ConfigWarning {
                message: format!("${CONFIG_ENV} points to a missing file, ignoring it"),
                path,
            });
        }

        // 2. $XDG_CONFIG_HOME/refcoord/config.toml
        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("refcoord/config.toml");
            if path.exists() {
                let config = Self::read_config(&path)?;
                return Ok((config, Some(path)));
            }
        }

        // 3. ~/.refcoord/config.toml
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".refcoord/config.toml");
            if path.exists() {
                let config = Self::read_config(&path)?;
                return Ok((config, Some(path)));
            }
        }

        Ok((FileConfig::default(), None))
    }

    fn read_config(path: &Path) -> Result<FileConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Canonical config path, `~/.refcoord/config.toml`.
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".refcoord/config.toml"))
    }

    /// Write a config file atomically (temp file, then rename).
    ///
    /// Creates parent directories if needed.
    pub fn write(path: &Path, config: &FileConfig) -> Result<(), ConfigError> {
        config.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let contents =
            toml::to_string_pretty(config).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        let temp_path = path.with_extension("toml.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        file.write_all(contents.as_bytes())
            .map_err(|e| ConfigError::WriteError {
                path: temp_path.clone(),
                source: e,
            })?;

        file.sync_all().map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        fs::rename(&temp_path, path).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Override the endpoint and root namespace, then re-validate.
    pub fn apply_overrides(
        &mut self,
        connect: Option<String>,
        root_node: Option<String>,
    ) -> Result<(), ConfigError> {
        if connect.is_none() && root_node.is_none() {
            return Ok(());
        }
        let coordinator = self.file.coordinator.get_or_insert_with(Default::default);
        if connect.is_some() {
            coordinator.connect = connect;
        }
        if root_node.is_some() {
            coordinator.root_node = root_node;
        }
        self.file.validate()
    }

    /// Path the configuration was loaded from.
    pub fn loaded_from(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // =========================================================================
    // Accessor methods with defaults
    // =========================================================================

    fn coordinator(&self) -> Option<&CoordinatorConfig> {
        self.file.coordinator.as_ref()
    }

    /// Endpoint text. Defaults to `fs:.refcoord`.
    pub fn connect(&self) -> &str {
        self.coordinator()
            .and_then(|c| c.connect.as_deref())
            .unwrap_or(DEFAULT_CONNECT)
    }

    /// Root namespace. Defaults to `refcoord/multi-site`.
    pub fn root_node(&self) -> &str {
        self.coordinator()
            .and_then(|c| c.root_node.as_deref())
            .unwrap_or(DEFAULT_ROOT_NODE)
    }

    /// Defaults to 60 s.
    pub fn session_timeout(&self) -> Duration {
        let ms = self.coordinator().and_then(|c| c.session_timeout_ms);
        Duration::from_millis(ms.unwrap_or(60_000))
    }

    /// Defaults to 15 s.
    pub fn connection_timeout(&self) -> Duration {
        let ms = self.coordinator().and_then(|c| c.connection_timeout_ms);
        Duration::from_millis(ms.unwrap_or(15_000))
    }

    /// Defaults to 1 s.
    pub fn lock_timeout(&self) -> Duration {
        let ms = self.coordinator().and_then(|c| c.transaction_lock_timeout_ms);
        Duration::from_millis(ms.unwrap_or(1000))
    }

    /// General retry policy (defaults 1000/3000 ms, 3 retries).
    pub fn retry(&self) -> Result<RetryPolicy, ConfigError> {
        let section = self.coordinator().and_then(|c| c.retry.as_ref());
        retry_policy("retry", section, RetryPolicy::connection_default())
    }

    /// Compare-and-set retry policy (defaults 100/300 ms, 3 retries).
    pub fn cas_retry(&self) -> Result<RetryPolicy, ConfigError> {
        let section = self.coordinator().and_then(|c| c.cas_retry.as_ref());
        retry_policy("cas_retry", section, RetryPolicy::cas_default())
    }

    /// Resolve everything into connection settings.
    pub fn settings(&self) -> Result<CoordinatorSettings, ConfigError> {
        let endpoint: Endpoint = self
            .connect()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("connect: {e}")))?;

        Ok(CoordinatorSettings {
            endpoint,
            root_node: self.root_node().to_string(),
            session_timeout: self.session_timeout(),
            connection_timeout: self.connection_timeout(),
            retry: self.retry()?,
            cas_retry: self.cas_retry()?,
            lock_timeout: self.lock_timeout(),
        })
    }

    /// The configuration with every default written out.
    pub fn effective(&self) -> Result<FileConfig, ConfigError> {
        let settings = self.settings()?;
        let retry = |policy: RetryPolicy| RetryConfig {
            base_sleep_ms: Some(millis(policy.base_sleep)),
            max_sleep_ms: Some(millis(policy.max_sleep)),
            max_retries: Some(policy.max_retries),
        };

        Ok(FileConfig {
            coordinator: Some(CoordinatorConfig {
                connect: Some(self.connect().to_string()),
                root_node: Some(settings.root_node),
                session_timeout_ms: Some(millis(settings.session_timeout)),
                connection_timeout_ms: Some(millis(settings.connection_timeout)),
                transaction_lock_timeout_ms: Some(millis(settings.lock_timeout)),
                retry: Some(retry(settings.retry)),
                cas_retry: Some(retry(settings.cas_retry)),
            }),
        })
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn retry_policy(
    name: &str,
    section: Option<&RetryConfig>,
    default: RetryPolicy,
) -> Result<RetryPolicy, ConfigError> {
    let Some(section) = section else {
        return Ok(default);
    };
    let policy = RetryPolicy::new(
        section
            .base_sleep_ms
            .map_or(default.base_sleep, Duration::from_millis),
        section
            .max_sleep_ms
            .map_or(default.max_sleep, Duration::from_millis),
        section.max_retries.unwrap_or(default.max_retries),
    );
    if policy.max_sleep < policy.base_sleep {
        return Err(ConfigError::InvalidValue(format!(
            "{name}: max sleep {:?} is below base sleep {:?}",
            policy.max_sleep, policy.base_sleep
        )));
    }
    Ok(policy)
}
