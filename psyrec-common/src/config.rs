//! Configuration file resolution and TOML loading
//!
//! Configuration file path priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`PSYREC_CONFIG` unless overridden)
//! 3. Per-user config file (`~/.config/psyrec/<module>.toml`)
//! 4. System-wide config file (`/etc/psyrec/<module>.toml`)
//!
//! When none of these yields a file, callers fall back to compiled defaults.
//! A missing configuration file is not an error; an unreadable or malformed
//! one is.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "PSYREC_CONFIG";

/// Logging configuration shared by every psyrec binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where a resolved configuration path came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine,
    Environment,
    UserFile,
    SystemFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CommandLine => "command line",
            Self::Environment => "environment",
            Self::UserFile => "user config file",
            Self::SystemFile => "system config file",
        };
        f.write_str(name)
    }
}

/// Resolves the configuration file of one psyrec module
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    module_name: String,
    env_var: String,
}

impl ConfigResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            env_var: CONFIG_ENV_VAR.to_string(),
        }
    }

    /// Use a different environment variable than `PSYREC_CONFIG`
    pub fn with_env_var(mut self, env_var: &str) -> Self {
        self.env_var = env_var.to_string();
        self
    }

    /// Resolve the configuration file path following the priority order.
    ///
    /// Explicit choices (command line, environment) are returned even when
    /// the file does not exist, so that loading reports the mistake. Default
    /// locations are only returned when the file exists.
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Option<(PathBuf, ConfigSource)> {
        if let Some(path) = cli_arg {
            return Some((path.to_path_buf(), ConfigSource::CommandLine));
        }

        if let Ok(path) = std::env::var(&self.env_var) {
            if !path.trim().is_empty() {
                return Some((PathBuf::from(path), ConfigSource::Environment));
            }
        }

        if let Some(path) = self.user_config_path() {
            if path.exists() {
                return Some((path, ConfigSource::UserFile));
            }
        }

        let system = self.system_config_path();
        if system.exists() {
            return Some((system, ConfigSource::SystemFile));
        }

        None
    }

    /// Per-user configuration file for this module
    pub fn user_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("psyrec").join(self.file_name()))
    }

    /// System-wide configuration file for this module
    pub fn system_config_path(&self) -> PathBuf {
        PathBuf::from("/etc/psyrec").join(self.file_name())
    }

    fn file_name(&self) -> String {
        format!("{}.toml", self.module_name)
    }

    /// Resolve and load the configuration, or fall back to `T::default()`
    pub fn load<T>(&self, cli_arg: Option<&Path>) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.resolve(cli_arg) {
            Some((path, source)) => {
                info!("Loading configuration from {} ({})", path.display(), source);
                load_toml(&path)
            }
            None => {
                warn!(
                    "No configuration file found for {}; using compiled defaults",
                    self.module_name
                );
                Ok(T::default())
            }
        }
    }
}

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Resolve a possibly relative path against the directory of the config file
pub fn resolve_relative(base_file: Option<&Path>, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match base_file.and_then(Path::parent) {
        Some(dir) => dir.join(path),
        None => path.to_path_buf(),
    }
}
