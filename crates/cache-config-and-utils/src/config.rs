//! Configuration management for opticache tooling.

use crate::{CoreError, CoreResult, Paths};
use optimistic_cache::ReducerOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const LOG_LEVEL_ENV: &str = "OPTICACHE_LOG_LEVEL";
const PRESERVE_CACHE_ENV: &str = "OPTICACHE_PRESERVE_CACHE";

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Keep a query's results when its listener detaches without saying.
    #[serde(default)]
    pub preserve_cache_after_unset: bool,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            preserve_cache_after_unset: false,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> CoreResult<Self> {
        let mut config = Self::default();
        config.load_from_env()?;
        Ok(config)
    }

    /// Load configuration from the config file, falling back to defaults.
    /// Environment variables take precedence over the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Options for the cache reducer.
    pub fn reducer_options(&self) -> ReducerOptions {
        ReducerOptions {
            preserve_cache_after_unset: self.preserve_cache_after_unset,
        }
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) -> CoreResult<()> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> CoreResult<()> {
        if let Some(log_level) = var(LOG_LEVEL_ENV) {
            self.log_level = log_level;
        }
        if let Some(raw) = var(PRESERVE_CACHE_ENV) {
            self.preserve_cache_after_unset = parse_flag(&raw).ok_or_else(|| {
                CoreError::Config(format!("{PRESERVE_CACHE_ENV} must be a boolean, got {raw:?}"))
            })?;
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
