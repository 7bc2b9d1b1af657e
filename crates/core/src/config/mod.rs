//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SCHOOLINTEL_*)
//! 2. TOML config file (if SCHOOLINTEL_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! The result is loaded once per process and handed to
//! [`crate::LookupCache::open`]; nothing reads it globally.

use std::path::{Path, PathBuf};

use chrono::Duration;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_FILE_ENV: &str = "SCHOOLINTEL_CONFIG_FILE";

const ENV_PREFIX: &str = "SCHOOLINTEL_";

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (SCHOOLINTEL_*)
/// 2. TOML config file
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Master switch. When false the cache does no I/O at all.
    ///
    /// Set via SCHOOLINTEL_ENABLE_CACHE environment variable.
    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// Default lifetime of general entries, in hours.
    ///
    /// Set via SCHOOLINTEL_CACHE_TTL_HOURS environment variable.
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: i64,

    /// Directory holding the cache database.
    ///
    /// Set via SCHOOLINTEL_CACHE_DIR environment variable.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Database file name inside `cache_dir`.
    ///
    /// Set via SCHOOLINTEL_CACHE_FILE environment variable.
    #[serde(default = "default_cache_file")]
    pub cache_file: String,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_hours() -> i64 {
    24
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_cache_file() -> String {
    "lookup_cache.sqlite".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_ttl_hours: default_cache_ttl_hours(),
            cache_dir: default_cache_dir(),
            cache_file: default_cache_file(),
        }
    }
}

impl AppConfig {
    /// Full path of the cache database.
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(&self.cache_file)
    }

    /// Default entry lifetime as a chrono Duration.
    pub fn default_ttl(&self) -> Duration {
        Duration::hours(self.cache_ttl_hours)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// The TOML file is taken from `SCHOOLINTEL_CONFIG_FILE` if set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed, or
    /// validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// Load configuration using an explicit TOML file instead of the
    /// environment-provided one.
    pub fn load_from(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(
            Env::prefixed(ENV_PREFIX)
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
