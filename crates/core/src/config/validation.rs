//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::cache::MAX_TTL_HOURS;
use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `cache_ttl_hours` is below 1 or exceeds one year
    /// - `cache_dir` is empty
    /// - `cache_file` is empty or contains a path separator
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl_hours < 1 {
            return Err(ConfigError::Invalid {
                field: "cache_ttl_hours".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.cache_ttl_hours > MAX_TTL_HOURS {
            return Err(ConfigError::Invalid {
                field: "cache_ttl_hours".into(),
                reason: format!("must not exceed {MAX_TTL_HOURS} (one year)"),
            });
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "cache_dir".into(), reason: "must not be empty".into() });
        }

        if self.cache_file.is_empty() {
            return Err(ConfigError::Invalid { field: "cache_file".into(), reason: "must not be empty".into() });
        }
        if self.cache_file.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                field: "cache_file".into(),
                reason: "must be a file name, not a path".into(),
            });
        }

        Ok(())
    }
}
