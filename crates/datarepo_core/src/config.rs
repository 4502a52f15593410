//! Runtime configuration for storage, logging and repository policy.
//!
//! # Responsibility
//! - Provide serde-backed configuration sections with stable defaults.
//! - Validate values that would otherwise fail late at call time.
//!
//! # Invariants
//! - Every section is optional in JSON input; missing keys use defaults.
//! - `repository.clear_after_bulk_update` defaults to `true`.

use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_PAGE_SIZE: u32 = 2_000;

/// Configuration loading/validation error.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read configuration: {err}"),
            Self::Parse(err) => write!(f, "failed to parse configuration: {err}"),
            Self::Invalid(message) => write!(f, "invalid configuration: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub repository: RepositoryConfig,
}

/// Storage connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database file. `None` opens an in-memory database.
    pub path: Option<PathBuf>,
    /// How long a write lock request waits before failing with `LockTimeout`.
    pub lock_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

/// File logger settings consumed by [`crate::logging::init_logging_from`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute log directory. Logging stays disabled when absent.
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

/// Repository engine policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Clear the unit of work after every bulk mutation unless the query
    /// definition overrides it.
    pub clear_after_bulk_update: bool,
    /// Page requests above this size are clamped.
    pub max_page_size: u32,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            clear_after_bulk_update: true,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl CoreConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "database.lock_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.repository.max_page_size == 0 {
            return Err(ConfigError::Invalid(
                "repository.max_page_size must be greater than 0".to_string(),
            ));
        }
        if crate::logging::normalize_level(&self.logging.level).is_err() {
            return Err(ConfigError::Invalid(format!(
                "logging.level `{}` is not one of trace|debug|info|warn|error",
                self.logging.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};

    #[test]
    fn empty_document_uses_defaults() {
        let config = CoreConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CoreConfig::default());
        assert!(config.repository.clear_after_bulk_update);
        assert_eq!(config.database.lock_timeout_ms, 5_000);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = CoreConfig::from_json_str(
            r#"{"repository": {"clear_after_bulk_update": false}, "logging": {"level": "WARN"}}"#,
        )
        .unwrap();
        assert!(!config.repository.clear_after_bulk_update);
        assert_eq!(config.repository.max_page_size, 2_000);
        assert_eq!(config.logging.level, "WARN");
    }

    #[test]
    fn zero_lock_timeout_is_rejected() {
        let err = CoreConfig::from_json_str(r#"{"database": {"lock_timeout_ms": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("lock_timeout_ms")));
    }

    #[test]
    fn unknown_keys_fail_to_parse() {
        let err = CoreConfig::from_json_str(r#"{"repository": {"auto_clear": true}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let err = CoreConfig::from_json_str(r#"{"logging": {"level": "verbose"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
