//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Catalog location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root holding `databases/`, `views/` and `snapshots/`
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
}

fn default_root_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("moldb"))
        .unwrap_or_else(|| PathBuf::from("./moldb_data"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
        }
    }
}

/// Indexing pipeline tuning
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    /// Worker threads computing entries
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the bounded results queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_compare_buffer_size")]
    pub compare_buffer_size: usize,

    /// Errors listed individually in the run log before summarising
    #[serde(default = "default_max_reported_errors")]
    pub max_reported_errors: usize,
}

fn default_workers() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_compare_buffer_size() -> usize {
    8 * 1024 // 8 KB
}

fn default_max_reported_errors() -> usize {
    10
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            compare_buffer_size: default_compare_buffer_size(),
            max_reported_errors: default_max_reported_errors(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("moldb").join("config.toml")),
            Some(PathBuf::from("/etc/moldb/config.toml")),
            Some(PathBuf::from("./moldb.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(root) = var("MOLDB_ROOT_DIR") {
            self.storage.root_dir = PathBuf::from(root);
        }

        if let Some(workers) = var("MOLDB_INDEXER_WORKERS").and_then(|v| v.parse().ok()) {
            self.indexer.workers = workers;
        }
        if let Some(capacity) = var("MOLDB_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
            self.indexer.queue_capacity = capacity;
        }

        if let Some(level) = var("MOLDB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("MOLDB_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    let root_dir = toml::Value::String(default_root_dir().display().to_string());
    format!(
        r#"# moldb Configuration
#
# Environment variables override these settings:
# - MOLDB_ROOT_DIR
# - MOLDB_INDEXER_WORKERS
# - MOLDB_QUEUE_CAPACITY
# - MOLDB_LOG_LEVEL
# - MOLDB_LOG_FORMAT

[storage]
# Directory holding databases, views and snapshots
root_dir = {root_dir}

[indexer]
# Worker threads computing structure metadata
workers = 8

# Results buffered between workers and the consumer
queue_capacity = 1000

# Chunk size for byte comparison of unchanged files (bytes)
compare_buffer_size = 8192

# Errors listed in the run log before "...and N more errors"
max_reported_errors = 10

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/moldb/moldb.log"
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_generated_config_parses() {
        let config = Config::parse(&generate_default_config()).unwrap();
        assert_eq!(config.indexer.workers, 8);
        assert_eq!(config.indexer.queue_capacity, 1000);
        assert_eq!(config.indexer.compare_buffer_size, 8192);
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.storage.root_dir, default_root_dir());
        assert!(!config.storage.root_dir.starts_with("~"));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = Config::parse("[indexer]\nworkers = 2\n").unwrap();
        assert_eq!(config.indexer.workers, 2);
        assert_eq!(config.indexer.max_reported_errors, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MOLDB_ROOT_DIR", "/tmp/moldb"),
            ("MOLDB_INDEXER_WORKERS", "3"),
            ("MOLDB_QUEUE_CAPACITY", "not a number"),
            ("MOLDB_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.storage.root_dir, PathBuf::from("/tmp/moldb"));
        assert_eq!(config.indexer.workers, 3);
        assert_eq!(config.indexer.queue_capacity, 1000);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_load_reports_path() {
        let err = Config::load(Path::new("/nonexistent/moldb.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/moldb.toml"));
    }
}
