//! Configuration management for vidbox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use vidbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `VIDBOX__<section>__<key>`
//!
//! Examples:
//! - `VIDBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `VIDBOX__WORKER__MAX_SIMULTANEOUS_DOWNLOADS=3`
//! - `VIDBOX__NOTIFIER__WEBHOOK_URL=https://bot.internal/hooks/tasks`
//!
//! `MAX_SIMULTANEOUS_DOWNLOADS` and `LOG_LEVEL` are also read without prefix.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/vidbox.toml`.
//! This can be overridden using the `VIDBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    BrokerConfig, Config, LogConfig, NotifierConfig, ResultsConfig, ServerConfig, StorageConfig,
    StorageProvider, WorkerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed, a legacy
    /// variable cannot be parsed, or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Like [`load`](Self::load), reading `path` instead of the default file
    pub fn load_with(path: Option<std::path::PathBuf>) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load a specific file plus `VIDBOX__*` variables, nothing else
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"
data_dir = "data"

[broker]
input_queue = "download.requests"
success_queue = "download.results.success"
error_queue = "download.results.error"

[worker]
max_simultaneous_downloads = 3
processes = 2
ytdlp_bin = "/usr/local/bin/yt-dlp"
tmp_dir = "/tmp/vidbox"

[results]
restart_backoff_ms = 500
shutdown_grace_ms = 2000
max_abandoned = 5

[storage]
provider = "local"
root = "data/media"

[notifier]
webhook_url = "http://bot:8081/hooks/tasks"

[log]
level = "debug"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.worker.max_simultaneous_downloads, 3);
        assert_eq!(config.results.restart_backoff_ms, 500);
        assert_eq!(config.results.max_abandoned, 5);
        assert_eq!(
            config.notifier.webhook_url.as_deref(),
            Some("http://bot:8081/hooks/tasks")
        );
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_validation_runs_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[worker]\nmax_simultaneous_downloads = 0\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result,
            Err(ConfigError::ValidationError(ValidationError::ZeroSimultaneousDownloads))
        ));
    }
}
