use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "VIDBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/vidbox.toml";
const ENV_PREFIX: &str = "VIDBOX";
const ENV_SEPARATOR: &str = "__";

const LEGACY_MAX_DOWNLOADS: &str = "MAX_SIMULTANEOUS_DOWNLOADS";
const LEGACY_LOG_LEVEL: &str = "LOG_LEVEL";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables, legacy bare names last
///
/// An explicit `path` wins over `VIDBOX_CONFIG` and the default location.
pub fn load(path: Option<PathBuf>) -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let config_path = path.unwrap_or_else(|| {
        env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    });

    let mut config = load_from_sources(config_path)?;
    apply_legacy_overrides(&mut config, |key| env::var(key).ok())?;

    Ok(config)
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // VIDBOX__WORKER__MAX_SIMULTANEOUS_DOWNLOADS -> worker.max_simultaneous_downloads
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

/// Bare variables understood by older deployments
pub(crate) fn apply_legacy_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(LEGACY_MAX_DOWNLOADS) {
        config.worker.max_simultaneous_downloads = raw.trim().parse().map_err(|_| {
            ConfigError::Message(format!("{} must be an integer, got '{}'", LEGACY_MAX_DOWNLOADS, raw))
        })?;
    }

    if let Some(level) = lookup(LEGACY_LOG_LEVEL) {
        config.log.level = level.trim().to_ascii_lowercase();
    }

    Ok(())
}
