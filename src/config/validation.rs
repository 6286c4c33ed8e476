use super::models::Config;
use std::collections::HashSet;
use thiserror::Error;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_simultaneous_downloads must be at least 1")]
    ZeroSimultaneousDownloads,

    #[error("worker.processes must be at least 1")]
    ZeroProcesses,

    #[error("results.max_abandoned must be at least 1")]
    ZeroMaxAbandoned,

    #[error("Queue name for '{field}' is empty")]
    EmptyQueueName { field: &'static str },

    #[error("Queue '{name}' is configured more than once")]
    DuplicateQueueName { name: String },

    #[error("Webhook url must start with http:// or https://, got '{url}'")]
    InvalidWebhookUrl { url: String },

    #[error("Unknown log level '{level}'")]
    UnknownLogLevel { level: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_worker(config)?;
    validate_queues(config)?;
    validate_notifier(config)?;
    validate_log(config)?;
    Ok(())
}

fn validate_worker(config: &Config) -> Result<(), ValidationError> {
    if config.worker.max_simultaneous_downloads == 0 {
        return Err(ValidationError::ZeroSimultaneousDownloads);
    }
    if config.worker.processes == 0 {
        return Err(ValidationError::ZeroProcesses);
    }
    if config.results.max_abandoned == 0 {
        return Err(ValidationError::ZeroMaxAbandoned);
    }
    Ok(())
}

/// Input and result queues must be distinct, or results would be consumed as requests
fn validate_queues(config: &Config) -> Result<(), ValidationError> {
    let broker = &config.broker;
    let named = [
        ("input_queue", &broker.input_queue),
        ("success_queue", &broker.success_queue),
        ("error_queue", &broker.error_queue),
    ];

    let mut seen = HashSet::new();
    for (field, name) in named {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyQueueName { field });
        }
        if !seen.insert(name.as_str()) {
            return Err(ValidationError::DuplicateQueueName { name: name.clone() });
        }
    }

    Ok(())
}

fn validate_notifier(config: &Config) -> Result<(), ValidationError> {
    if let Some(url) = &config.notifier.webhook_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ValidationError::InvalidWebhookUrl { url: url.clone() });
        }
    }
    Ok(())
}

fn validate_log(config: &Config) -> Result<(), ValidationError> {
    let level = config.log.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(ValidationError::UnknownLogLevel {
            level: config.log.level.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_downloads() {
        let mut config = Config::default();
        config.worker.max_simultaneous_downloads = 0;

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::ZeroSimultaneousDownloads)));
    }

    #[test]
    fn test_zero_processes() {
        let mut config = Config::default();
        config.worker.processes = 0;

        assert!(matches!(validate(&config), Err(ValidationError::ZeroProcesses)));
    }

    #[test]
    fn test_zero_max_abandoned() {
        let mut config = Config::default();
        config.results.max_abandoned = 0;

        assert!(matches!(validate(&config), Err(ValidationError::ZeroMaxAbandoned)));
    }

    #[test]
    fn test_empty_queue_name() {
        let mut config = Config::default();
        config.broker.error_queue = "  ".to_string();

        let result = validate(&config);
        assert!(matches!(
            result,
            Err(ValidationError::EmptyQueueName { field: "error_queue" })
        ));
    }

    #[test]
    fn test_duplicate_queue_name() {
        let mut config = Config::default();
        config.broker.success_queue = config.broker.input_queue.clone();

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::DuplicateQueueName { .. })));
    }

    #[test]
    fn test_webhook_scheme() {
        let mut config = Config::default();
        config.notifier.webhook_url = Some("ftp://hooks.local".to_string());
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidWebhookUrl { .. })
        ));

        config.notifier.webhook_url = Some("https://hooks.local/vidbox".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_log_level() {
        let mut config = Config::default();
        config.log.level = "WARN".to_string();
        assert!(validate(&config).is_ok());

        config.log.level = "loud".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::UnknownLogLevel { .. })
        ));
    }
}
