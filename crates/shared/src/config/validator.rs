//! Configuration validation

use super::dto::DispatchConfig;
use super::error::{ConfigError, Result};

/// Validate a complete dispatch configuration.
pub fn validate_dispatch_config(config: &DispatchConfig) -> Result<()> {
    if config.orchestrator.max_handler_concurrency == 0 {
        return Err(ConfigError::Validation(
            "max_handler_concurrency must be at least 1".to_string(),
        ));
    }

    if config.orchestrator.handler_timeout_secs == Some(0) {
        return Err(ConfigError::Validation(
            "handler_timeout_secs must be greater than 0 when set".to_string(),
        ));
    }

    if config.sweeper.interval_ms == 0 || config.outbox.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "polling intervals must be greater than 0".to_string(),
        ));
    }

    if config.sweeper.batch_size == 0 || config.outbox.batch_size == 0 {
        return Err(ConfigError::Validation(
            "batch sizes must be greater than 0".to_string(),
        ));
    }

    if config.scheduler.queue_depth == 0 {
        return Err(ConfigError::Validation(
            "scheduler queue_depth must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_dispatch_config(&DispatchConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        let mut config = DispatchConfig::default();
        config.orchestrator.max_handler_concurrency = 0;
        assert!(matches!(
            validate_dispatch_config(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_timeout_is_invalid() {
        let mut config = DispatchConfig::default();
        config.orchestrator.handler_timeout_secs = Some(0);
        assert!(validate_dispatch_config(&config).is_err());
    }

    #[test]
    fn test_zero_batch_is_invalid() {
        let mut config = DispatchConfig::default();
        config.outbox.batch_size = 0;
        assert!(validate_dispatch_config(&config).is_err());
    }
}
