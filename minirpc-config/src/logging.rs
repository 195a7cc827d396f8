//! Tracing subscriber setup

use crate::{config::LoggingConfig, ConfigError, Result};
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber for `config`
///
/// `RUST_LOG` takes precedence over the configured level. Returns an error
/// if a global subscriber is already installed; callers that may run twice
/// (tests, embedded servers) can ignore it.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    let installed = match config.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };

    installed.map_err(|e| ConfigError::Logging(e.to_string()))
}

/// Build the level filter, preferring `RUST_LOG` when set
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ConfigError::Logging(format!("invalid level '{}': {}", config.level, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_filter_from_level() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: "text".to_string(),
        };
        assert!(build_filter(&config).is_ok());
    }
}
