//! Configuration validation utilities

use crate::{config::*, ConfigError, Result};
use std::net::SocketAddr;

/// Fixed frame header size; no frame can be shorter
const HEADER_LENGTH: usize = 16;
const MAX_FRAME_CEILING: usize = 1024 * 1024 * 1024; // 1GB

/// Validate complete configuration
pub fn validate_config(config: &RpcConfig) -> Result<()> {
    validate_app_config(&config.app)?;
    validate_server_config(&config.server)?;
    validate_client_config(&config.client)?;
    validate_codec_config(&config.codec)?;
    validate_load_balance_config(&config.load_balance)?;
    validate_registry_config(&config.registry)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

/// Validate application configuration
pub fn validate_app_config(config: &AppConfig) -> Result<()> {
    if config.name.is_empty() {
        return Err(ConfigError::Validation("App name cannot be empty".to_string()));
    }

    let valid_environments = ["development", "dev", "staging", "stage", "production", "prod", "test"];
    if !valid_environments.contains(&config.environment.as_str()) {
        return Err(ConfigError::Validation(format!(
            "Invalid environment '{}'. Valid values: {:?}",
            config.environment, valid_environments
        )));
    }

    Ok(())
}

/// Validate server configuration
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.bind_address.parse::<SocketAddr>().is_err() {
        return Err(ConfigError::Validation(format!(
            "Server bind address '{}' is not a socket address",
            config.bind_address
        )));
    }

    if let Some(ref host) = config.advertise_host {
        if host.is_empty() {
            return Err(ConfigError::Validation("Advertise host cannot be empty".to_string()));
        }
    }

    if config.read_idle_secs == 0 {
        return Err(ConfigError::Validation("Read idle interval must be greater than 0".to_string()));
    }

    if config.dispatch_backlog == 0 {
        return Err(ConfigError::Validation("Dispatch backlog must be greater than 0".to_string()));
    }

    if config.outbound_queue == 0 {
        return Err(ConfigError::Validation("Server outbound queue must be greater than 0".to_string()));
    }

    if config.write_timeout_ms == 0 {
        return Err(ConfigError::Validation("Write timeout must be greater than 0".to_string()));
    }

    Ok(())
}

/// Validate client configuration
pub fn validate_client_config(config: &ClientConfig) -> Result<()> {
    if config.connect_timeout_ms == 0 {
        return Err(ConfigError::Validation("Connect timeout must be greater than 0".to_string()));
    }

    if config.write_idle_secs == 0 {
        return Err(ConfigError::Validation("Write idle interval must be greater than 0".to_string()));
    }

    if config.outbound_queue == 0 {
        return Err(ConfigError::Validation("Client outbound queue must be greater than 0".to_string()));
    }

    if config.request_timeout_ms == Some(0) {
        return Err(ConfigError::Validation("Request timeout must be greater than 0".to_string()));
    }

    Ok(())
}

/// Validate codec configuration
pub fn validate_codec_config(config: &CodecConfig) -> Result<()> {
    if config.serializer.is_empty() {
        return Err(ConfigError::Validation("Serializer name cannot be empty".to_string()));
    }

    if config.compress.is_empty() {
        return Err(ConfigError::Validation("Compressor name cannot be empty".to_string()));
    }

    if config.max_frame_length <= HEADER_LENGTH {
        return Err(ConfigError::Validation(format!(
            "Max frame length must exceed the {} byte header",
            HEADER_LENGTH
        )));
    }

    if config.max_frame_length > MAX_FRAME_CEILING {
        return Err(ConfigError::Validation("Max frame length should not exceed 1GB".to_string()));
    }

    Ok(())
}

/// Validate load balancing configuration
pub fn validate_load_balance_config(config: &LoadBalanceConfig) -> Result<()> {
    if config.strategy.is_empty() {
        return Err(ConfigError::Validation("Load balance strategy cannot be empty".to_string()));
    }

    // Ring points are generated four per digest.
    if config.replicas == 0 || config.replicas % 4 != 0 {
        return Err(ConfigError::Validation(
            "Replicas must be a positive multiple of 4".to_string(),
        ));
    }

    Ok(())
}

/// Validate registry configuration
pub fn validate_registry_config(config: &RegistryConfig) -> Result<()> {
    if config.backend.is_empty() {
        return Err(ConfigError::Validation("Registry backend cannot be empty".to_string()));
    }

    if !config.root_path.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "Registry root path '{}' must be absolute",
            config.root_path
        )));
    }

    Ok(())
}

/// Validate logging configuration
pub fn validate_logging_config(config: &LoggingConfig) -> Result<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.level.as_str()) {
        return Err(ConfigError::Validation(format!(
            "Invalid log level '{}'. Valid values: {:?}",
            config.level, valid_levels
        )));
    }

    let valid_formats = ["text", "json"];
    if !valid_formats.contains(&config.format.as_str()) {
        return Err(ConfigError::Validation(format!(
            "Invalid log format '{}'. Valid values: {:?}",
            config.format, valid_formats
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&RpcConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_bind_address() {
        let mut config = RpcConfig::default();
        config.server.bind_address = "localhost".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = RpcConfig::default();
        config.client.connect_timeout_ms = 0;
        assert!(validate_client_config(&config.client).is_err());

        let mut config = RpcConfig::default();
        config.client.request_timeout_ms = Some(0);
        assert!(validate_client_config(&config.client).is_err());

        let mut config = RpcConfig::default();
        config.server.read_idle_secs = 0;
        assert!(validate_server_config(&config.server).is_err());
    }

    #[test]
    fn test_zero_dispatch_backlog_rejected() {
        let mut config = RpcConfig::default();
        config.server.dispatch_backlog = 0;
        assert!(matches!(
            validate_server_config(&config.server),
            Err(ConfigError::Validation(msg)) if msg.contains("backlog")
        ));
    }

    #[test]
    fn test_frame_length_bounds() {
        let mut codec = CodecConfig::default();
        codec.max_frame_length = 16;
        assert!(validate_codec_config(&codec).is_err());

        codec.max_frame_length = 2 * 1024 * 1024 * 1024;
        assert!(validate_codec_config(&codec).is_err());

        codec.max_frame_length = 17;
        assert!(validate_codec_config(&codec).is_ok());
    }

    #[test]
    fn test_replicas_multiple_of_four() {
        let mut lb = LoadBalanceConfig::default();
        lb.replicas = 10;
        assert!(validate_load_balance_config(&lb).is_err());
        lb.replicas = 8;
        assert!(validate_load_balance_config(&lb).is_ok());
    }

    #[test]
    fn test_logging_validation() {
        let mut logging = LoggingConfig::default();
        logging.level = "verbose".to_string();
        assert!(validate_logging_config(&logging).is_err());

        let mut logging = LoggingConfig::default();
        logging.format = "xml".to_string();
        assert!(validate_logging_config(&logging).is_err());
    }

    #[test]
    fn test_relative_root_path() {
        let mut registry = RegistryConfig::default();
        registry.root_path = "minirpc".to_string();
        assert!(validate_registry_config(&registry).is_err());
    }
}
