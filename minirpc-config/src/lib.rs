//! # minirpc configuration
//!
//! Configuration management for minirpc clients and servers.
//! Supports YAML, TOML, JSON formats with environment variable overrides.

pub mod builder;
pub mod config;
pub mod env;
pub mod loader;
pub mod logging;
pub mod validation;

pub use builder::ConfigBuilder;
pub use config::*;
pub use env::EnvOverride;
pub use loader::ConfigLoader;
pub use logging::init_logging;

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Logging setup error: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
