//! Environment variable override support

use crate::{config::RpcConfig, ConfigError, Result};
use std::env;
use std::str::FromStr;

/// Environment variable override utility
pub struct EnvOverride;

impl EnvOverride {
    /// Apply `MINIRPC_*` environment variables to configuration
    pub fn apply(mut config: RpcConfig) -> Result<RpcConfig> {
        // App configuration
        if let Ok(name) = env::var("MINIRPC_APP_NAME") {
            config.app.name = name;
        }
        if let Ok(environment) = env::var("MINIRPC_APP_ENVIRONMENT") {
            config.app.environment = environment;
        }

        // Server configuration
        if let Ok(bind) = env::var("MINIRPC_SERVER_BIND_ADDRESS") {
            config.server.bind_address = bind;
        }
        if let Ok(host) = env::var("MINIRPC_SERVER_ADVERTISE_HOST") {
            config.server.advertise_host = Some(host);
        }
        if let Some(secs) = parse_var("MINIRPC_SERVER_READ_IDLE_SECS")? {
            config.server.read_idle_secs = secs;
        }
        if let Some(workers) = parse_var("MINIRPC_SERVER_DISPATCH_WORKERS")? {
            config.server.dispatch_workers = workers;
        }
        if let Some(backlog) = parse_var("MINIRPC_SERVER_DISPATCH_BACKLOG")? {
            config.server.dispatch_backlog = backlog;
        }
        if let Some(queue) = parse_var("MINIRPC_SERVER_OUTBOUND_QUEUE")? {
            config.server.outbound_queue = queue;
        }
        if let Some(ms) = parse_var("MINIRPC_SERVER_WRITE_TIMEOUT_MS")? {
            config.server.write_timeout_ms = ms;
        }

        // Client configuration
        if let Some(ms) = parse_var("MINIRPC_CLIENT_CONNECT_TIMEOUT_MS")? {
            config.client.connect_timeout_ms = ms;
        }
        if let Some(secs) = parse_var("MINIRPC_CLIENT_WRITE_IDLE_SECS")? {
            config.client.write_idle_secs = secs;
        }
        if let Some(queue) = parse_var("MINIRPC_CLIENT_OUTBOUND_QUEUE")? {
            config.client.outbound_queue = queue;
        }
        if let Some(ms) = parse_var("MINIRPC_CLIENT_REQUEST_TIMEOUT_MS")? {
            config.client.request_timeout_ms = Some(ms);
        }

        // Codec configuration
        if let Ok(serializer) = env::var("MINIRPC_CODEC_SERIALIZER") {
            config.codec.serializer = serializer;
        }
        if let Ok(compress) = env::var("MINIRPC_CODEC_COMPRESS") {
            config.codec.compress = compress;
        }
        if let Some(max) = parse_var("MINIRPC_CODEC_MAX_FRAME_LENGTH")? {
            config.codec.max_frame_length = max;
        }

        // Load balancing and registry
        if let Ok(strategy) = env::var("MINIRPC_LOAD_BALANCE_STRATEGY") {
            config.load_balance.strategy = strategy;
        }
        if let Some(replicas) = parse_var("MINIRPC_LOAD_BALANCE_REPLICAS")? {
            config.load_balance.replicas = replicas;
        }
        if let Ok(backend) = env::var("MINIRPC_REGISTRY_BACKEND") {
            config.registry.backend = backend;
        }
        if let Ok(root) = env::var("MINIRPC_REGISTRY_ROOT_PATH") {
            config.registry.root_path = root;
        }

        // Extension search paths, colon separated
        if let Ok(paths) = env::var("MINIRPC_EXTENSIONS_SEARCH_PATHS") {
            config.extensions.search_paths = env::split_paths(&paths).collect();
        }

        // Logging configuration
        if let Ok(level) = env::var("MINIRPC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = env::var("MINIRPC_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }
}

/// Apply environment variable overrides (convenience function)
pub fn apply_env_overrides(config: RpcConfig) -> Result<RpcConfig> {
    EnvOverride::apply(config)
}

/// Parse a numeric variable, if set
fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Environment(format!("Invalid {}: {}", name, value))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The process environment is shared between test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("MINIRPC_APP_NAME", "from-env");
        env::set_var("MINIRPC_LOAD_BALANCE_REPLICAS", "40");
        env::set_var("MINIRPC_CLIENT_REQUEST_TIMEOUT_MS", "750");
        env::set_var("MINIRPC_SERVER_DISPATCH_BACKLOG", "64");

        let config = EnvOverride::apply(RpcConfig::default()).unwrap();
        assert_eq!(config.app.name, "from-env");
        assert_eq!(config.load_balance.replicas, 40);
        assert_eq!(config.client.request_timeout_ms, Some(750));
        assert_eq!(config.server.dispatch_backlog, 64);

        env::remove_var("MINIRPC_APP_NAME");
        env::remove_var("MINIRPC_LOAD_BALANCE_REPLICAS");
        env::remove_var("MINIRPC_CLIENT_REQUEST_TIMEOUT_MS");
        env::remove_var("MINIRPC_SERVER_DISPATCH_BACKLOG");
    }

    #[test]
    fn test_invalid_number() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("MINIRPC_SERVER_READ_IDLE_SECS", "soon");
        let result = EnvOverride::apply(RpcConfig::default());
        env::remove_var("MINIRPC_SERVER_READ_IDLE_SECS");

        assert!(matches!(result, Err(ConfigError::Environment(_))));
    }

    #[test]
    fn test_parse_var_unset() {
        let value: Option<u64> = parse_var("MINIRPC_TEST_NEVER_SET").unwrap();
        assert!(value.is_none());
    }
}
