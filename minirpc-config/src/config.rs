//! Core configuration structures

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main minirpc configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Application metadata
    #[serde(default)]
    pub app: AppConfig,

    /// Server transport settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Client transport settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Wire codec plugins
    #[serde(default)]
    pub codec: CodecConfig,

    /// Load balancing strategy
    #[serde(default)]
    pub load_balance: LoadBalanceConfig,

    /// Registry backend
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Extension catalog lookup
    #[serde(default)]
    pub extensions: ExtensionsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Application metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Host published to the registry instead of the bound address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_host: Option<String>,

    /// Close a connection after this many seconds without inbound frames
    #[serde(default = "default_read_idle_secs")]
    pub read_idle_secs: u64,

    /// Concurrent dispatch slots (0 = twice the CPU count)
    #[serde(default)]
    pub dispatch_workers: usize,

    /// Requests accepted but not yet answered, across all connections
    #[serde(default = "default_dispatch_backlog")]
    pub dispatch_backlog: usize,

    /// Per-connection outbound frame queue capacity
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// How long a response waits for queue space on a saturated connection
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Send a heartbeat after this many seconds without outbound frames
    #[serde(default = "default_write_idle_secs")]
    pub write_idle_secs: u64,

    /// Per-connection outbound frame queue capacity
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Deadline applied to every call (none by default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

/// Codec configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Serializer extension name
    #[serde(default = "default_serializer")]
    pub serializer: String,

    /// Compressor extension name
    #[serde(default = "default_compress")]
    pub compress: String,

    /// Largest accepted frame, header included
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
}

/// Load balancing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalanceConfig {
    /// Balancer extension name
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Virtual nodes per address on the hash ring
    #[serde(default = "default_replicas")]
    pub replicas: usize,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry/discovery extension name
    #[serde(default = "default_registry_backend")]
    pub backend: String,

    /// Root path for registered services
    #[serde(default = "default_root_path")]
    pub root_path: String,
}

/// Extension catalog configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionsConfig {
    /// Directories scanned for `extensions/<capability>` catalog files
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            advertise_host: None,
            read_idle_secs: default_read_idle_secs(),
            dispatch_workers: 0,
            dispatch_backlog: default_dispatch_backlog(),
            outbound_queue: default_outbound_queue(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            write_idle_secs: default_write_idle_secs(),
            outbound_queue: default_outbound_queue(),
            request_timeout_ms: None,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            serializer: default_serializer(),
            compress: default_compress(),
            max_frame_length: default_max_frame_length(),
        }
    }
}

impl Default for LoadBalanceConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            replicas: default_replicas(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: default_registry_backend(),
            root_path: default_root_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_app_name() -> String { "minirpc".to_string() }
fn default_environment() -> String { "development".to_string() }
fn default_bind_address() -> String { "127.0.0.1:9998".to_string() }
fn default_read_idle_secs() -> u64 { 30 }
fn default_dispatch_backlog() -> usize { 4096 }
fn default_outbound_queue() -> usize { 1024 }
fn default_write_timeout_ms() -> u64 { 3000 }
fn default_connect_timeout_ms() -> u64 { 5000 }
fn default_write_idle_secs() -> u64 { 5 }
fn default_serializer() -> String { "bincode".to_string() }
fn default_compress() -> String { "gzip".to_string() }
fn default_max_frame_length() -> usize { 8 * 1024 * 1024 } // 8MB
fn default_strategy() -> String { "consistent_hash".to_string() }
fn default_replicas() -> usize { 160 }
fn default_registry_backend() -> String { "memory".to_string() }
fn default_root_path() -> String { "/minirpc".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }

impl ServerConfig {
    /// Read-idle interval as Duration
    pub fn read_idle(&self) -> Duration {
        Duration::from_secs(self.read_idle_secs)
    }

    /// Write timeout as Duration
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Dispatch slots with the CPU-based default applied
    pub fn effective_dispatch_workers(&self) -> usize {
        if self.dispatch_workers > 0 {
            return self.dispatch_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(8)
    }
}

impl ClientConfig {
    /// Connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Heartbeat interval as Duration
    pub fn write_idle(&self) -> Duration {
        Duration::from_secs(self.write_idle_secs)
    }

    /// Per-call deadline, if configured
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

impl RpcConfig {
    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.app.environment == "development" || self.app.environment == "dev"
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.app.environment == "production" || self.app.environment == "prod"
    }
}
