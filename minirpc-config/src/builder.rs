//! Configuration builder for programmatic config creation

use crate::config::*;
use std::path::PathBuf;

/// Fluent configuration builder
#[derive(Default)]
pub struct ConfigBuilder {
    config: RpcConfig,
}

impl ConfigBuilder {
    /// Create a new config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set application name
    pub fn app(mut self, name: &str) -> Self {
        self.config.app.name = name.to_string();
        self
    }

    /// Set environment
    pub fn environment(mut self, env: &str) -> Self {
        self.config.app.environment = env.to_string();
        self
    }

    /// Configure the server
    pub fn server(mut self, f: impl FnOnce(ServerBuilder) -> ServerBuilder) -> Self {
        self.config.server = f(ServerBuilder::new(self.config.server)).build();
        self
    }

    /// Configure the client
    pub fn client(mut self, f: impl FnOnce(ClientBuilder) -> ClientBuilder) -> Self {
        self.config.client = f(ClientBuilder::new(self.config.client)).build();
        self
    }

    /// Select serializer and compressor by extension name
    pub fn codec(mut self, serializer: &str, compress: &str) -> Self {
        self.config.codec.serializer = serializer.to_string();
        self.config.codec.compress = compress.to_string();
        self
    }

    /// Set the largest accepted frame
    pub fn max_frame_length(mut self, max: usize) -> Self {
        self.config.codec.max_frame_length = max;
        self
    }

    /// Select the load balancer by extension name
    pub fn load_balance(mut self, strategy: &str) -> Self {
        self.config.load_balance.strategy = strategy.to_string();
        self
    }

    /// Set virtual nodes per address on the hash ring
    pub fn replicas(mut self, replicas: usize) -> Self {
        self.config.load_balance.replicas = replicas;
        self
    }

    /// Select the registry backend and its root path
    pub fn registry(mut self, backend: &str, root_path: &str) -> Self {
        self.config.registry.backend = backend.to_string();
        self.config.registry.root_path = root_path.to_string();
        self
    }

    /// Add a directory scanned for extension catalogs
    pub fn extension_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.extensions.search_paths.push(path.into());
        self
    }

    /// Configure logging
    pub fn logging(mut self, level: &str, format: &str) -> Self {
        self.config.logging.level = level.to_string();
        self.config.logging.format = format.to_string();
        self
    }

    /// Build the final configuration
    pub fn build(self) -> RpcConfig {
        self.config
    }
}

/// Server configuration builder
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn bind_address(mut self, addr: &str) -> Self {
        self.config.bind_address = addr.to_string();
        self
    }

    pub fn advertise_host(mut self, host: &str) -> Self {
        self.config.advertise_host = Some(host.to_string());
        self
    }

    pub fn read_idle_secs(mut self, secs: u64) -> Self {
        self.config.read_idle_secs = secs;
        self
    }

    pub fn dispatch_workers(mut self, workers: usize) -> Self {
        self.config.dispatch_workers = workers;
        self
    }

    pub fn dispatch_backlog(mut self, backlog: usize) -> Self {
        self.config.dispatch_backlog = backlog;
        self
    }

    pub fn outbound_queue(mut self, capacity: usize) -> Self {
        self.config.outbound_queue = capacity;
        self
    }

    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    fn build(self) -> ServerConfig {
        self.config
    }
}

/// Client configuration builder
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn write_idle_secs(mut self, secs: u64) -> Self {
        self.config.write_idle_secs = secs;
        self
    }

    pub fn outbound_queue(mut self, capacity: usize) -> Self {
        self.config.outbound_queue = capacity;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = Some(ms);
        self
    }

    fn build(self) -> ClientConfig {
        self.config
    }
}
