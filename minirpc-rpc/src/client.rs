//! RPC client implementation

use crate::codec::WireCodec;
use crate::compress::Compress;
use crate::connection::{Connection, ConnectionOptions, FrameHandler, UnsentFrame};
use crate::pending::{PendingCallTable, PendingResponse};
use crate::pool::ConnectionPool;
use crate::protocol::{Envelope, Payload, Request, Response, ServiceKey};
use crate::serializer::Serializer;
use crate::stub::{RequestTransport, ServiceProxy};
use async_trait::async_trait;
use minirpc_config::RpcConfig;
use minirpc_core::{Error, PluginRegistry, Result};
use minirpc_net::{address, LoadBalance, ServiceDiscovery};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// RPC client configuration
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Serializer extension name
    pub serializer: String,
    /// Compressor extension name
    pub compress: String,
    /// Load balancer extension name
    pub load_balance: String,
    /// Service discovery extension name
    pub discovery: String,
    /// Largest accepted frame
    pub max_frame_length: usize,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Heartbeat after this long without writes
    pub write_idle: Option<Duration>,
    /// Per-connection outbound queue capacity
    pub outbound_queue: usize,
    /// Deadline applied by [`RpcClient::call`] and proxies
    pub request_timeout: Option<Duration>,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self::from(&RpcConfig::default())
    }
}

impl From<&RpcConfig> for RpcClientConfig {
    fn from(config: &RpcConfig) -> Self {
        Self {
            serializer: config.codec.serializer.clone(),
            compress: config.codec.compress.clone(),
            load_balance: config.load_balance.strategy.clone(),
            discovery: config.registry.backend.clone(),
            max_frame_length: config.codec.max_frame_length,
            connect_timeout: config.client.connect_timeout(),
            write_idle: Some(config.client.write_idle()).filter(|d| !d.is_zero()),
            outbound_queue: config.client.outbound_queue,
            request_timeout: config.client.request_timeout(),
        }
    }
}

/// Routes inbound responses to their pending calls
struct ClientHandler {
    pending: Arc<PendingCallTable>,
}

impl FrameHandler for ClientHandler {
    fn on_frame(&self, connection: &Connection, envelope: Envelope) {
        match envelope.payload {
            Payload::Response(response) => {
                self.pending.complete(response);
            }
            other => warn!(
                "Ignoring unexpected {:?} frame from {}",
                other.message_type(),
                connection.peer()
            ),
        }
    }

    fn on_write_error(&self, connection: &Connection, frame: &UnsentFrame, error: &Error) {
        if let Some(id) = frame.correlation_id.as_deref() {
            self.pending.fail(
                id,
                Error::SendFailed(format!("request {} to {}: {}", id, connection.peer(), error)),
            );
        }
    }

    fn on_close(&self, connection: &Connection) {
        self.pending.fail_connection(
            connection.id(),
            Error::ConnectionClosed(format!("connection to {} closed", connection.peer())),
        );
    }
}

/// Pooled RPC client
///
/// Calls are routed through service discovery and the load balancer, then
/// sent on a pooled connection. Responses are matched to calls by
/// correlation id, so any number of calls may be in flight per connection.
pub struct RpcClient {
    config: RpcClientConfig,
    codec_id: u8,
    compression_id: u8,
    discovery: Arc<dyn ServiceDiscovery>,
    balancer: Arc<dyn LoadBalance>,
    pool: ConnectionPool,
    pending: Arc<PendingCallTable>,
}

impl RpcClient {
    /// Create a client whose plugins are resolved from `plugins`
    pub fn new(config: RpcClientConfig, plugins: Arc<PluginRegistry>) -> Result<Self> {
        let serializer = plugins.resolve::<dyn Serializer>(&config.serializer)?;
        let compressor = plugins.resolve::<dyn Compress>(&config.compress)?;
        let discovery = plugins.resolve::<dyn ServiceDiscovery>(&config.discovery)?;
        let balancer = plugins.resolve::<dyn LoadBalance>(&config.load_balance)?;

        let codec_id = serializer.kind().code();
        let compression_id = compressor.kind().code();
        let pending = PendingCallTable::new();
        let options = ConnectionOptions {
            outbound_queue: config.outbound_queue,
            write_idle: config.write_idle,
            read_idle: None,
            codec: codec_id,
            compression: compression_id,
        };
        let pool = ConnectionPool::new(
            WireCodec::with_max_frame_length(plugins, config.max_frame_length),
            options,
            config.connect_timeout,
            Arc::new(ClientHandler {
                pending: pending.clone(),
            }),
        );

        info!(
            "RPC client using {} + {} with {} balancing",
            config.serializer,
            config.compress,
            balancer.name()
        );

        Ok(Self {
            config,
            codec_id,
            compression_id,
            discovery,
            balancer,
            pool,
            pending,
        })
    }

    /// Create a client from the application configuration
    pub fn from_config(config: &RpcConfig, plugins: Arc<PluginRegistry>) -> Result<Self> {
        Self::new(RpcClientConfig::from(config), plugins)
    }

    pub fn config(&self) -> &RpcClientConfig {
        &self.config
    }

    /// Send `request` to a provider of its service
    ///
    /// Lookup failures are returned before any connection is attempted.
    pub async fn invoke(&self, request: Request) -> Result<PendingResponse> {
        let candidates = self.discovery.lookup(&request.service_name).await?;
        if candidates.is_empty() {
            return Err(Error::ServiceNotFound(request.service_name.clone()));
        }

        let selected = self.balancer.select(&candidates, &request)?;
        let addr = address::resolve(&selected).await?;
        debug!(
            "Routing {} for {} to {}",
            request.correlation_id, request.service_name, addr
        );
        self.send_to(addr, request).await
    }

    /// Send `request` to a known address, bypassing discovery
    pub async fn send_to(&self, addr: SocketAddr, request: Request) -> Result<PendingResponse> {
        let connection = self.pool.get(addr).await?;
        if !connection.is_writable() {
            if !connection.is_open() {
                self.pool.evict_connection(&addr, connection.id());
            }
            return Err(Error::ChannelNotActive(format!(
                "connection to {} is not writable",
                addr
            )));
        }

        let pending = self.pending.register(&request.correlation_id, connection.id())?;
        let envelope = Envelope::request(self.codec_id, self.compression_id, request);
        if let Err(e) = connection.send(envelope) {
            // A queue filled by a concurrent caller is not a broken connection
            if connection.is_open() {
                debug!("Connection to {} is saturated: {}", addr, e);
            } else {
                warn!("Connection to {} closed while sending: {}", addr, e);
                self.pool.evict_connection(&addr, connection.id());
            }
            return Err(e);
        }
        Ok(pending)
    }

    /// Invoke and wait, applying the configured request timeout
    pub async fn call(&self, request: Request) -> Result<Response> {
        let pending = self.invoke(request).await?;
        match self.config.request_timeout {
            Some(timeout) => pending.timeout(timeout).await,
            None => pending.await,
        }
    }

    /// Invoke-by-name stub for `key` over this client
    pub fn proxy(self: &Arc<Self>, key: ServiceKey) -> ServiceProxy {
        let proxy = ServiceProxy::new(self.clone(), key);
        match self.config.request_timeout {
            Some(timeout) => proxy.with_timeout(timeout),
            None => proxy,
        }
    }

    /// Calls awaiting a response
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Cached connections
    pub fn connection_count(&self) -> usize {
        self.pool.len()
    }

    /// Close every connection, failing calls still in flight
    pub fn shutdown(&self) {
        info!("Shutting down RPC client");
        self.pool.close_all();
    }
}

/// Builder for [`RpcClient`]
#[derive(Debug, Clone, Default)]
pub struct RpcClientBuilder {
    config: RpcClientConfig,
}

impl RpcClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the application configuration
    pub fn from_config(config: &RpcConfig) -> Self {
        Self {
            config: RpcClientConfig::from(config),
        }
    }

    /// Set serializer extension name
    pub fn serializer(mut self, name: impl Into<String>) -> Self {
        self.config.serializer = name.into();
        self
    }

    /// Set compressor extension name
    pub fn compress(mut self, name: impl Into<String>) -> Self {
        self.config.compress = name.into();
        self
    }

    /// Set load balancer extension name
    pub fn load_balance(mut self, name: impl Into<String>) -> Self {
        self.config.load_balance = name.into();
        self
    }

    /// Set service discovery extension name
    pub fn discovery(mut self, name: impl Into<String>) -> Self {
        self.config.discovery = name.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Heartbeat interval; `None` disables heartbeats
    pub fn write_idle(mut self, interval: Option<Duration>) -> Self {
        self.config.write_idle = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    pub fn build(self, plugins: Arc<PluginRegistry>) -> Result<RpcClient> {
        RpcClient::new(self.config, plugins)
    }
}

#[async_trait]
impl RequestTransport for RpcClient {
    async fn send_request(&self, request: Request) -> Result<PendingResponse> {
        self.invoke(request).await
    }
}
