//! RPC server implementation

use crate::codec::WireCodec;
use crate::connection::{Connection, ConnectionOptions, FrameHandler, UnsentFrame};
use crate::dispatcher::{RequestDispatcher, RpcService, ServiceTable};
use crate::protocol::{Envelope, Payload, Response, ServiceKey};
use minirpc_config::RpcConfig;
use minirpc_core::{Error, ErrorCategory, PluginRegistry, Result};
use minirpc_net::{address, ServiceRegistry};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// RPC server configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    /// Address to listen on
    pub bind_address: String,
    /// Host published to the registry instead of the bound one
    pub advertise_host: Option<String>,
    /// Close connections silent for this long
    pub read_idle: Option<Duration>,
    /// Concurrent dispatches
    pub dispatch_workers: usize,
    /// Requests accepted but not yet answered; beyond this they get FAIL
    pub dispatch_backlog: usize,
    /// Per-connection outbound queue capacity
    pub outbound_queue: usize,
    /// How long a response may wait for outbound queue space
    pub write_timeout: Duration,
    /// Largest accepted frame
    pub max_frame_length: usize,
    /// Registry extension used for publication
    pub registry: String,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self::from(&RpcConfig::default())
    }
}

impl From<&RpcConfig> for RpcServerConfig {
    fn from(config: &RpcConfig) -> Self {
        Self {
            bind_address: config.server.bind_address.clone(),
            advertise_host: config.server.advertise_host.clone(),
            read_idle: Some(config.server.read_idle()).filter(|d| !d.is_zero()),
            dispatch_workers: config.server.effective_dispatch_workers(),
            dispatch_backlog: config.server.dispatch_backlog,
            outbound_queue: config.server.outbound_queue,
            write_timeout: config.server.write_timeout(),
            max_frame_length: config.codec.max_frame_length,
            registry: config.registry.backend.clone(),
        }
    }
}

const ENCODE_FAILURE: &str = "response could not be encoded";

/// Dispatches inbound requests on the blocking pool and queues the replies
struct ServerHandler {
    dispatcher: RequestDispatcher,
    permits: Arc<Semaphore>,
    backlog: Arc<Semaphore>,
    write_timeout: Duration,
}

impl FrameHandler for ServerHandler {
    fn on_frame(&self, connection: &Connection, envelope: Envelope) {
        let (codec, compression) = (envelope.codec, envelope.compression);
        let request = match envelope.payload {
            Payload::Request(request) => request,
            other => {
                warn!(
                    "Ignoring unexpected {:?} frame from {}",
                    other.message_type(),
                    connection.peer()
                );
                return;
            }
        };

        let Ok(admitted) = self.backlog.clone().try_acquire_owned() else {
            warn!(
                "Dispatch backlog is full, answering {} from {} with FAIL",
                request.correlation_id,
                connection.peer()
            );
            let busy = Response::fail(request.correlation_id, "server is busy");
            if let Err(e) = connection.send(Envelope::response(codec, compression, busy)) {
                warn!("Dropping busy reply to {}: {}", connection.peer(), e);
            }
            return;
        };

        let connection = connection.clone();
        let dispatcher = self.dispatcher.clone();
        let permits = self.permits.clone();
        let write_timeout = self.write_timeout;

        tokio::spawn(async move {
            let _admitted = admitted;
            let Ok(permit) = permits.acquire_owned().await else {
                return;
            };
            let correlation_id = request.correlation_id.clone();
            let response = match tokio::task::spawn_blocking(move || {
                let _permit = permit;
                dispatcher.dispatch(request)
            })
            .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!("Dispatch task for {} failed: {}", correlation_id, e);
                    Response::fail(correlation_id, format!("dispatch failed: {}", e))
                }
            };
            reply(&connection, Envelope::response(codec, compression, response), write_timeout).await;
        });
    }

    /// Answer a response the codec refused with FAIL, so its caller is not
    /// left waiting. A FAIL that cannot be encoded either closes the connection.
    fn on_write_error(&self, connection: &Connection, frame: &UnsentFrame, error: &Error) {
        if matches!(error.category(), ErrorCategory::Io | ErrorCategory::Transport) {
            return;
        }
        let Some(correlation_id) = frame.correlation_id.clone() else {
            return;
        };

        let substitute = match frame.failure.as_deref() {
            None => Response::fail(correlation_id.as_str(), format!("{}: {}", ENCODE_FAILURE, error)),
            Some(message) if message != ENCODE_FAILURE => Response::fail(correlation_id.as_str(), ENCODE_FAILURE),
            Some(_) => {
                warn!(
                    "Cannot encode any reply to {} for {}, closing",
                    correlation_id,
                    connection.peer()
                );
                connection.close();
                return;
            }
        };

        warn!(
            "Response {} to {} could not be encoded, answering with FAIL: {}",
            correlation_id,
            connection.peer(),
            error
        );
        let envelope = Envelope::response(frame.codec, frame.compression, substitute);
        if let Err(e) = connection.send(envelope) {
            warn!(
                "Cannot queue FAIL for {} to {}, closing: {}",
                correlation_id,
                connection.peer(),
                e
            );
            connection.close();
        }
    }

    fn on_close(&self, connection: &Connection) {
        debug!("Client {} disconnected", connection.peer());
    }
}

/// Queue a response, degrading to FAIL when the connection is saturated
///
/// A saturated connection gets a FAIL response in place of the result, queued
/// with a bounded wait; if the queue stays full the response is dropped.
async fn reply(connection: &Connection, envelope: Envelope, write_timeout: Duration) {
    let correlation_id = envelope.correlation_id().unwrap_or_default().to_string();
    if !connection.is_open() {
        warn!(
            "Dropping response {}: connection to {} is closed",
            correlation_id,
            connection.peer()
        );
        return;
    }

    let envelope = if connection.is_writable() {
        envelope
    } else {
        warn!(
            "Connection to {} is not writable, answering {} with FAIL",
            connection.peer(),
            correlation_id
        );
        Envelope::response(
            envelope.codec,
            envelope.compression,
            Response::fail(correlation_id.clone(), "server outbound queue is full"),
        )
    };

    if let Err(e) = connection.send_timeout(envelope, write_timeout).await {
        warn!(
            "Dropping response {} to {}: {}",
            correlation_id,
            connection.peer(),
            e
        );
    }
}

async fn accept_loop(
    listener: TcpListener,
    codec: WireCodec,
    options: ConnectionOptions,
    handler: Arc<dyn FrameHandler>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    debug!("Accepted connection from {}", peer);
                    Connection::spawn(stream, peer, codec.clone(), options.clone(), handler.clone(), &token);
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
    debug!("Accept loop stopped");
}

/// RPC server
///
/// Services are registered before [`RpcServer::start`]; published services
/// are announced to the registry once the listener is bound.
pub struct RpcServer {
    config: RpcServerConfig,
    plugins: Arc<PluginRegistry>,
    services: Arc<ServiceTable>,
    published: Mutex<Vec<String>>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, plugins: Arc<PluginRegistry>) -> Self {
        Self {
            config,
            plugins,
            services: Arc::new(ServiceTable::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &RpcConfig, plugins: Arc<PluginRegistry>) -> Self {
        Self::new(RpcServerConfig::from(config), plugins)
    }

    pub fn config(&self) -> &RpcServerConfig {
        &self.config
    }

    pub fn services(&self) -> &Arc<ServiceTable> {
        &self.services
    }

    /// Serve `service` under `key` without announcing it
    pub fn register_service(&self, key: &ServiceKey, service: RpcService) -> bool {
        self.services.insert(&key.to_string(), service)
    }

    /// Serve `service` and announce it to the registry on start
    pub fn publish_service(&self, key: &ServiceKey, service: RpcService) -> bool {
        let inserted = self.register_service(key, service);
        if inserted {
            self.published.lock().push(key.to_string());
        }
        inserted
    }

    /// Bind, start accepting and publish
    pub async fn start(&self) -> Result<ServerHandle> {
        let published = self.published.lock().clone();
        let registry = if published.is_empty() {
            None
        } else {
            Some(self.plugins.resolve::<dyn ServiceRegistry>(&self.config.registry)?)
        };

        let bind_addr = address::resolve(&self.config.bind_address).await?;
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let advertised = self.advertised_address(local_addr).await?;

        let token = CancellationToken::new();
        let handler = Arc::new(ServerHandler {
            dispatcher: RequestDispatcher::new(self.services.clone()),
            permits: Arc::new(Semaphore::new(self.config.dispatch_workers.max(1))),
            backlog: Arc::new(Semaphore::new(self.config.dispatch_backlog.max(1))),
            write_timeout: self.config.write_timeout,
        });
        let options = ConnectionOptions {
            outbound_queue: self.config.outbound_queue,
            write_idle: None,
            read_idle: self.config.read_idle,
            ..Default::default()
        };
        tokio::spawn(accept_loop(
            listener,
            WireCodec::with_max_frame_length(self.plugins.clone(), self.config.max_frame_length),
            options,
            handler,
            token.clone(),
        ));
        info!(
            "RPC server listening on {} with {} services",
            local_addr,
            self.services.len()
        );

        let mut handle = ServerHandle {
            local_addr,
            advertised,
            token,
            registry,
            paths: Vec::new(),
        };
        if let Some(registry) = handle.registry.clone() {
            for service in &published {
                match registry.register(service, advertised).await {
                    Ok(path) => handle.paths.push(path),
                    Err(e) => {
                        error!("Publishing {} failed: {}", service, e);
                        handle.shutdown().await?;
                        return Err(e);
                    }
                }
            }
        }
        Ok(handle)
    }

    async fn advertised_address(&self, local_addr: SocketAddr) -> Result<SocketAddr> {
        if let Some(host) = &self.config.advertise_host {
            return address::resolve(&address::format_address(host, local_addr.port())).await;
        }
        let ip = match local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        Ok(SocketAddr::new(ip, local_addr.port()))
    }
}

/// A running server
///
/// Dropping the handle stops the server without deregistering; call
/// [`ServerHandle::shutdown`] to remove its registry paths as well.
pub struct ServerHandle {
    local_addr: SocketAddr,
    advertised: SocketAddr,
    token: CancellationToken,
    registry: Option<Arc<dyn ServiceRegistry>>,
    paths: Vec<String>,
}

impl ServerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address published to the registry
    pub fn advertised_addr(&self) -> SocketAddr {
        self.advertised
    }

    /// Registry paths this server created
    pub fn registered_paths(&self) -> &[String] {
        &self.paths
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stop accepting, close every connection and deregister
    pub async fn shutdown(&mut self) -> Result<()> {
        self.token.cancel();

        let paths = std::mem::take(&mut self.paths);
        if let Some(registry) = self.registry.take() {
            let mut failed = None;
            for path in &paths {
                if let Err(e) = registry.deregister(path).await {
                    warn!("Deregistering {} failed: {}", path, e);
                    failed.get_or_insert(e);
                }
            }
            if let Some(e) = failed {
                return Err(e);
            }
        }

        info!("RPC server on {} shut down", self.local_addr);
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
