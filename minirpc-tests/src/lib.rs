//! # minirpc integration fixtures
//!
//! Shared setup for the socket-level scenarios under `tests/`: a sample
//! `Hello` service with a typed stub, and a [`TestEnvironment`] that runs
//! servers and a client against one in-process registry.

use minirpc_config::{init_logging, LoggingConfig, RpcConfig};
use minirpc_core::{Error, PluginRegistry, Result};
use minirpc_rpc::{
    default_registry, RpcClient, RpcClientBuilder, RpcServer, RpcServerConfig, RpcService,
    ServerHandle, ServiceKey, ServiceProxy, Value,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Install a subscriber for test output; later calls are no-ops
pub fn init_test_logging() {
    let _ = init_logging(&LoggingConfig {
        level: "debug".to_string(),
        format: "text".to_string(),
    });
}

pub fn hello_key() -> ServiceKey {
    ServiceKey::new("Hello", "g1", "v1")
}

/// `hello(String) -> String`: "ping" answers "pong", anything else is greeted
///
/// `nap(i64)` sleeps for the given milliseconds and returns them, and
/// `whoami()` returns `server_name`, as does `whoami(String)`, which routes
/// by its argument.
pub fn hello_service(server_name: &str) -> RpcService {
    let server_name = server_name.to_string();
    RpcService::new("Hello")
        .unary("hello", |name: String| {
            Ok(match name.as_str() {
                "ping" => "pong".to_string(),
                _ => format!("hello {}", name),
            })
        })
        .unary("nap", |millis: i64| {
            let millis = u64::try_from(millis)
                .map_err(|_| Error::InvalidArguments("negative duration".to_string()))?;
            std::thread::sleep(Duration::from_millis(millis));
            Ok(millis as i64)
        })
        .nullary("whoami", {
            let server_name = server_name.clone();
            move || Ok(server_name.clone())
        })
        .unary("whoami", move |_key: String| Ok(server_name.clone()))
}

/// Typed client stub for the `Hello` service
#[derive(Clone)]
pub struct HelloServiceStub {
    proxy: ServiceProxy,
}

impl HelloServiceStub {
    pub fn new(proxy: ServiceProxy) -> Self {
        Self { proxy }
    }

    pub async fn hello(&self, name: &str) -> Result<String> {
        self.proxy.call_typed("hello", vec![Value::from(name)]).await
    }

    pub async fn nap(&self, millis: i64) -> Result<i64> {
        self.proxy.call_typed("nap", vec![Value::I64(millis)]).await
    }

    pub async fn whoami(&self) -> Result<String> {
        self.proxy.call_typed("whoami", vec![]).await
    }

    /// Server that calls keyed by `key` are routed to
    pub async fn owner_of(&self, key: &str) -> Result<String> {
        self.proxy.call_typed("whoami", vec![Value::from(key)]).await
    }
}

/// Configuration listening on an ephemeral loopback port
pub fn test_config() -> RpcConfig {
    let mut config = RpcConfig::default();
    config.server.bind_address = "127.0.0.1:0".to_string();
    config
}

/// Servers and one client sharing a plugin registry
pub struct TestEnvironment {
    pub config: RpcConfig,
    pub plugins: Arc<PluginRegistry>,
    pub servers: Vec<ServerHandle>,
    pub client: Arc<RpcClient>,
}

impl TestEnvironment {
    /// One server publishing `Hello`, default client settings
    pub async fn start() -> Result<Self> {
        Self::start_with(test_config(), 1, |c| c, |b| b).await
    }

    /// `servers` servers publishing `Hello`, with tweakable settings
    pub async fn start_with(
        config: RpcConfig,
        servers: usize,
        server: impl Fn(RpcServerConfig) -> RpcServerConfig,
        client: impl FnOnce(RpcClientBuilder) -> RpcClientBuilder,
    ) -> Result<Self> {
        init_test_logging();
        let plugins = default_registry(&config);

        let mut handles = Vec::with_capacity(servers);
        for i in 0..servers {
            let rpc_server = RpcServer::new(server(RpcServerConfig::from(&config)), plugins.clone());
            rpc_server.publish_service(&hello_key(), hello_service(&format!("server-{}", i)));
            handles.push(rpc_server.start().await?);
        }

        let client = client(RpcClientBuilder::from_config(&config)).build(plugins.clone())?;
        info!("Test environment up with {} servers", handles.len());

        Ok(Self {
            config,
            plugins,
            servers: handles,
            client: Arc::new(client),
        })
    }

    pub fn hello_stub(&self) -> HelloServiceStub {
        HelloServiceStub::new(self.client.proxy(hello_key()))
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.client.shutdown();
        for server in &mut self.servers {
            server.shutdown().await?;
        }
        Ok(())
    }
}
