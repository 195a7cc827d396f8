//! Builtin plugin wiring
//!
//! Registers every minirpc capability with its builtin implementations and
//! the catalogs under `resources/extensions/`. Catalogs found in configured
//! search paths are read after the builtin ones, so their bindings win.

use crate::compress::{Compress, DeflateCompressor, GzipCompressor, NoopCompressor};
use crate::serializer::{BincodeSerializer, JsonSerializer, MessagePackSerializer, Serializer};
use minirpc_config::RpcConfig;
use minirpc_core::{Capability, PluginRegistry};
use minirpc_net::{
    ConsistentHashBalancer, InMemoryRegistry, LoadBalance, RandomBalancer, ServiceDiscovery,
    ServiceRegistry,
};
use std::sync::Arc;
use tracing::debug;

const BUILTIN_CATALOGS: [(&str, &str); 5] = [
    (
        <dyn Serializer as Capability>::NAME,
        include_str!("../resources/extensions/serializer"),
    ),
    (
        <dyn Compress as Capability>::NAME,
        include_str!("../resources/extensions/compress"),
    ),
    (
        <dyn LoadBalance as Capability>::NAME,
        include_str!("../resources/extensions/load_balance"),
    ),
    (
        <dyn ServiceDiscovery as Capability>::NAME,
        include_str!("../resources/extensions/service_discovery"),
    ),
    (
        <dyn ServiceRegistry as Capability>::NAME,
        include_str!("../resources/extensions/service_registry"),
    ),
];

/// Registry with every builtin plugin, configured from `config`
pub fn default_registry(config: &RpcConfig) -> Arc<PluginRegistry> {
    let registry = PluginRegistry::new();

    registry.register_capability::<dyn Serializer>();
    registry.register_capability::<dyn Compress>();
    registry.register_capability::<dyn LoadBalance>();
    registry.register_capability::<dyn ServiceDiscovery>();
    registry.register_capability::<dyn ServiceRegistry>();

    registry.register_implementation::<dyn Serializer, JsonSerializer, _>(
        "minirpc::serializer::JsonSerializer",
        || Ok(JsonSerializer),
        |s| s,
    );
    registry.register_implementation::<dyn Serializer, MessagePackSerializer, _>(
        "minirpc::serializer::MessagePackSerializer",
        || Ok(MessagePackSerializer),
        |s| s,
    );
    registry.register_implementation::<dyn Serializer, BincodeSerializer, _>(
        "minirpc::serializer::BincodeSerializer",
        || Ok(BincodeSerializer),
        |s| s,
    );

    registry.register_implementation::<dyn Compress, NoopCompressor, _>(
        "minirpc::compress::NoopCompressor",
        || Ok(NoopCompressor),
        |c| c,
    );
    registry.register_implementation::<dyn Compress, GzipCompressor, _>(
        "minirpc::compress::GzipCompressor",
        || Ok(GzipCompressor),
        |c| c,
    );
    registry.register_implementation::<dyn Compress, DeflateCompressor, _>(
        "minirpc::compress::DeflateCompressor",
        || Ok(DeflateCompressor),
        |c| c,
    );

    let replicas = config.load_balance.replicas;
    registry.register_implementation::<dyn LoadBalance, RandomBalancer, _>(
        "minirpc::load_balance::RandomBalancer",
        || Ok(RandomBalancer),
        |b| b,
    );
    registry.register_implementation::<dyn LoadBalance, ConsistentHashBalancer, _>(
        "minirpc::load_balance::ConsistentHashBalancer",
        move || Ok(ConsistentHashBalancer::new(replicas)),
        |b| b,
    );

    // One instance serves both registry capabilities
    let root = config.registry.root_path.clone();
    registry.register_implementation::<dyn ServiceRegistry, InMemoryRegistry, _>(
        "minirpc::registry::InMemoryRegistry",
        move || Ok(InMemoryRegistry::new(root.clone())),
        |r| r,
    );
    registry.register_implementation::<dyn ServiceDiscovery, InMemoryRegistry, _>(
        "minirpc::registry::InMemoryRegistry",
        || Ok(InMemoryRegistry::default()),
        |r| r,
    );

    for (capability, text) in BUILTIN_CATALOGS {
        registry.add_embedded_catalog(capability, text);
    }
    for dir in &config.extensions.search_paths {
        debug!("Adding extension search path {}", dir.display());
        registry.add_search_path(dir);
    }

    Arc::new(registry)
}

/// Registry with every builtin plugin and default settings
pub fn builtin_registry() -> Arc<PluginRegistry> {
    default_registry(&RpcConfig::default())
}
