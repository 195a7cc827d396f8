//! # minirpc RPC
//!
//! Binary request/response RPC over TCP.
//!
//! This crate provides:
//! - A length-prefixed wire codec with pluggable serializers (JSON,
//!   MessagePack, Bincode) and compressors (gzip, deflate)
//! - A pooled client that correlates responses to calls by id
//! - A server dispatching requests to registered services on a worker pool
//! - Heartbeats on idle client connections, idle reclaim on the server
//! - Invoke-by-name client stubs

pub mod client;
pub mod codec;
pub mod compress;
pub mod connection;
pub mod dispatcher;
pub mod pending;
pub mod plugins;
pub mod pool;
pub mod protocol;
pub mod serializer;
pub mod server;
pub mod stub;

// Client exports
pub use client::{RpcClient, RpcClientBuilder, RpcClientConfig};
pub use pending::{PendingCallTable, PendingResponse};
pub use pool::ConnectionPool;
pub use stub::{RequestTransport, ServiceProxy};

// Server exports
pub use dispatcher::{MethodHandler, RequestDispatcher, RpcService, ServiceTable};
pub use server::{RpcServer, RpcServerConfig, ServerHandle};

// Protocol exports
pub use codec::WireCodec;
pub use compress::{Compress, CompressKind};
pub use connection::{Connection, ConnectionOptions, FrameHandler, UnsentFrame};
pub use protocol::{
    Envelope, MessageType, Payload, Request, Response, RpcValue, ServiceKey, StatusCode, Value,
    ValueType,
};
pub use serializer::{Serializer, SerializerKind};

pub use plugins::{builtin_registry, default_registry};

// Prelude for common imports
pub mod prelude {
    //! Common imports for minirpc applications

    pub use crate::client::{RpcClient, RpcClientBuilder};
    pub use crate::dispatcher::RpcService;
    pub use crate::plugins::default_registry;
    pub use crate::protocol::{Request, Response, RpcValue, ServiceKey, Value, ValueType};
    pub use crate::server::{RpcServer, ServerHandle};
    pub use crate::stub::ServiceProxy;
    pub use minirpc_config::RpcConfig;
    pub use minirpc_core::{Error, Result};
}
