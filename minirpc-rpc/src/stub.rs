//! Client stubs
//!
//! [`ServiceProxy`] invokes methods by name on one remote service; typed
//! per-interface stubs wrap it and convert arguments with [`RpcValue`].

use crate::pending::PendingResponse;
use crate::protocol::{Request, RpcValue, ServiceKey, Value};
use async_trait::async_trait;
use minirpc_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Sends requests and hands back their pending responses
#[async_trait]
pub trait RequestTransport: Send + Sync {
    async fn send_request(&self, request: Request) -> Result<PendingResponse>;
}

/// Invoke-by-name stub for one service
#[derive(Clone)]
pub struct ServiceProxy {
    transport: Arc<dyn RequestTransport>,
    key: ServiceKey,
    timeout: Option<Duration>,
}

impl ServiceProxy {
    pub fn new(transport: Arc<dyn RequestTransport>, key: ServiceKey) -> Self {
        Self {
            transport,
            key,
            timeout: None,
        }
    }

    /// Fail calls that take longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    /// Call `method` with `args`, returning the response data
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>> {
        let correlation_id = Uuid::new_v4().to_string();
        let request = Request::new(correlation_id.clone(), self.key.to_string(), method, args);
        debug!("Calling {}.{} as {}", self.key, method, correlation_id);

        let pending = self.transport.send_request(request).await?;
        let response = match self.timeout {
            Some(timeout) => pending.timeout(timeout).await?,
            None => pending.await?,
        };

        if response.correlation_id != correlation_id {
            return Err(Error::ResponseMismatch {
                expected: correlation_id,
                actual: response.correlation_id,
            });
        }
        if !response.is_success() {
            return Err(Error::RemoteFailure(response.message));
        }
        Ok(response.data)
    }

    /// Call `method` and convert its result
    pub async fn call_typed<R: RpcValue>(&self, method: &str, args: Vec<Value>) -> Result<R> {
        let data = self.call(method, args).await?.unwrap_or(Value::Null);
        R::from_value(data)
    }
}
