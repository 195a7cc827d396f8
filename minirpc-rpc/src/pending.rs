//! Correlation of in-flight requests with their responses

use crate::protocol::Response;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use minirpc_core::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct PendingCall {
    connection: u64,
    token: u64,
    sender: oneshot::Sender<Result<Response>>,
}

/// Table of calls awaiting a response, keyed by correlation id
///
/// Each entry is completed exactly once: by its response, by a connection
/// failure, or removed when the caller stops waiting.
#[derive(Default)]
pub struct PendingCallTable {
    calls: DashMap<String, PendingCall>,
    tokens: AtomicU64,
}

impl PendingCallTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a call sent on `connection`
    pub fn register(self: &Arc<Self>, correlation_id: &str, connection: u64) -> Result<PendingResponse> {
        let (sender, receiver) = oneshot::channel();
        let token = self.tokens.fetch_add(1, Ordering::Relaxed);

        match self.calls.entry(correlation_id.to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateCorrelation(correlation_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(PendingCall {
                    connection,
                    token,
                    sender,
                });
                Ok(PendingResponse {
                    correlation_id: correlation_id.to_string(),
                    receiver,
                    table: Arc::downgrade(self),
                    token,
                    completed: false,
                })
            }
        }
    }

    /// Hand `response` to its waiting caller
    ///
    /// Returns false when no call with that id is pending, e.g. it already
    /// timed out.
    pub fn complete(&self, response: Response) -> bool {
        match self.calls.remove(&response.correlation_id) {
            Some((id, call)) => {
                if call.sender.send(Ok(response)).is_err() {
                    debug!("Caller for {} went away before its response", id);
                }
                true
            }
            None => {
                warn!(
                    "Discarding response for unknown request {}",
                    response.correlation_id
                );
                false
            }
        }
    }

    /// Fail one pending call
    pub fn fail(&self, correlation_id: &str, error: Error) -> bool {
        match self.calls.remove(correlation_id) {
            Some((_, call)) => {
                let _ = call.sender.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail every call in flight on `connection`
    pub fn fail_connection(&self, connection: u64, error: Error) -> usize {
        let ids: Vec<String> = self
            .calls
            .iter()
            .filter(|entry| entry.connection == connection)
            .map(|entry| entry.key().clone())
            .collect();

        let mut failed = 0;
        for id in ids {
            if let Some((_, call)) = self.calls.remove_if(&id, |_, call| call.connection == connection) {
                let _ = call.sender.send(Err(error.clone()));
                failed += 1;
            }
        }
        if failed > 0 {
            debug!("Failed {} pending calls on connection {}", failed, connection);
        }
        failed
    }

    /// Drop a pending call without completing it
    pub fn evict(&self, correlation_id: &str) -> bool {
        self.calls.remove(correlation_id).is_some()
    }

    fn evict_token(&self, correlation_id: &str, token: u64) {
        self.calls.remove_if(correlation_id, |_, call| call.token == token);
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.calls.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Future resolving to the response of one registered call
///
/// Dropping it before completion removes the table entry, so a late response
/// is discarded.
pub struct PendingResponse {
    correlation_id: String,
    receiver: oneshot::Receiver<Result<Response>>,
    table: Weak<PendingCallTable>,
    token: u64,
    completed: bool,
}

impl PendingResponse {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait at most `duration` for the response
    pub async fn timeout(self, duration: Duration) -> Result<Response> {
        let correlation_id = self.correlation_id.clone();
        match tokio::time::timeout(duration, self).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "no response for request {} within {:?}",
                correlation_id, duration
            ))),
        }
    }
}

impl Future for PendingResponse {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(result)) => result,
            Poll::Ready(Err(_)) => Err(Error::ConnectionClosed(format!(
                "request {} abandoned",
                self.correlation_id
            ))),
        };
        self.completed = true;
        Poll::Ready(result)
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            table.evict_token(&self.correlation_id, self.token);
        }
    }
}
