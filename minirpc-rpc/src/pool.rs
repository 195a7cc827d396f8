//! Client connection pool, one connection per provider address

use crate::codec::WireCodec;
use crate::connection::{Connection, ConnectionOptions, FrameHandler};
use dashmap::DashMap;
use minirpc_core::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Reuses one open connection per address, reconnecting on demand
pub struct ConnectionPool {
    connections: DashMap<SocketAddr, Connection>,
    codec: WireCodec,
    options: ConnectionOptions,
    connect_timeout: Duration,
    handler: Arc<dyn FrameHandler>,
    token: CancellationToken,
}

impl ConnectionPool {
    pub fn new(
        codec: WireCodec,
        options: ConnectionOptions,
        connect_timeout: Duration,
        handler: Arc<dyn FrameHandler>,
    ) -> Self {
        Self {
            connections: DashMap::new(),
            codec,
            options,
            connect_timeout,
            handler,
            token: CancellationToken::new(),
        }
    }

    /// Open connection to `addr`, connecting if none is cached
    ///
    /// No lock is held while connecting; when two callers race, the first
    /// connection stored wins and the other is closed.
    pub async fn get(&self, addr: SocketAddr) -> Result<Connection> {
        if self.token.is_cancelled() {
            return Err(Error::ChannelNotActive("connection pool is closed".to_string()));
        }
        if let Some(connection) = self.cached(&addr) {
            return Ok(connection);
        }

        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::ConnectUnreachable(format!("{}: {}", addr, e))),
            Err(_) => {
                return Err(Error::ConnectUnreachable(format!(
                    "{}: timed out after {:?}",
                    addr, self.connect_timeout
                )))
            }
        };
        let _ = stream.set_nodelay(true);

        let connection = Connection::spawn(
            stream,
            addr,
            self.codec.clone(),
            self.options.clone(),
            self.handler.clone(),
            &self.token,
        );

        let mut entry = self.connections.entry(addr).or_insert_with(|| connection.clone());
        if entry.id() != connection.id() {
            if entry.is_open() {
                debug!("Lost connect race to {}, reusing connection {}", addr, entry.id());
                connection.close();
                return Ok(entry.clone());
            }
            *entry = connection.clone();
        }
        drop(entry);

        info!("Connected to {}", addr);
        Ok(connection)
    }

    fn cached(&self, addr: &SocketAddr) -> Option<Connection> {
        let connection = self.connections.get(addr)?.clone();
        if connection.is_open() {
            return Some(connection);
        }
        self.evict_connection(addr, connection.id());
        None
    }

    /// Remove `addr`'s connection if it is still `connection_id`
    pub fn evict_connection(&self, addr: &SocketAddr, connection_id: u64) -> bool {
        self.connections
            .remove_if(addr, |_, connection| connection.id() == connection_id)
            .is_some()
    }

    /// Close and remove whatever connection `addr` has
    pub fn evict(&self, addr: &SocketAddr) {
        if let Some((_, connection)) = self.connections.remove(addr) {
            connection.close();
        }
    }

    /// Number of cached connections, open or not
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close every connection; the pool hands out no new ones afterwards
    pub fn close_all(&self) {
        self.token.cancel();
        self.connections.clear();
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
