//! `host:port` address handling

use minirpc_core::{Error, Result};
use std::net::SocketAddr;

/// Split `host:port`, accepting bracketed IPv6 hosts
pub fn split_host_port(address: &str) -> Result<(&str, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidAddress(format!("missing port in '{}'", address)))?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(Error::InvalidAddress(format!("missing host in '{}'", address)));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| Error::InvalidAddress(format!("invalid port in '{}'", address)))?;

    Ok((host, port))
}

/// Render a socket address the way the registry stores it
pub fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Resolve `host:port` to a socket address, consulting DNS for host names
pub async fn resolve(address: &str) -> Result<SocketAddr> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let (host, port) = split_host_port(address)?;
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))?;

    addrs
        .next()
        .ok_or_else(|| Error::InvalidAddress(format!("{} resolved to no addresses", address)))
}
