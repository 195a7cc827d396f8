//! Service discovery and registration contracts, plus an in-process backend

use crate::address::format_address;
use async_trait::async_trait;
use dashmap::DashMap;
use minirpc_core::{Capability, Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Default root under which services are registered
pub const DEFAULT_ROOT_PATH: &str = "/minirpc";

/// Addresses currently providing a service
///
/// `generation` changes whenever the membership changes, so consumers can
/// cache derived state (such as a hash ring) and detect staleness without
/// comparing contents.
#[derive(Debug, Clone)]
pub struct Candidates {
    generation: u64,
    addresses: Arc<[String]>,
}

impl Candidates {
    pub fn new(generation: u64, addresses: Vec<String>) -> Self {
        Self {
            generation,
            addresses: addresses.into(),
        }
    }

    /// No providers, generation 0
    pub fn empty() -> Self {
        Self::new(0, Vec::new())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Looks up the providers of a logical service
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Current candidates for `service_name`; empty if none are registered
    async fn lookup(&self, service_name: &str) -> Result<Candidates>;
}

impl Capability for dyn ServiceDiscovery {
    const NAME: &'static str = "service_discovery";
}

/// Publishes provider addresses for logical services
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Register `address` under `service_name`, returning the created path
    async fn register(&self, service_name: &str, address: SocketAddr) -> Result<String>;

    /// Remove one previously registered path
    async fn deregister(&self, path: &str) -> Result<()>;

    /// Remove every path this registry created
    async fn deregister_all(&self) -> Result<usize>;
}

impl Capability for dyn ServiceRegistry {
    const NAME: &'static str = "service_registry";
}

/// Registry path for a provider: `{root}/{service}/{host}:{port}`
pub fn registration_path(root: &str, service_name: &str, address: &SocketAddr) -> String {
    format!(
        "{}/{}/{}",
        root.trim_end_matches('/'),
        service_name,
        format_address(&address.ip().to_string(), address.port())
    )
}

/// In-process registry implementing both discovery and registration
///
/// Every membership change takes a fresh generation from a registry-wide
/// counter.
pub struct InMemoryRegistry {
    root: String,
    services: DashMap<String, Candidates>,
    created: Mutex<BTreeSet<String>>,
    generation: AtomicU64,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_PATH)
    }
}

impl InMemoryRegistry {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            services: DashMap::new(),
            created: Mutex::new(BTreeSet::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Registry root path
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Paths this registry created that are still registered
    pub fn registered_paths(&self) -> Vec<String> {
        self.created.lock().iter().cloned().collect()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn split_path<'a>(&self, path: &'a str) -> Result<(&'a str, &'a str)> {
        let rest = path
            .strip_prefix(self.root.trim_end_matches('/'))
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| Error::InvalidAddress(format!("{} is outside {}", path, self.root)))?;

        rest.split_once('/')
            .ok_or_else(|| Error::InvalidAddress(format!("malformed registry path {}", path)))
    }

    fn remove(&self, path: &str) -> Result<bool> {
        let (service, address) = self.split_path(path)?;

        let mut removed = false;
        if let Some(mut entry) = self.services.get_mut(service) {
            if entry.addresses().iter().any(|a| a == address) {
                let remaining: Vec<String> = entry
                    .addresses()
                    .iter()
                    .filter(|a| a.as_str() != address)
                    .cloned()
                    .collect();
                *entry = Candidates::new(self.next_generation(), remaining);
                removed = true;
            }
        }
        self.services.remove_if(service, |_, c| c.is_empty());
        self.created.lock().remove(path);

        if removed {
            debug!("Deregistered {}", path);
        }
        Ok(removed)
    }
}

#[async_trait]
impl ServiceDiscovery for InMemoryRegistry {
    async fn lookup(&self, service_name: &str) -> Result<Candidates> {
        Ok(self
            .services
            .get(service_name)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(Candidates::empty))
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn register(&self, service_name: &str, address: SocketAddr) -> Result<String> {
        if service_name.is_empty() || service_name.contains('/') {
            return Err(Error::Configuration(format!(
                "invalid service name '{}'",
                service_name
            )));
        }

        let path = registration_path(&self.root, service_name, &address);
        let rendered = format_address(&address.ip().to_string(), address.port());

        let mut entry = self
            .services
            .entry(service_name.to_string())
            .or_insert_with(Candidates::empty);
        if !entry.addresses().contains(&rendered) {
            let mut addresses = entry.addresses().to_vec();
            addresses.push(rendered);
            *entry = Candidates::new(self.next_generation(), addresses);
            info!("Registered service path: {}", path);
        }
        drop(entry);

        self.created.lock().insert(path.clone());
        Ok(path)
    }

    async fn deregister(&self, path: &str) -> Result<()> {
        self.remove(path).map(|_| ())
    }

    async fn deregister_all(&self) -> Result<usize> {
        let paths: Vec<String> = std::mem::take(&mut *self.created.lock()).into_iter().collect();
        let mut removed = 0;
        for path in &paths {
            if self.remove(path)? {
                removed += 1;
            }
        }
        info!("Deregistered {} service paths under {}", removed, self.root);
        Ok(removed)
    }
}
