//! Load balancing across the candidate providers of a service

use crate::discovery::Candidates;
use dashmap::DashMap;
use minirpc_core::{Capability, Error, Result};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Default virtual nodes per address
pub const DEFAULT_REPLICAS: usize = 160;

/// A call that can be routed by service name and arguments
pub trait Routable {
    /// Logical service the call targets
    fn service_name(&self) -> &str;

    /// Key identifying the call for affinity routing
    fn routing_key(&self) -> String;
}

/// Chooses one provider address per call
pub trait LoadBalance: Send + Sync {
    /// Strategy name for logging
    fn name(&self) -> &'static str;

    /// Select an address for `request`
    ///
    /// No candidates is a lookup failure; a single candidate is returned
    /// without consulting the strategy.
    fn select(&self, candidates: &Candidates, request: &dyn Routable) -> Result<String> {
        match candidates.addresses() {
            [] => Err(Error::ServiceNotFound(request.service_name().to_string())),
            [only] => Ok(only.clone()),
            _ => self.do_select(candidates, request),
        }
    }

    /// Strategy-specific selection over two or more candidates
    fn do_select(&self, candidates: &Candidates, request: &dyn Routable) -> Result<String>;
}

impl Capability for dyn LoadBalance {
    const NAME: &'static str = "load_balance";
}

/// Uniformly random selection
#[derive(Debug, Default)]
pub struct RandomBalancer;

impl LoadBalance for RandomBalancer {
    fn name(&self) -> &'static str {
        "random"
    }

    fn do_select(&self, candidates: &Candidates, _request: &dyn Routable) -> Result<String> {
        let index = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates.addresses()[index].clone())
    }
}

/// MD5 digest of `input`
fn digest(input: &str) -> [u8; 16] {
    md5::compute(input.as_bytes()).0
}

/// Ring position taken from the `window`-th little-endian word of a digest
fn ring_position(digest: &[u8; 16], window: usize) -> u32 {
    let start = window * 4;
    u32::from_le_bytes([
        digest[start],
        digest[start + 1],
        digest[start + 2],
        digest[start + 3],
    ])
}

/// Position of a routing key on the ring
pub fn key_position(key: &str) -> u32 {
    ring_position(&digest(key), 0)
}

/// Consistent hash ring for one membership generation
#[derive(Debug, Clone)]
pub struct HashRing {
    generation: u64,
    points: BTreeMap<u32, String>,
}

impl HashRing {
    /// Place `replicas` virtual nodes per address, four per digest
    pub fn build(candidates: &Candidates, replicas: usize) -> Self {
        let mut points = BTreeMap::new();
        for address in candidates.addresses() {
            for i in 0..replicas / 4 {
                let d = digest(&format!("{}{}", address, i));
                for window in 0..4 {
                    points.insert(ring_position(&d, window), address.clone());
                }
            }
        }
        Self {
            generation: candidates.generation(),
            points,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of points on the ring
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Owner of the first point at or after `position`, wrapping around
    pub fn locate(&self, position: u32) -> Option<&str> {
        self.points
            .range(position..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, address)| address.as_str())
    }
}

/// Consistent hashing on `service name + arguments`
///
/// One ring is cached per service and rebuilt when the candidate generation
/// changes. Rings are built before being published, so readers never see a
/// partial ring.
#[derive(Debug)]
pub struct ConsistentHashBalancer {
    replicas: usize,
    rings: DashMap<String, Arc<HashRing>>,
}

impl Default for ConsistentHashBalancer {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}

impl ConsistentHashBalancer {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(4),
            rings: DashMap::new(),
        }
    }

    /// Cached ring for `service_name`, rebuilt if stale
    pub fn ring(&self, service_name: &str, candidates: &Candidates) -> Arc<HashRing> {
        if let Some(ring) = self.rings.get(service_name) {
            if ring.generation() == candidates.generation() {
                return ring.clone();
            }
        }

        let ring = Arc::new(HashRing::build(candidates, self.replicas));
        debug!(
            "Rebuilt hash ring for {} with {} points (generation {})",
            service_name,
            ring.len(),
            ring.generation()
        );
        self.rings.insert(service_name.to_string(), ring.clone());
        ring
    }
}

impl LoadBalance for ConsistentHashBalancer {
    fn name(&self) -> &'static str {
        "consistent_hash"
    }

    fn do_select(&self, candidates: &Candidates, request: &dyn Routable) -> Result<String> {
        let ring = self.ring(request.service_name(), candidates);
        ring.locate(key_position(&request.routing_key()))
            .map(str::to_string)
            .ok_or_else(|| Error::ServiceNotFound(request.service_name().to_string()))
    }
}
