//! # minirpc networking
//!
//! Address handling, service discovery contracts and load balancing.

pub mod address;
pub mod discovery;
pub mod load_balancer;

pub use discovery::{
    registration_path, Candidates, InMemoryRegistry, ServiceDiscovery, ServiceRegistry,
    DEFAULT_ROOT_PATH,
};
pub use load_balancer::{
    ConsistentHashBalancer, HashRing, LoadBalance, RandomBalancer, Routable, DEFAULT_REPLICAS,
};

pub mod prelude {
    //! Common imports for minirpc networking

    pub use crate::discovery::{Candidates, ServiceDiscovery, ServiceRegistry};
    pub use crate::load_balancer::{LoadBalance, Routable};
}
