//! # minirpc core
//!
//! Error taxonomy and the plugin registry shared by every minirpc crate.
//!
//! Plugins are looked up by capability and name: a capability is an
//! extensible trait (serializer, compressor, load balancer, ...), and a
//! line-oriented catalog binds user-facing names to registered
//! implementation ids.

pub mod catalog;
pub mod error;
pub mod extension;

pub use catalog::{CatalogEntry, CatalogSource, EXTENSION_DIR};
pub use error::{Error, ErrorCategory, Result};
pub use extension::{Capability, PluginRegistry};

pub mod prelude {
    //! Common imports for minirpc applications

    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::extension::{Capability, PluginRegistry};
}
