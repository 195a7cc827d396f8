//! Plugin registry resolving `(capability, name)` pairs to singleton implementations

use crate::catalog::{merge_entries, parse_catalog, CatalogSource};
use crate::error::{Error, Result};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An extensible interface that named plugins can implement
///
/// Implemented for trait objects, e.g. `impl Capability for dyn Serializer`.
/// `NAME` doubles as the catalog file name.
pub trait Capability: Send + Sync + 'static {
    const NAME: &'static str;
}

type SharedAny = Arc<dyn Any + Send + Sync>;
type Constructor = Arc<dyn Fn() -> Result<SharedAny> + Send + Sync>;
type Upcaster = Arc<dyn Fn(&SharedAny) -> Option<SharedAny> + Send + Sync>;

type Catalog = Arc<HashMap<String, String>>;

/// Resolves capability names to lazily constructed, shared plugin instances
///
/// Instances are cached by implementation id, so several names (or several
/// capabilities) bound to the same implementation share one instance.
#[derive(Default)]
pub struct PluginRegistry {
    capabilities: DashMap<TypeId, &'static str>,
    constructors: DashMap<String, Constructor>,
    bindings: DashMap<(TypeId, String), Upcaster>,
    sources: RwLock<Vec<CatalogSource>>,
    catalogs: DashMap<TypeId, Arc<OnceCell<Catalog>>>,
    instances: DashMap<String, Arc<OnceCell<SharedAny>>>,
    by_name: DashMap<(TypeId, String), SharedAny>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `C` as an extensible capability
    pub fn register_capability<C: Capability + ?Sized>(&self) {
        self.capabilities.insert(TypeId::of::<C>(), C::NAME);
        debug!("Registered capability: {}", C::NAME);
    }

    /// Check whether `C` has been registered
    pub fn has_capability<C: Capability + ?Sized>(&self) -> bool {
        self.capabilities.contains_key(&TypeId::of::<C>())
    }

    /// Bind an implementation id to capability `C`
    ///
    /// `construct` runs at most once per registry for a given `id`, the first
    /// time any name bound to it is resolved. Binding the same id to several
    /// capabilities keeps the first constructor.
    pub fn register_implementation<C, T, F>(
        &self,
        id: &str,
        construct: F,
        upcast: fn(Arc<T>) -> Arc<C>,
    ) where
        C: Capability + ?Sized,
        T: Send + Sync + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        self.constructors.entry(id.to_string()).or_insert_with(|| {
            Arc::new(move || construct().map(|value| Arc::new(value) as SharedAny))
        });

        let upcaster: Upcaster = Arc::new(move |instance: &SharedAny| {
            let concrete = instance.clone().downcast::<T>().ok()?;
            let capability: Arc<C> = upcast(concrete);
            Some(Arc::new(capability) as SharedAny)
        });
        self.bindings.insert((TypeId::of::<C>(), id.to_string()), upcaster);
    }

    /// Add catalog text for one capability
    pub fn add_embedded_catalog(&self, capability: &str, text: &str) {
        self.sources.write().push(CatalogSource::Embedded {
            capability: capability.to_string(),
            text: text.to_string(),
        });
    }

    /// Add a directory scanned for `extensions/<capability>` catalog files
    ///
    /// Sources are read in the order they were added; a capability's catalog
    /// is loaded once, on its first resolution.
    pub fn add_search_path(&self, dir: impl Into<PathBuf>) {
        self.sources.write().push(CatalogSource::Directory(dir.into()));
    }

    /// Resolve `name` under capability `C` to its singleton instance
    pub fn resolve<C: Capability + ?Sized>(&self, name: &str) -> Result<Arc<C>> {
        let key = TypeId::of::<C>();

        if name.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "{} extension name must not be empty",
                C::NAME
            )));
        }
        if !self.capabilities.contains_key(&key) {
            return Err(Error::Configuration(format!(
                "{} is not a registered extensible capability",
                C::NAME
            )));
        }

        if let Some(cached) = self.by_name.get(&(key, name.to_string())) {
            if let Some(instance) = cached.downcast_ref::<Arc<C>>() {
                return Ok(instance.clone());
            }
        }

        let catalog = self.catalog::<C>();
        let implementation = catalog.get(name).ok_or_else(|| Error::UnknownExtension {
            capability: C::NAME.to_string(),
            name: name.to_string(),
        })?;

        let instance = self.instance(implementation)?;
        let upcaster = self
            .bindings
            .get(&(key, implementation.clone()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "implementation {} is not bound to capability {}",
                    implementation,
                    C::NAME
                ))
            })?;
        let erased = upcaster(&instance).ok_or_else(|| {
            Error::Internal(format!("implementation {} has an unexpected type", implementation))
        })?;

        let resolved = erased
            .downcast_ref::<Arc<C>>()
            .cloned()
            .ok_or_else(|| Error::Internal(format!("capability {} upcast failed", C::NAME)))?;

        self.by_name.entry((key, name.to_string())).or_insert(erased);
        Ok(resolved)
    }

    /// Names currently bound for capability `C`
    pub fn names<C: Capability + ?Sized>(&self) -> Vec<String> {
        let mut names: Vec<String> = self.catalog::<C>().keys().cloned().collect();
        names.sort();
        names
    }

    fn catalog<C: Capability + ?Sized>(&self) -> Catalog {
        let key = TypeId::of::<C>();
        let cell = self
            .catalogs
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_init(|| self.load_catalog(key, C::NAME)).clone()
    }

    fn load_catalog(&self, key: TypeId, capability: &str) -> Catalog {
        let sources = self.sources.read().clone();
        let mut catalog = HashMap::new();

        for source in &sources {
            if let Some((origin, text)) = source.read(capability) {
                let entries = parse_catalog(&text, &origin)
                    .into_iter()
                    .filter(|entry| {
                        let bound = self
                            .bindings
                            .contains_key(&(key, entry.implementation.clone()));
                        if !bound {
                            warn!(
                                "{}: no {} implementation registered as {}",
                                origin, capability, entry.implementation
                            );
                        }
                        bound
                    })
                    .collect();
                merge_entries(&mut catalog, entries);
            }
        }

        info!("Loaded {} {} extensions", catalog.len(), capability);
        Arc::new(catalog)
    }

    fn instance(&self, implementation: &str) -> Result<SharedAny> {
        let constructor = self
            .constructors
            .get(implementation)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                Error::Configuration(format!("no constructor for implementation {}", implementation))
            })?;

        let cell = self
            .instances
            .entry(implementation.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| {
            debug!("Instantiating extension {}", implementation);
            constructor()
        })
        .cloned()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("capabilities", &self.capabilities.len())
            .field("implementations", &self.constructors.len())
            .field("instances", &self.instances.len())
            .finish()
    }
}
