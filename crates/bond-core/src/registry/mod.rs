//! Plugin registry and catalog
//!
//! [`PluginRegistry`] is the immutable set of loaded plugins, indexed by the
//! event kinds they declare. It is built once at startup from an explicit
//! list and never changes afterwards.
//!
//! [`PluginCatalog`] maps factory names to [`PluginFactory`]s so that a
//! daemon can build its plugin list from configuration.
//!
//! ## Registration
//!
//! Plugin crates expose a `register` function:
//!
//! ```rust,ignore
//! pub fn register(catalog: &PluginCatalog) {
//!     catalog.register_factory("audit", Box::new(AuditFactory));
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use crate::config::PluginConfig;
use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::plugin::Plugin;

/// Loaded plugins indexed by declared event kind
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    by_kind: HashMap<EventKind, Vec<Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    /// Build a registry from an explicit plugin list
    ///
    /// A plugin whose name was already registered is skipped with a warning.
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let mut seen = HashSet::new();
        let mut registry = Self::default();

        for plugin in plugins {
            if !seen.insert(plugin.name().to_string()) {
                warn!("Plugin {} registered twice, keeping the first", plugin.name());
                continue;
            }
            for kind in plugin.handlers().kinds() {
                registry
                    .by_kind
                    .entry(kind)
                    .or_default()
                    .push(plugin.clone());
            }
            info!(
                "Registered plugin {} for {:?}",
                plugin.name(),
                plugin.handlers().kinds()
            );
            registry.plugins.push(plugin);
        }

        registry
    }

    /// Plugins that declared a handler for `kind`, in registration order
    pub fn interested(&self, kind: EventKind) -> &[Arc<dyn Plugin>] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All plugins, in registration order
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// Plugin by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    /// Number of plugins
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugin is registered
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Helper trait for constructing plugins from configuration
pub trait PluginFactory: Send + Sync {
    /// Create a plugin from plugin-specific configuration
    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn Plugin>>;
}

/// Named plugin factories
///
/// ## Thread Safety
///
/// Uses interior mutability with RwLock, allowing concurrent reads and
/// exclusive writes.
#[derive(Default)]
pub struct PluginCatalog {
    factories: RwLock<HashMap<String, Box<dyn PluginFactory>>>,
}

impl PluginCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`
    pub fn register_factory(&self, name: impl Into<String>, factory: Box<dyn PluginFactory>) {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        factories.insert(name.into(), factory);
    }

    /// Whether a factory named `name` exists
    pub fn has_factory(&self, name: &str) -> bool {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.contains_key(name)
    }

    /// Registered factory names, sorted
    pub fn list_factories(&self) -> Vec<String> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build one plugin
    pub fn create_plugin(&self, config: &PluginConfig) -> Result<Arc<dyn Plugin>> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let factory = factories.get(&config.factory).ok_or_else(|| {
            Error::plugin(&config.factory, format!("Unknown plugin factory: {}", config.factory))
        })?;
        factory.create(&config.config)
    }

    /// Build every configured plugin, collecting failures instead of aborting
    pub fn load_all(&self, configs: &[PluginConfig]) -> (Vec<Arc<dyn Plugin>>, Vec<Error>) {
        let mut plugins = Vec::new();
        let mut failures = Vec::new();

        for config in configs {
            match self.create_plugin(config) {
                Ok(plugin) => plugins.push(plugin),
                Err(e) => {
                    warn!("Failed to load plugin {}: {}", config.factory, e);
                    failures.push(e);
                }
            }
        }

        (plugins, failures)
    }
}
