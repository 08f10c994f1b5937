//! Plugin discovery and static data extension points.
//!
//! The plugin manager says which plugins are installed; the plugin registry
//! says which of them expose a `static_data.load_static_data` extension point.
//! A plugin without one resolves to `Ok(None)`, which is the common case and
//! not an error.

use crate::{Loader, LoaderDescriptor};
use staticdex_core::{ConfigError, IndexResult, PluginDescriptor, PluginError, RebuildConfig};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

// ============================================================================
// PLUGIN MANAGER
// ============================================================================

/// Enumerates installed plugins.
pub trait PluginManager: Send + Sync {
    fn plugins(&self) -> Vec<PluginDescriptor>;
}

/// Plugin manager over a fixed, ordered list.
#[derive(Debug, Clone, Default)]
pub struct StaticPluginManager {
    plugins: Vec<PluginDescriptor>,
}

impl StaticPluginManager {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            plugins: names.into_iter().map(PluginDescriptor::new).collect(),
        }
    }

    /// No plugins installed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The plugins listed in `config.plugins`.
    pub fn from_config(config: &RebuildConfig) -> Self {
        Self {
            plugins: config.plugin_descriptors(),
        }
    }
}

impl PluginManager for StaticPluginManager {
    fn plugins(&self) -> Vec<PluginDescriptor> {
        self.plugins.clone()
    }
}

// ============================================================================
// PLUGIN REGISTRY
// ============================================================================

/// Resolves a plugin's static data extension point.
pub trait PluginRegistry: Send + Sync {
    /// `Ok(Some(_))` when the plugin exposes a loader, `Ok(None)` when it
    /// does not, `Err(_)` when looking it up failed.
    fn resolve(&self, plugin: &PluginDescriptor) -> Result<Option<LoaderDescriptor>, PluginError>;
}

/// Builds a plugin's loader on demand.
pub type LoaderFactory = Arc<dyn Fn() -> Result<Arc<dyn Loader>, PluginError> + Send + Sync>;

/// Plugin registry backed by a table of loader factories.
///
/// Plugins register under their own name, typically while the host process
/// starts up.
#[derive(Default)]
pub struct FactoryPluginRegistry {
    factories: RwLock<HashMap<String, LoaderFactory>>,
}

impl FactoryPluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `plugin`'s extension point, replacing any
    /// earlier registration.
    pub fn register_factory<F>(&self, plugin: impl Into<String>, factory: F) -> IndexResult<()>
    where
        F: Fn() -> Result<Arc<dyn Loader>, PluginError> + Send + Sync + 'static,
    {
        let plugin = plugin.into();
        if plugin.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "plugin".to_string(),
                value: plugin,
                reason: "plugin name must not be empty".to_string(),
            }
            .into());
        }

        let mut factories = self.factories.write().map_err(|_| PluginError::ResolutionFailed {
            plugin: plugin.clone(),
            reason: "plugin registry lock poisoned".to_string(),
        })?;
        factories.insert(plugin, Arc::new(factory));
        Ok(())
    }

    /// Register a ready-made loader for `plugin`.
    pub fn register_loader(&self, plugin: impl Into<String>, loader: Arc<dyn Loader>) -> IndexResult<()> {
        self.register_factory(plugin, move || Ok(loader.clone()))
    }

    /// Remove `plugin`'s registration. Returns whether one existed.
    pub fn unregister(&self, plugin: &str) -> IndexResult<bool> {
        let mut factories = self.factories.write().map_err(|_| PluginError::ResolutionFailed {
            plugin: plugin.to_string(),
            reason: "plugin registry lock poisoned".to_string(),
        })?;
        Ok(factories.remove(plugin).is_some())
    }

    /// Names of plugins with a registered extension point, sorted.
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl PluginRegistry for FactoryPluginRegistry {
    fn resolve(&self, plugin: &PluginDescriptor) -> Result<Option<LoaderDescriptor>, PluginError> {
        let factory = {
            let factories = self.factories.read().map_err(|_| PluginError::ResolutionFailed {
                plugin: plugin.name.clone(),
                reason: "plugin registry lock poisoned".to_string(),
            })?;
            match factories.get(&plugin.name) {
                Some(factory) => Arc::clone(factory),
                None => return Ok(None),
            }
        };

        let loader = factory()?;
        Ok(Some(LoaderDescriptor::plugin(plugin.name.clone(), loader)))
    }
}

impl std::fmt::Debug for FactoryPluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryPluginRegistry")
            .field("registered", &self.registered())
            .finish()
    }
}
