//! Loader registry: built-ins in order, then whatever the plugins provide.

use crate::{
    panic_message, Loader, LoaderDescriptor, PluginManager, PluginRegistry, StaticPluginManager,
};
use staticdex_core::{LoaderKind, PluginDescriptor, PluginError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Outcome of looking up one plugin's extension point.
#[derive(Debug, Clone)]
pub enum PluginResolution {
    /// The plugin contributes a loader.
    Resolved(LoaderDescriptor),
    /// The plugin has no static data extension point.
    NoExtensionPoint(PluginDescriptor),
    /// Looking up the extension point failed.
    Failed {
        plugin: PluginDescriptor,
        error: PluginError,
    },
}

impl PluginResolution {
    /// Name of the plugin this resolution is about.
    pub fn plugin_name(&self) -> &str {
        match self {
            PluginResolution::Resolved(descriptor) => match descriptor.kind() {
                LoaderKind::Plugin { plugin } => plugin.as_str(),
                LoaderKind::Builtin => descriptor.name(),
            },
            PluginResolution::NoExtensionPoint(plugin) => plugin.name.as_str(),
            PluginResolution::Failed { plugin, .. } => plugin.name.as_str(),
        }
    }
}

/// Ordered built-in loaders plus plugin discovery.
#[derive(Clone)]
pub struct LoaderRegistry {
    builtins: Vec<LoaderDescriptor>,
    manager: Arc<dyn PluginManager>,
    plugins: Arc<dyn PluginRegistry>,
}

impl LoaderRegistry {
    pub fn new(manager: Arc<dyn PluginManager>, plugins: Arc<dyn PluginRegistry>) -> Self {
        Self {
            builtins: Vec::new(),
            manager,
            plugins,
        }
    }

    /// Registry with built-ins only.
    pub fn without_plugins() -> Self {
        Self::new(
            Arc::new(StaticPluginManager::empty()),
            Arc::new(crate::FactoryPluginRegistry::new()),
        )
    }

    /// Append a built-in loader; built-ins run in the order they are added.
    pub fn with_builtin(mut self, loader: Arc<dyn Loader>) -> Self {
        self.builtins.push(LoaderDescriptor::builtin(loader));
        self
    }

    /// Built-in loaders in registration order.
    pub fn builtins(&self) -> &[LoaderDescriptor] {
        &self.builtins
    }

    /// Installed plugins, in the plugin manager's order.
    pub fn plugins(&self) -> Vec<PluginDescriptor> {
        self.manager.plugins()
    }

    /// Look up one plugin's loader. A registry that panics while resolving
    /// is reported as a failed resolution.
    pub fn resolve_plugin(&self, plugin: &PluginDescriptor) -> PluginResolution {
        let resolved = catch_unwind(AssertUnwindSafe(|| self.plugins.resolve(plugin)))
            .unwrap_or_else(|payload| {
                Err(PluginError::ResolutionFailed {
                    plugin: plugin.name.clone(),
                    reason: format!("resolution panicked: {}", panic_message(payload.as_ref())),
                })
            });

        match resolved {
            Ok(Some(descriptor)) => PluginResolution::Resolved(descriptor),
            Ok(None) => PluginResolution::NoExtensionPoint(plugin.clone()),
            Err(error) => PluginResolution::Failed {
                plugin: plugin.clone(),
                error,
            },
        }
    }

    /// Resolve every installed plugin, in order.
    pub fn plugin_loaders(&self) -> Vec<PluginResolution> {
        self.plugins()
            .iter()
            .map(|plugin| self.resolve_plugin(plugin))
            .collect()
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("builtins", &self.builtins)
            .finish_non_exhaustive()
    }
}
