//! staticdex Loaders - Units of Work that Populate the Index
//!
//! A loader is a named, argument-less unit of work whose only effect is
//! writing its own keys into the shared namespace. Loaders come in two kinds:
//!
//! - **built-in** loaders are compiled in and always run first, in
//!   registration order
//! - **plugin** loaders are looked up by plugin name at run time; a plugin
//!   without a static data extension point is simply skipped

pub mod dataset;
pub mod plugin;
pub mod registry;

pub use dataset::{DatasetLoader, InlineSource, JsonFileSource, RecordSource, SourceError, StaticRecord};
pub use plugin::{
    FactoryPluginRegistry, LoaderFactory, PluginManager, PluginRegistry, StaticPluginManager,
};
pub use registry::{LoaderRegistry, PluginResolution};

use staticdex_core::{LoaderError, LoaderKind};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

// ============================================================================
// LOADER TRAIT
// ============================================================================

/// A unit of work that writes part of the index.
pub trait Loader: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Populate this loader's part of the namespace.
    fn load(&self) -> Result<(), LoaderError>;
}

/// Adapter turning a closure into a [`Loader`].
pub struct FnLoader<F> {
    name: String,
    f: F,
}

impl<F> FnLoader<F>
where
    F: Fn() -> Result<(), LoaderError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Loader for FnLoader<F>
where
    F: Fn() -> Result<(), LoaderError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<(), LoaderError> {
        (self.f)()
    }
}

// ============================================================================
// LOADER DESCRIPTOR
// ============================================================================

/// A loader together with where it came from.
#[derive(Clone)]
pub struct LoaderDescriptor {
    name: String,
    kind: LoaderKind,
    loader: Arc<dyn Loader>,
}

impl LoaderDescriptor {
    /// Describe a built-in loader.
    pub fn builtin(loader: Arc<dyn Loader>) -> Self {
        Self {
            name: loader.name().to_string(),
            kind: LoaderKind::Builtin,
            loader,
        }
    }

    /// Describe the loader a plugin contributes.
    pub fn plugin(plugin: impl Into<String>, loader: Arc<dyn Loader>) -> Self {
        let plugin = plugin.into();
        Self {
            name: loader.name().to_string(),
            kind: LoaderKind::Plugin { plugin },
            loader,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &LoaderKind {
        &self.kind
    }

    /// Run the loader. Errors and panics propagate to the caller.
    pub fn invoke(&self) -> Result<(), LoaderError> {
        self.loader.load()
    }

    /// Run the loader, turning a panic into [`LoaderError::Panicked`].
    pub fn invoke_isolated(&self) -> Result<(), LoaderError> {
        match catch_unwind(AssertUnwindSafe(|| self.loader.load())) {
            Ok(result) => result,
            Err(payload) => Err(LoaderError::Panicked {
                loader: self.name.clone(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl fmt::Debug for LoaderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_loader_runs_closure() {
        let loader = FnLoader::new("noop", || Ok(()));
        assert_eq!(loader.name(), "noop");
        assert!(loader.load().is_ok());
    }

    #[test]
    fn test_descriptor_kinds() {
        let loader: Arc<dyn Loader> = Arc::new(FnLoader::new("icd11", || Ok(())));
        let builtin = LoaderDescriptor::builtin(loader.clone());
        assert_eq!(builtin.name(), "icd11");
        assert!(builtin.kind().is_builtin());

        let plugin = LoaderDescriptor::plugin("abdm", loader);
        assert_eq!(
            plugin.kind(),
            &LoaderKind::Plugin {
                plugin: "abdm".to_string()
            }
        );
    }

    #[test]
    fn test_invoke_isolated_catches_panic() {
        let loader: Arc<dyn Loader> = Arc::new(FnLoader::new("boom", || -> Result<(), LoaderError> {
            panic!("index file truncated")
        }));
        let descriptor = LoaderDescriptor::plugin("scribe", loader);

        let err = descriptor.invoke_isolated().unwrap_err();
        assert_eq!(
            err,
            LoaderError::Panicked {
                loader: "boom".to_string(),
                message: "index file truncated".to_string(),
            }
        );
    }

    #[test]
    fn test_invoke_isolated_passes_errors_through() {
        let loader: Arc<dyn Loader> = Arc::new(FnLoader::new("broken", || {
            Err(LoaderError::SourceUnavailable {
                loader: "broken".to_string(),
                reason: "missing file".to_string(),
            })
        }));
        let descriptor = LoaderDescriptor::builtin(loader);
        assert!(matches!(
            descriptor.invoke_isolated(),
            Err(LoaderError::SourceUnavailable { .. })
        ));
    }
}
