//! staticdex Core - Shared Types
//!
//! Pure data structures for the reference-index rebuild. Every other crate
//! depends on this one; it performs no I/O.

pub mod config;
pub mod constants;
pub mod error;
pub mod lease;

pub use config::RebuildConfig;
pub use constants::*;
pub use error::{
    CacheError, ConfigError, IndexResult, LoaderError, PluginError, StaticIndexError,
};
pub use lease::{GuardLease, LeaseData, LeaseStateError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Identifier of a single rebuild cycle, used to correlate log lines.
pub type RunId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 run id (timestamp-sortable).
pub fn new_run_id() -> RunId {
    Uuid::now_v7()
}

// ============================================================================
// CACHE NAMESPACE
// ============================================================================

/// The set of cache keys sharing one prefix, treated as a single logical index.
///
/// Record keys have the form `<prefix>:<dataset>:<id>`; the invalidation
/// pattern is `<prefix>*`, matching the prefix itself and anything after it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheNamespace {
    prefix: String,
}

impl CacheNamespace {
    /// Create a namespace for the given key prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The raw key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Glob pattern matching every key of the namespace.
    pub fn pattern(&self) -> String {
        format!("{}*", self.prefix)
    }

    /// Glob pattern matching every key of one dataset.
    pub fn dataset_pattern(&self, dataset: &str) -> String {
        format!("{}{sep}{}{sep}*", self.prefix, dataset, sep = KEY_SEPARATOR)
    }

    /// Key of a single record inside a dataset.
    pub fn record_key(&self, dataset: &str, id: &str) -> String {
        format!("{}{sep}{}{sep}{}", self.prefix, dataset, id, sep = KEY_SEPARATOR)
    }

    /// Key written once a dataset has been fully loaded.
    pub fn marker_key(&self, dataset: &str) -> String {
        self.record_key(dataset, DATASET_MARKER_ID)
    }

    /// Whether a concrete key belongs to this namespace.
    pub fn contains(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }
}

impl Default for CacheNamespace {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE_PREFIX)
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)
    }
}

// ============================================================================
// GUARD KEY
// ============================================================================

/// Cache key of the advisory rebuild flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuardKey(String);

impl GuardKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GuardKey {
    fn default() -> Self {
        Self::new(DEFAULT_GUARD_KEY)
    }
}

impl fmt::Display for GuardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// LOADERS AND PLUGINS
// ============================================================================

/// Where a loader comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoaderKind {
    /// Compiled into the rebuild job; runs first, failures are fatal.
    Builtin,
    /// Contributed by the named plugin; failures are isolated.
    Plugin { plugin: String },
}

impl LoaderKind {
    pub fn is_builtin(&self) -> bool {
        matches!(self, LoaderKind::Builtin)
    }
}

impl fmt::Display for LoaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderKind::Builtin => f.write_str("builtin"),
            LoaderKind::Plugin { plugin } => write!(f, "plugin:{}", plugin),
        }
    }
}

/// Name of an externally registered plugin, as supplied by the plugin manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Fully qualified extension point this plugin may expose,
    /// e.g. `abdm.static_data.load_static_data`.
    pub fn extension_point(&self) -> String {
        format!("{}.{}", self.name, PLUGIN_EXTENSION_POINT)
    }
}

impl fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// =============================================================================
// TESTS
// =============================================================================
