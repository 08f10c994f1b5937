//! Error types for staticdex operations

use thiserror::Error;

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Invalid key pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("TTL of {ttl_secs}s is outside the representable range")]
    TtlOutOfRange { ttl_secs: u64 },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Errors raised while a loader populates its part of the namespace.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Source for loader {loader} unavailable: {reason}")]
    SourceUnavailable { loader: String, reason: String },

    #[error("Malformed record in loader {loader}: {reason}")]
    MalformedRecord { loader: String, reason: String },

    #[error("Loader {loader} failed to write {key}: {source}")]
    WriteFailed {
        loader: String,
        key: String,
        #[source]
        source: CacheError,
    },

    #[error("Loader {loader} panicked: {message}")]
    Panicked { loader: String, message: String },
}

/// Plugin resolution and invocation errors.
///
/// A plugin without an extension point is not an error; registries report it
/// as `Ok(None)`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("Failed to resolve static data loader for plugin {plugin}: {reason}")]
    ResolutionFailed { plugin: String, reason: String },

    #[error("Static data loader for plugin {plugin} failed: {source}")]
    InvocationFailed {
        plugin: String,
        #[source]
        source: LoaderError,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all staticdex errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StaticIndexError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Telemetry initialization failed: {reason}")]
    Telemetry { reason: String },
}

/// Result type alias for staticdex operations.
pub type IndexResult<T> = Result<T, StaticIndexError>;

// =============================================================================
// TESTS
// =============================================================================
