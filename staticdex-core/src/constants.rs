//! Constants for staticdex
//!
//! Defaults shared by configuration, the cache layer and the rebuild job.

// ============================================================================
// NAMESPACE
// ============================================================================

/// Key prefix shared by every key of the derived reference index.
pub const DEFAULT_NAMESPACE_PREFIX: &str = "care_static_data";

/// Separator between namespace prefix, dataset and record id.
pub const KEY_SEPARATOR: char = ':';

/// Record id reserved for the per-dataset completion marker.
pub const DATASET_MARKER_ID: &str = "__indexed__";

// ============================================================================
// REBUILD GUARD
// ============================================================================

/// Cache key of the advisory rebuild flag.
pub const DEFAULT_GUARD_KEY: &str = "redis_index_loading";

/// Time-to-live of the rebuild flag in seconds (2 minutes).
pub const DEFAULT_GUARD_TTL_SECS: u64 = 120;

/// Upper bound accepted for the rebuild flag TTL in seconds (1 day).
pub const MAX_GUARD_TTL_SECS: u64 = 86_400;

// ============================================================================
// INVALIDATION
// ============================================================================

/// Number of keys scanned and deleted per invalidation batch.
pub const DEFAULT_INVALIDATION_BATCH_SIZE: usize = 25_000;

// ============================================================================
// BUILT-IN DATASETS
// ============================================================================

/// Dataset name of the disease classification loader.
pub const CLASSIFICATION_DATASET: &str = "icd11";

/// Dataset name of the reference medicine loader.
pub const REFERENCE_MEDICINE_DATASET: &str = "medibase";

/// Conventional extension point a plugin exposes to contribute static data.
pub const PLUGIN_EXTENSION_POINT: &str = "static_data.load_static_data";
