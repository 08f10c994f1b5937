//! staticdex Storage - Cache Store Trait and Index Maintenance
//!
//! Defines the cache store abstraction the rebuild runs against, an
//! in-memory implementation, and the three cache-facing pieces of the
//! rebuild protocol:
//!
//! - [`NamespaceInvalidator`] deletes every key under the index prefix
//! - [`RebuildGuard`] is the advisory TTL flag that approximates single-flight
//! - [`IndexPresence`] answers whether a complete index already exists

pub mod glob;
pub mod guard;
pub mod invalidator;
pub mod memory;
pub mod presence;

pub use glob::GlobPattern;
pub use guard::{GuardAcquisition, RebuildGuard};
pub use invalidator::NamespaceInvalidator;
pub use memory::InMemoryCacheStore;
pub use presence::{IndexPresence, MarkerPresenceCheck};

use serde_json::Value;
use staticdex_core::CacheError;
use std::time::Duration;

/// Result type alias for cache store operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// One page of an incremental key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass to the next `scan` call; `0` once the scan is complete.
    pub cursor: u64,
    /// Keys matched on this page.
    pub keys: Vec<String>,
}

// ============================================================================
// CACHE STORE TRAIT
// ============================================================================

/// Shared key-value cache the index lives in.
///
/// Calls are synchronous and each one is independent: there is no grouping
/// of operations into transactions. Implementations must be safe to share
/// between threads.
pub trait CacheStore: Send + Sync {
    /// Get the value stored under `key`, if any and not expired.
    fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value. With a `ttl`
    /// the key disappears once it elapses.
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete `key`. Returns whether a key was removed.
    fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Check whether `key` currently exists.
    fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Incrementally scan keys matching a glob `pattern`.
    ///
    /// Start with cursor `0`; keep calling with the returned cursor until it
    /// comes back as `0`. Keys present for the whole scan are returned at
    /// least once. `count` bounds the number of keys per page.
    fn scan(&self, pattern: &str, cursor: u64, count: usize) -> CacheResult<ScanPage>;

    /// Delete several keys at once. Returns how many existed.
    fn delete_many(&self, keys: &[String]) -> CacheResult<u64>;

    /// Delete every key matching `pattern`, at most `batch_size` keys per
    /// round trip. Returns the number of keys removed.
    ///
    /// A failure part way leaves earlier batches deleted.
    fn delete_pattern(&self, pattern: &str, batch_size: usize) -> CacheResult<u64> {
        let batch_size = batch_size.max(1);
        let mut cursor = 0;
        let mut deleted = 0;

        loop {
            let page = self.scan(pattern, cursor, batch_size)?;
            if !page.keys.is_empty() {
                deleted += self.delete_many(&page.keys)?;
            }
            tracing::trace!(
                pattern,
                batch = page.keys.len(),
                deleted,
                "Deleted key batch"
            );
            if page.cursor == 0 {
                break;
            }
            cursor = page.cursor;
        }

        Ok(deleted)
    }
}

impl<T: CacheStore + ?Sized> CacheStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<()> {
        (**self).set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        (**self).delete(key)
    }

    fn exists(&self, key: &str) -> CacheResult<bool> {
        (**self).exists(key)
    }

    fn scan(&self, pattern: &str, cursor: u64, count: usize) -> CacheResult<ScanPage> {
        (**self).scan(pattern, cursor, count)
    }

    fn delete_many(&self, keys: &[String]) -> CacheResult<u64> {
        (**self).delete_many(keys)
    }

    fn delete_pattern(&self, pattern: &str, batch_size: usize) -> CacheResult<u64> {
        (**self).delete_pattern(pattern, batch_size)
    }
}
