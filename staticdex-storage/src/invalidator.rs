//! Namespace invalidation.
//!
//! Removes every key of the derived index before it is rebuilt. There is no
//! partial-success result: either all matching keys were deleted, or the call
//! fails and the namespace may be half-cleared. Callers must not rebuild on
//! top of a failed invalidation.

use crate::{CacheResult, CacheStore};
use staticdex_core::{CacheNamespace, DEFAULT_INVALIDATION_BATCH_SIZE};
use std::sync::Arc;

/// Deletes all keys under a namespace prefix in bounded batches.
#[derive(Clone)]
pub struct NamespaceInvalidator {
    store: Arc<dyn CacheStore>,
    batch_size: usize,
}

impl NamespaceInvalidator {
    pub fn new(store: Arc<dyn CacheStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Invalidator using the default batch size of 25,000 keys.
    pub fn with_defaults(store: Arc<dyn CacheStore>) -> Self {
        Self::new(store, DEFAULT_INVALIDATION_BATCH_SIZE)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Delete every key of `namespace`, returning how many were removed.
    pub fn invalidate(&self, namespace: &CacheNamespace) -> CacheResult<u64> {
        let pattern = namespace.pattern();
        tracing::debug!(
            pattern = %pattern,
            batch_size = self.batch_size,
            "Invalidating namespace"
        );
        self.store.delete_pattern(&pattern, self.batch_size)
    }
}

impl std::fmt::Debug for NamespaceInvalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceInvalidator")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryCacheStore;
    use serde_json::json;

    #[test]
    fn test_invalidate_removes_only_namespace() {
        let store = Arc::new(InMemoryCacheStore::new());
        let ns = CacheNamespace::default();
        for id in 0..7 {
            store
                .set(&ns.record_key("icd11", &id.to_string()), json!(id), None)
                .unwrap();
        }
        store.set(&ns.marker_key("icd11"), json!(true), None).unwrap();
        store.set("redis_index_loading", json!(true), None).unwrap();
        store.set("session:abc", json!("x"), None).unwrap();

        let invalidator = NamespaceInvalidator::new(store.clone(), 2);
        assert_eq!(invalidator.invalidate(&ns).unwrap(), 8);
        assert!(store.keys("care_static_data*").unwrap().is_empty());
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_invalidate_empty_namespace_succeeds() {
        let store = Arc::new(InMemoryCacheStore::new());
        let invalidator = NamespaceInvalidator::with_defaults(store);
        assert_eq!(invalidator.invalidate(&CacheNamespace::default()).unwrap(), 0);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let store = Arc::new(InMemoryCacheStore::new());
        let invalidator = NamespaceInvalidator::new(store, 0);
        assert_eq!(invalidator.batch_size(), 1);
    }
}
