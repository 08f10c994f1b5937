//! Index presence check.
//!
//! A rebuild requested while a complete index already exists is a no-op.
//! "Complete" is structural: every required dataset has written its
//! completion marker, which loaders only do after their last record.

use crate::CacheStore;
use staticdex_core::{CacheNamespace, IndexResult};
use std::sync::Arc;

/// Answers whether a complete index is already present.
pub trait IndexPresence: Send + Sync {
    fn exists(&self) -> IndexResult<bool>;
}

/// Presence check over per-dataset completion markers.
#[derive(Clone)]
pub struct MarkerPresenceCheck {
    store: Arc<dyn CacheStore>,
    namespace: CacheNamespace,
    datasets: Vec<String>,
}

impl MarkerPresenceCheck {
    pub fn new<I, S>(store: Arc<dyn CacheStore>, namespace: CacheNamespace, datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            store,
            namespace,
            datasets: datasets.into_iter().map(Into::into).collect(),
        }
    }

    pub fn datasets(&self) -> &[String] {
        &self.datasets
    }

    /// Datasets whose marker is absent, in declaration order.
    pub fn missing(&self) -> IndexResult<Vec<String>> {
        let mut missing = Vec::new();
        for dataset in &self.datasets {
            if !self.store.exists(&self.namespace.marker_key(dataset))? {
                missing.push(dataset.clone());
            }
        }
        Ok(missing)
    }
}

impl IndexPresence for MarkerPresenceCheck {
    fn exists(&self) -> IndexResult<bool> {
        // Nothing to check means nothing was ever built.
        if self.datasets.is_empty() {
            return Ok(false);
        }
        for dataset in &self.datasets {
            if !self.store.exists(&self.namespace.marker_key(dataset))? {
                tracing::trace!(dataset = %dataset, "Dataset marker missing");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl std::fmt::Debug for MarkerPresenceCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkerPresenceCheck")
            .field("namespace", &self.namespace)
            .field("datasets", &self.datasets)
            .finish_non_exhaustive()
    }
}
