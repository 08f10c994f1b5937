//! Advisory rebuild guard.
//!
//! A boolean flag with a TTL in the shared cache. Acquisition is
//! read-then-set, not an atomic test-and-set: two workers that check the flag
//! at the same moment can both acquire it. The index presence check bounds
//! the cost of such a double rebuild. The TTL lets the next attempt through
//! when a worker dies without releasing.

use crate::{CacheResult, CacheStore};
use chrono::Utc;
use serde_json::Value;
use staticdex_core::{
    CacheError, GuardKey, GuardLease, LeaseData, RunId, DEFAULT_GUARD_TTL_SECS,
};
use std::sync::Arc;
use std::time::Duration;

/// Result of trying to take the rebuild flag.
#[derive(Debug)]
pub enum GuardAcquisition {
    /// The flag was absent and is now set by this worker.
    Acquired(GuardLease),
    /// The flag was already set; the caller must skip the rebuild.
    AlreadyHeld,
}

impl GuardAcquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, GuardAcquisition::Acquired(_))
    }
}

/// The rebuild flag stored under a fixed key.
#[derive(Clone)]
pub struct RebuildGuard {
    store: Arc<dyn CacheStore>,
    key: GuardKey,
    ttl: Duration,
}

impl RebuildGuard {
    pub fn new(store: Arc<dyn CacheStore>, key: GuardKey, ttl: Duration) -> Self {
        Self { store, key, ttl }
    }

    /// Guard on `redis_index_loading` with a 120 second TTL.
    pub fn with_defaults(store: Arc<dyn CacheStore>) -> Self {
        Self::new(
            store,
            GuardKey::default(),
            Duration::from_secs(DEFAULT_GUARD_TTL_SECS),
        )
    }

    pub fn key(&self) -> &GuardKey {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether the flag is currently set to a truthy value.
    pub fn is_held(&self) -> CacheResult<bool> {
        Ok(self
            .store
            .get(self.key.as_str())?
            .is_some_and(|value| is_truthy(&value)))
    }

    /// Take the flag if it is free.
    ///
    /// When the flag is already set it is left untouched, TTL included. A TTL
    /// too large to turn into an expiry time fails before the flag is set.
    pub fn acquire(&self, run_id: RunId) -> CacheResult<GuardAcquisition> {
        if self.is_held()? {
            return Ok(GuardAcquisition::AlreadyHeld);
        }

        let lease = LeaseData::new(run_id, self.key.clone(), Utc::now(), self.ttl).map_err(
            |_| CacheError::TtlOutOfRange {
                ttl_secs: self.ttl.as_secs(),
            },
        )?;
        self.store
            .set(self.key.as_str(), Value::Bool(true), Some(self.ttl))?;

        Ok(GuardAcquisition::Acquired(GuardLease::new(lease)))
    }

    /// Clear the flag unconditionally, whoever set it.
    pub fn release(&self) -> CacheResult<bool> {
        self.store.delete(self.key.as_str())
    }

    /// Clear the flag for a held lease, consuming the lease.
    pub fn release_lease(&self, lease: GuardLease) -> CacheResult<LeaseData> {
        self.release()?;
        Ok(lease.release())
    }
}

impl std::fmt::Debug for RebuildGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildGuard")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Truthiness of a stored flag value.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
