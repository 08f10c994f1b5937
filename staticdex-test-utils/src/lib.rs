//! staticdex Test Utilities
//!
//! Shared test infrastructure for the staticdex workspace:
//! - A failure-injecting cache store wrapping the in-memory one
//! - Loaders that record their invocations, fail, or panic
//! - Canned presence answers
//! - Fixtures and proptest generators

pub use staticdex_storage::InMemoryCacheStore;

pub use staticdex_core::{
    CacheError, CacheNamespace, GuardKey, IndexResult, LoaderError, PluginDescriptor,
    PluginError, RebuildConfig, StaticIndexError,
};

use serde_json::{json, Value};
use staticdex_loaders::Loader;
use staticdex_storage::{CacheResult, CacheStore, IndexPresence, ScanPage};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// FAILURE-INJECTING CACHE STORE
// ============================================================================

/// Cache operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    Get,
    Set,
    Delete,
    Scan,
    DeleteMany,
}

impl CacheOp {
    fn command(self) -> &'static str {
        match self {
            CacheOp::Get => "GET",
            CacheOp::Set => "SET",
            CacheOp::Delete => "DEL",
            CacheOp::Scan => "SCAN",
            CacheOp::DeleteMany => "UNLINK",
        }
    }
}

/// In-memory cache store that fails selected operations on demand and keeps
/// a log of every call it receives.
#[derive(Debug, Default)]
pub struct FlakyCacheStore {
    inner: InMemoryCacheStore,
    failing: Mutex<HashSet<CacheOp>>,
    calls: Mutex<Vec<(CacheOp, String)>>,
}

impl FlakyCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying store, for seeding and inspection without logging.
    pub fn inner(&self) -> &InMemoryCacheStore {
        &self.inner
    }

    /// Make every subsequent `op` fail with [`CacheError::CommandFailed`].
    pub fn fail_on(&self, op: CacheOp) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(op);
        }
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<(CacheOp, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of `op` calls that targeted `key`.
    pub fn calls_to(&self, op: CacheOp, key: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(o, k)| *o == op && k == key)
            .count()
    }

    fn check(&self, op: CacheOp, target: &str) -> CacheResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((op, target.to_string()));
        }
        let failing = self
            .failing
            .lock()
            .map_err(|_| CacheError::LockPoisoned)?;
        if failing.contains(&op) {
            return Err(CacheError::CommandFailed {
                command: op.command().to_string(),
                reason: "connection reset by peer".to_string(),
            });
        }
        Ok(())
    }
}

impl CacheStore for FlakyCacheStore {
    fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        self.check(CacheOp::Get, key)?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<()> {
        self.check(CacheOp::Set, key)?;
        self.inner.set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check(CacheOp::Delete, key)?;
        self.inner.delete(key)
    }

    fn scan(&self, pattern: &str, cursor: u64, count: usize) -> CacheResult<ScanPage> {
        self.check(CacheOp::Scan, pattern)?;
        self.inner.scan(pattern, cursor, count)
    }

    fn delete_many(&self, keys: &[String]) -> CacheResult<u64> {
        self.check(CacheOp::DeleteMany, &keys.join(" "))?;
        self.inner.delete_many(keys)
    }
}

// ============================================================================
// LOADERS
// ============================================================================

/// Shared, ordered record of loader invocations.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(name.to_string());
        }
    }

    /// Loader names in invocation order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.entries().iter().filter(|e| *e == name).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Loader that logs its invocation and writes one record plus its dataset
/// marker under its own name.
#[derive(Clone)]
pub struct RecordingLoader {
    name: String,
    log: CallLog,
    store: Arc<dyn CacheStore>,
    namespace: CacheNamespace,
}

impl RecordingLoader {
    pub fn new(
        name: impl Into<String>,
        log: CallLog,
        store: Arc<dyn CacheStore>,
        namespace: CacheNamespace,
    ) -> Self {
        Self {
            name: name.into(),
            log,
            store,
            namespace,
        }
    }

    /// Key of the record this loader writes.
    pub fn record_key(&self) -> String {
        self.namespace.record_key(&self.name, "loaded")
    }
}

impl Loader for RecordingLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<(), LoaderError> {
        self.log.record(&self.name);
        for (key, value) in [
            (self.record_key(), json!({ "loader": self.name })),
            (self.namespace.marker_key(&self.name), json!({ "records": 1 })),
        ] {
            self.store
                .set(&key, value, None)
                .map_err(|source| LoaderError::WriteFailed {
                    loader: self.name.clone(),
                    key,
                    source,
                })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordingLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingLoader")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Loader that logs its invocation and then fails.
#[derive(Debug, Clone)]
pub struct FailingLoader {
    name: String,
    log: CallLog,
}

impl FailingLoader {
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

impl Loader for FailingLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<(), LoaderError> {
        self.log.record(&self.name);
        Err(LoaderError::SourceUnavailable {
            loader: self.name.clone(),
            reason: "upstream dataset unreachable".to_string(),
        })
    }
}

/// Loader that logs its invocation and then panics.
#[derive(Debug, Clone)]
pub struct PanickingLoader {
    name: String,
    log: CallLog,
}

impl PanickingLoader {
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

impl Loader for PanickingLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<(), LoaderError> {
        self.log.record(&self.name);
        panic!("{} hit an unexpected record", self.name)
    }
}

// ============================================================================
// PRESENCE
// ============================================================================

/// Presence check with a fixed answer.
#[derive(Debug, Clone)]
pub struct StaticPresence {
    answer: IndexResult<bool>,
}

impl StaticPresence {
    pub fn present() -> Self {
        Self { answer: Ok(true) }
    }

    pub fn absent() -> Self {
        Self { answer: Ok(false) }
    }

    pub fn failing(error: CacheError) -> Self {
        Self {
            answer: Err(error.into()),
        }
    }
}

impl IndexPresence for StaticPresence {
    fn exists(&self) -> IndexResult<bool> {
        self.answer.clone()
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built data for common test scenarios.

    use super::*;
    use staticdex_loaders::StaticRecord;

    /// A few ICD-11 classification records.
    pub fn icd11_records() -> Vec<StaticRecord> {
        vec![
            StaticRecord::new("1A00", json!({"id": "1A00", "label": "Cholera"})),
            StaticRecord::new(
                "1A01",
                json!({"id": "1A01", "label": "Intestinal infection due to other Vibrio"}),
            ),
            StaticRecord::new("BA00", json!({"id": "BA00", "label": "Essential hypertension"})),
        ]
    }

    /// A few reference medicine records.
    pub fn medibase_records() -> Vec<StaticRecord> {
        vec![
            StaticRecord::new(
                "paracetamol-650",
                json!({"name": "Dolo 650", "generic": "Paracetamol", "company": "Micro Labs"}),
            ),
            StaticRecord::new(
                "amoxicillin-500",
                json!({"name": "Mox 500", "generic": "Amoxicillin", "company": "Sun Pharma"}),
            ),
        ]
    }

    /// Write `count` stale keys into `namespace`, standing in for a previous
    /// build of the index.
    pub fn seed_stale_index(
        store: &dyn CacheStore,
        namespace: &CacheNamespace,
        count: usize,
    ) -> CacheResult<Vec<String>> {
        let mut keys = Vec::with_capacity(count);
        for i in 0..count {
            let key = namespace.record_key("stale", &i.to_string());
            store.set(&key, json!({ "stale": i }), None)?;
            keys.push(key);
        }
        Ok(keys)
    }

    /// Write a key outside `namespace` that invalidation must not touch.
    pub fn seed_foreign_key(store: &dyn CacheStore) -> CacheResult<String> {
        let key = "care_session:abc123".to_string();
        store.set(&key, json!("session"), None)?;
        Ok(key)
    }

    /// Default configuration with the given plugins installed.
    pub fn config_with_plugins(plugins: &[&str]) -> RebuildConfig {
        RebuildConfig {
            plugins: plugins.iter().map(|p| p.to_string()).collect(),
            ..RebuildConfig::default()
        }
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for staticdex types.

    use super::*;
    use proptest::prelude::*;
    use proptest::sample::subsequence;

    /// A namespace prefix free of glob metacharacters and separators.
    pub fn arb_namespace_prefix() -> impl Strategy<Value = String> {
        "[a-z][a-z_]{2,15}"
    }

    /// A record id that is neither empty nor the dataset marker id.
    pub fn arb_record_id() -> impl Strategy<Value = String> {
        "[A-Za-z0-9][A-Za-z0-9._-]{0,11}"
    }

    /// An ordered list of distinct plugin names.
    pub fn arb_plugin_names() -> impl Strategy<Value = Vec<String>> {
        let pool: Vec<String> = ["abdm", "hcx", "scribe", "camera", "dicom", "fhir", "ayushma"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        (0..=pool.len()).prop_flat_map(move |n| subsequence(pool.clone(), n))
    }

    /// Behaviour scripted for one plugin in a rebuild.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PluginBehaviour {
        Loads,
        NoExtensionPoint,
        FailsToResolve,
        Fails,
        Panics,
    }

    pub fn arb_plugin_behaviour() -> impl Strategy<Value = PluginBehaviour> {
        prop_oneof![
            3 => Just(PluginBehaviour::Loads),
            2 => Just(PluginBehaviour::NoExtensionPoint),
            1 => Just(PluginBehaviour::FailsToResolve),
            1 => Just(PluginBehaviour::Fails),
            1 => Just(PluginBehaviour::Panics),
        ]
    }

    /// Distinct plugin names, each paired with a behaviour.
    pub fn arb_plugin_script() -> impl Strategy<Value = Vec<(String, PluginBehaviour)>> {
        arb_plugin_names().prop_flat_map(|names| {
            let len = names.len();
            proptest::collection::vec(arb_plugin_behaviour(), len)
                .prop_map(move |behaviours| names.clone().into_iter().zip(behaviours).collect())
        })
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over cache state.

    use super::*;

    /// Assert that no key of `namespace` exists in `store`.
    pub fn assert_namespace_empty(store: &InMemoryCacheStore, namespace: &CacheNamespace) {
        let keys = store.keys(&namespace.pattern()).unwrap();
        assert!(keys.is_empty(), "namespace {} still holds {:?}", namespace, keys);
    }

    /// Assert that the guard flag is not set.
    pub fn assert_guard_absent(store: &InMemoryCacheStore, key: &GuardKey) {
        assert!(
            !store.exists(key.as_str()).unwrap(),
            "guard {} is still set",
            key
        );
    }

    /// Assert that the guard flag is set.
    pub fn assert_guard_set(store: &InMemoryCacheStore, key: &GuardKey) {
        assert!(store.exists(key.as_str()).unwrap(), "guard {} is not set", key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flaky_store_fails_only_selected_ops() {
        let store = FlakyCacheStore::new();
        store.set("k", json!(1), None).unwrap();
        store.fail_on(CacheOp::Get);

        assert!(matches!(
            store.get("k"),
            Err(CacheError::CommandFailed { .. })
        ));
        assert!(store.delete("k").unwrap());

        store.heal();
        assert_eq!(store.get("k").unwrap(), None);
        assert_eq!(store.calls_to(CacheOp::Get, "k"), 2);
    }

    #[test]
    fn test_recording_loader_writes_record_and_marker() {
        let store = Arc::new(InMemoryCacheStore::new());
        let ns = CacheNamespace::default();
        let log = CallLog::new();
        let loader = RecordingLoader::new("icd11", log.clone(), store.clone(), ns.clone());

        loader.load().unwrap();

        assert_eq!(log.entries(), vec!["icd11"]);
        assert!(store.exists(&loader.record_key()).unwrap());
        assert!(store.exists(&ns.marker_key("icd11")).unwrap());
    }

    #[test]
    fn test_failing_loader_still_records_call() {
        let log = CallLog::new();
        let loader = FailingLoader::new("scribe", log.clone());
        assert!(loader.load().is_err());
        assert_eq!(log.count("scribe"), 1);
    }

    #[test]
    fn test_static_presence() {
        assert!(StaticPresence::present().exists().unwrap());
        assert!(!StaticPresence::absent().exists().unwrap());
        assert!(StaticPresence::failing(CacheError::LockPoisoned).exists().is_err());
    }
}
