//! In-memory cache store.
//!
//! Behaves like a single Redis database for the operations the rebuild uses:
//! per-key TTLs, glob `SCAN` with a cursor, and bulk deletes. The clock can
//! be moved forward with [`InMemoryCacheStore::advance`] to exercise expiry.

use crate::glob::GlobPattern;
use crate::{CacheResult, CacheStore, ScanPage};
use chrono::Utc;
use serde_json::Value;
use staticdex_core::{CacheError, Timestamp};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Timestamp>,
    /// Write sequence number; scan cursors walk keys in this order so that
    /// deleting keys between pages never makes the scan skip survivors.
    seq: u64,
}

impl Entry {
    fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<String, Entry>,
    /// Keys by write sequence number, the order scans walk.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl StoreInner {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }
}

/// Thread-safe in-memory [`CacheStore`].
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    inner: RwLock<StoreInner>,
    clock_offset_ms: AtomicI64,
}

impl InMemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The store's notion of "now", including any [`advance`](Self::advance).
    pub fn now(&self) -> Timestamp {
        Utc::now() + chrono::Duration::milliseconds(self.clock_offset_ms.load(Ordering::SeqCst))
    }

    /// Move the store clock forward, expiring keys whose TTL elapses.
    pub fn advance(&self, by: Duration) {
        self.clock_offset_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// When `key` expires, if it exists and has a TTL.
    pub fn expires_at(&self, key: &str) -> CacheResult<Option<Timestamp>> {
        let now = self.now();
        let inner = self.inner.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(inner
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at))
    }

    /// All live keys matching `pattern`, sorted.
    pub fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let glob = GlobPattern::new(pattern)?;
        let now = self.now();
        let inner = self.inner.read().map_err(|_| CacheError::LockPoisoned)?;
        let mut keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Number of live keys.
    pub fn len(&self) -> CacheResult<usize> {
        let now = self.now();
        let inner = self.inner.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(inner.entries.values().filter(|e| e.is_live(now)).count())
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every key.
    pub fn clear(&self) -> CacheResult<()> {
        let mut inner = self.inner.write().map_err(|_| CacheError::LockPoisoned)?;
        inner.entries.clear();
        inner.order.clear();
        Ok(())
    }

    fn ttl_deadline(&self, ttl: Option<Duration>) -> CacheResult<Option<Timestamp>> {
        let Some(ttl) = ttl else {
            return Ok(None);
        };
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|delta| self.now().checked_add_signed(delta))
            .map(Some)
            .ok_or(CacheError::TtlOutOfRange {
                ttl_secs: ttl.as_secs(),
            })
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let now = self.now();
        let inner = self.inner.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(inner
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<()> {
        let expires_at = self.ttl_deadline(ttl)?;
        let mut inner = self.inner.write().map_err(|_| CacheError::LockPoisoned)?;
        inner.remove(key);
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.order.insert(seq, key.to_string());
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                seq,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = self.now();
        let mut inner = self.inner.write().map_err(|_| CacheError::LockPoisoned)?;
        Ok(inner.remove(key).is_some_and(|entry| entry.is_live(now)))
    }

    /// Walks at most `count` keys in write order past `cursor`, like Redis
    /// `SCAN ... COUNT`: a page may hold fewer matches than `count`, or none,
    /// while the cursor is still non-zero. Expired keys are skipped, not
    /// reaped, so a page only needs the read lock.
    fn scan(&self, pattern: &str, cursor: u64, count: usize) -> CacheResult<ScanPage> {
        let glob = GlobPattern::new(pattern)?;
        let count = count.max(1);
        let now = self.now();

        let inner = self.inner.read().map_err(|_| CacheError::LockPoisoned)?;
        let mut walk = inner.order.range(cursor.saturating_add(1)..);

        let mut keys = Vec::new();
        let mut last_seq = cursor;
        for (seq, key) in walk.by_ref().take(count) {
            last_seq = *seq;
            let live = inner.entries.get(key).is_some_and(|e| e.is_live(now));
            if live && glob.matches(key) {
                keys.push(key.clone());
            }
        }

        let next_cursor = if walk.next().is_some() { last_seq } else { 0 };
        Ok(ScanPage {
            cursor: next_cursor,
            keys,
        })
    }

    fn delete_many(&self, keys: &[String]) -> CacheResult<u64> {
        let now = self.now();
        let mut inner = self.inner.write().map_err(|_| CacheError::LockPoisoned)?;
        let mut deleted = 0;
        for key in keys {
            if inner.remove(key).is_some_and(|entry| entry.is_live(now)) {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn seeded(keys: &[&str]) -> InMemoryCacheStore {
        let store = InMemoryCacheStore::new();
        for key in keys {
            store.set(key, json!(true), None).unwrap();
        }
        store
    }

    #[test]
    fn test_get_set_delete() {
        let store = InMemoryCacheStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", json!({"label": "Cholera"}), None).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!({"label": "Cholera"})));
        assert!(store.exists("a").unwrap());

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(!store.exists("a").unwrap());
    }

    #[test]
    fn test_ttl_expiry_with_advance() {
        let store = InMemoryCacheStore::new();
        store
            .set("flag", json!(true), Some(Duration::from_secs(120)))
            .unwrap();
        assert!(store.expires_at("flag").unwrap().is_some());

        store.advance(Duration::from_secs(119));
        assert!(store.exists("flag").unwrap());

        store.advance(Duration::from_secs(1));
        assert!(!store.exists("flag").unwrap());
        assert_eq!(store.expires_at("flag").unwrap(), None);
        assert!(!store.delete("flag").unwrap());
    }

    #[test]
    fn test_set_without_ttl_has_no_expiry() {
        let store = seeded(&["k"]);
        assert_eq!(store.expires_at("k").unwrap(), None);
        store.advance(Duration::from_secs(86_400));
        assert!(store.exists("k").unwrap());
    }

    #[test]
    fn test_scan_pages_until_cursor_zero() {
        let store = seeded(&["ns:1", "ns:2", "ns:3", "ns:4", "ns:5", "other"]);

        let mut cursor = 0;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = store.scan("ns:*", cursor, 2).unwrap();
            assert!(page.keys.len() <= 2);
            seen.extend(page.keys);
            pages += 1;
            if page.cursor == 0 {
                break;
            }
            cursor = page.cursor;
        }

        seen.sort();
        assert_eq!(seen, vec!["ns:1", "ns:2", "ns:3", "ns:4", "ns:5"]);
        assert_eq!(pages, 3);
    }

    #[test]
    fn test_scan_survives_deletes_between_pages() {
        let store = seeded(&["ns:1", "ns:2", "ns:3", "ns:4"]);

        let first = store.scan("ns:*", 0, 2).unwrap();
        store.delete_many(&first.keys).unwrap();
        let second = store.scan("ns:*", first.cursor, 2).unwrap();

        let mut rest = second.keys;
        rest.sort();
        assert_eq!(rest, vec!["ns:3", "ns:4"]);
        assert_eq!(second.cursor, 0);
    }

    #[test]
    fn test_scan_page_walks_at_most_count_keys() {
        let mut keys: Vec<String> = (0..10).map(|i| format!("other:{i}")).collect();
        keys.push("ns:1".to_string());
        let store = InMemoryCacheStore::new();
        for key in &keys {
            store.set(key, json!(1), None).unwrap();
        }

        let page = store.scan("ns:*", 0, 3).unwrap();
        assert!(page.keys.is_empty());
        assert_ne!(page.cursor, 0);

        assert_eq!(store.delete_pattern("ns:*", 3).unwrap(), 1);
        assert_eq!(store.len().unwrap(), 10);
    }

    #[test]
    fn test_overwrite_moves_key_to_end_of_scan_order() {
        let store = seeded(&["ns:1", "ns:2"]);
        store.set("ns:1", json!(2), None).unwrap();

        let first = store.scan("ns:*", 0, 1).unwrap();
        assert_eq!(first.keys, vec!["ns:2"]);
        let second = store.scan("ns:*", first.cursor, 1).unwrap();
        assert_eq!(second.keys, vec!["ns:1"]);
        assert_eq!(second.cursor, 0);
    }

    #[test]
    fn test_oversized_ttl_is_rejected() {
        let store = InMemoryCacheStore::new();
        let err = store
            .set("flag", json!(true), Some(Duration::MAX))
            .unwrap_err();
        assert_eq!(
            err,
            CacheError::TtlOutOfRange {
                ttl_secs: Duration::MAX.as_secs()
            }
        );
        assert!(!store.exists("flag").unwrap());
    }

    #[test]
    fn test_delete_pattern_batches() {
        let keys: Vec<String> = (0..10).map(|i| format!("care_static_data:icd11:{i}")).collect();
        let store = InMemoryCacheStore::new();
        for key in &keys {
            store.set(key, json!(1), None).unwrap();
        }
        store.set("redis_index_loading", json!(true), None).unwrap();

        let deleted = store.delete_pattern("care_static_data*", 3).unwrap();
        assert_eq!(deleted, 10);
        assert!(store.keys("care_static_data*").unwrap().is_empty());
        assert!(store.exists("redis_index_loading").unwrap());
    }

    #[test]
    fn test_delete_pattern_ignores_expired_keys() {
        let store = InMemoryCacheStore::new();
        store.set("ns:live", json!(1), None).unwrap();
        store
            .set("ns:stale", json!(1), Some(Duration::from_secs(1)))
            .unwrap();
        store.advance(Duration::from_secs(2));

        assert_eq!(store.delete_pattern("ns*", 100).unwrap(), 1);
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let store = InMemoryCacheStore::new();
        assert!(matches!(
            store.scan("ns:[", 0, 10),
            Err(CacheError::InvalidPattern { .. })
        ));
    }

    proptest! {
        /// delete_pattern removes exactly the matching keys whatever the
        /// batch size.
        #[test]
        fn prop_delete_pattern_removes_exactly_matches(
            inside in proptest::collection::hash_set("[a-z0-9]{1,8}", 0..60),
            outside in proptest::collection::hash_set("[a-z0-9]{1,8}", 0..20),
            batch_size in 1usize..16,
        ) {
            let store = InMemoryCacheStore::new();
            for id in &inside {
                store.set(&format!("idx:{id}"), json!(1), None).unwrap();
            }
            for id in &outside {
                store.set(&format!("other:{id}"), json!(1), None).unwrap();
            }

            let deleted = store.delete_pattern("idx*", batch_size).unwrap();
            prop_assert_eq!(deleted, inside.len() as u64);
            prop_assert!(store.keys("idx*").unwrap().is_empty());
            prop_assert_eq!(store.keys("other:*").unwrap().len(), outside.len());
        }
    }
}
