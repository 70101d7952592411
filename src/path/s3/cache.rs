//! TTL + LRU cache over S3 API calls.
//!
//! Entries are keyed by (operation, bucket, key, extra params). Listing pages,
//! head lookups, and probe results are all cached; data reads are not. Write
//! operations invalidate the exact key, every ancestor directory listing, and
//! all descendant keys.

use super::api::{ListPage, S3ObjectInfo};
use crate::ignore_poison::IgnorePoison;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TTL_SECS: u64 = 60;
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Cached result of one S3 API call.
#[derive(Debug, Clone, PartialEq)]
pub enum S3CachedValue {
    Head(S3ObjectInfo),
    ListPage(ListPage),
    Bool(bool),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub max_entries: usize,
    pub default_ttl_seconds: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

struct CacheEntry {
    data: S3CachedValue,
    timestamp: Instant,
    ttl: Duration,
    /// Recency stamp; also the key into the recency index.
    last_access: u64,
    operation: String,
    bucket: String,
    key: String,
}

struct CacheInner {
    default_ttl: Duration,
    max_entries: usize,
    entries: HashMap<String, CacheEntry>,
    /// access stamp → cache key, so the LRU victim is the first entry.
    recency: BTreeMap<u64, String>,
    access_counter: u64,
    cache_hits: u64,
    cache_misses: u64,
}

impl CacheInner {
    fn next_stamp(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    fn remove_entry(&mut self, cache_key: &str) {
        if let Some(entry) = self.entries.remove(cache_key) {
            self.recency.remove(&entry.last_access);
        }
    }

    fn evict_lru(&mut self) {
        if let Some((_, cache_key)) = self.recency.pop_first() {
            self.entries.remove(&cache_key);
        }
    }
}

fn cache_key_for(operation: &str, bucket: &str, key: &str, extra: &str) -> String {
    format!("{}\n{}\n{}\n{}", operation, bucket, key, extra)
}

/// Operation-keyed cache of S3 API responses.
pub struct S3Cache {
    inner: Mutex<CacheInner>,
}

impl S3Cache {
    pub fn new(default_ttl: Duration, max_entries: usize) -> S3Cache {
        S3Cache {
            inner: Mutex::new(CacheInner {
                default_ttl,
                max_entries,
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                access_counter: 0,
                cache_hits: 0,
                cache_misses: 0,
            }),
        }
    }

    /// Returns the cached value if present and fresh; touches recency on hit.
    pub fn get(&self, operation: &str, bucket: &str, key: &str, extra: &str) -> Option<S3CachedValue> {
        let cache_key = cache_key_for(operation, bucket, key, extra);
        let mut inner = self.inner.lock_ignore_poison();

        let fresh = match inner.entries.get(&cache_key) {
            None => {
                inner.cache_misses += 1;
                return None;
            }
            Some(entry) => entry.timestamp.elapsed() <= entry.ttl,
        };
        if !fresh {
            inner.remove_entry(&cache_key);
            inner.cache_misses += 1;
            return None;
        }

        let stamp = inner.next_stamp();
        let entry = inner.entries.get_mut(&cache_key).expect("checked above");
        let old_stamp = entry.last_access;
        entry.last_access = stamp;
        let data = entry.data.clone();
        inner.recency.remove(&old_stamp);
        inner.recency.insert(stamp, cache_key);
        inner.cache_hits += 1;
        Some(data)
    }

    /// Inserts a value, evicting the LRU entry when at capacity.
    pub fn put(
        &self,
        operation: &str,
        bucket: &str,
        key: &str,
        extra: &str,
        data: S3CachedValue,
        ttl: Option<Duration>,
    ) {
        let cache_key = cache_key_for(operation, bucket, key, extra);
        let mut inner = self.inner.lock_ignore_poison();

        if inner.entries.len() >= inner.max_entries && !inner.entries.contains_key(&cache_key) {
            inner.evict_lru();
        }
        inner.remove_entry(&cache_key);

        let stamp = inner.next_stamp();
        let ttl = ttl.unwrap_or(inner.default_ttl);
        inner.entries.insert(
            cache_key.clone(),
            CacheEntry {
                data,
                timestamp: Instant::now(),
                ttl,
                last_access: stamp,
                operation: operation.to_string(),
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
        );
        inner.recency.insert(stamp, cache_key);
    }

    /// Invalidates entries affected by a write to `key`: the exact key,
    /// listing/head entries of any ancestor prefix, and all descendants.
    pub fn invalidate_key(&self, bucket: &str, key: &str) {
        let descendant_prefix = format!("{}/", key.trim_end_matches('/'));
        self.remove_matching(|entry| {
            entry.bucket == bucket
                && (entry.key == key
                    || (matches!(entry.operation.as_str(), "list_objects_v2" | "head_bucket")
                        && key.starts_with(&entry.key))
                    || entry.key.starts_with(&descendant_prefix))
        });
    }

    /// Invalidates every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, bucket: &str, prefix: &str) {
        self.remove_matching(|entry| entry.bucket == bucket && entry.key.starts_with(prefix));
    }

    pub fn invalidate_bucket(&self, bucket: &str) {
        self.remove_matching(|entry| entry.bucket == bucket);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock_ignore_poison();
        inner.entries.clear();
        inner.recency.clear();
    }

    /// Replaces limits and drops current entries.
    pub fn configure(&self, default_ttl: Duration, max_entries: usize) {
        let mut inner = self.inner.lock_ignore_poison();
        inner.entries.clear();
        inner.recency.clear();
        inner.default_ttl = default_ttl;
        inner.max_entries = max_entries;
    }

    pub fn stats(&self) -> S3CacheStats {
        let inner = self.inner.lock_ignore_poison();
        let expired = inner
            .entries
            .values()
            .filter(|e| e.timestamp.elapsed() > e.ttl)
            .count();
        S3CacheStats {
            total_entries: inner.entries.len(),
            expired_entries: expired,
            max_entries: inner.max_entries,
            default_ttl_seconds: inner.default_ttl.as_secs(),
            cache_hits: inner.cache_hits,
            cache_misses: inner.cache_misses,
        }
    }

    fn remove_matching(&self, predicate: impl Fn(&CacheEntry) -> bool) {
        let mut inner = self.inner.lock_ignore_poison();
        let victims: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(cache_key, _)| cache_key.clone())
            .collect();
        for cache_key in victims {
            inner.remove_entry(&cache_key);
        }
    }
}

static S3_CACHE: LazyLock<S3Cache> =
    LazyLock::new(|| S3Cache::new(Duration::from_secs(DEFAULT_TTL_SECS), DEFAULT_MAX_ENTRIES));

/// Process-wide S3 API cache.
pub fn s3_cache() -> &'static S3Cache {
    &S3_CACHE
}

/// Reconfigures the process-wide cache, dropping current entries.
pub fn configure_s3_cache(default_ttl: Duration, max_entries: usize) {
    S3_CACHE.configure(default_ttl, max_entries);
}

pub fn clear_s3_cache() {
    S3_CACHE.clear();
}

pub fn s3_cache_stats() -> S3CacheStats {
    S3_CACHE.stats()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(key: &str) -> S3CachedValue {
        S3CachedValue::Head(S3ObjectInfo {
            key: key.to_string(),
            size: 1,
            mtime: 1,
            etag: None,
        })
    }

    #[test]
    fn test_get_put_and_stats_accounting() {
        let cache = S3Cache::new(Duration::from_secs(60), 10);
        assert!(cache.get("head_object", "b", "k", "").is_none());
        cache.put("head_object", "b", "k", "", head("k"), None);
        assert!(cache.get("head_object", "b", "k", "").is_some());

        let stats = cache.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits + stats.cache_misses, 2);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = S3Cache::new(Duration::from_millis(10), 10);
        cache.put("head_object", "b", "k", "", head("k"), None);
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get("head_object", "b", "k", "").is_none());
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn test_lru_eviction_prefers_stale_entry() {
        let cache = S3Cache::new(Duration::from_secs(60), 2);
        cache.put("head_object", "b", "a", "", head("a"), None);
        cache.put("head_object", "b", "b", "", head("b"), None);
        // Touch "a" so "b" is the LRU victim
        cache.get("head_object", "b", "a", "");
        cache.put("head_object", "b", "c", "", head("c"), None);

        assert!(cache.get("head_object", "b", "a", "").is_some());
        assert!(cache.get("head_object", "b", "b", "").is_none());
        assert!(cache.get("head_object", "b", "c", "").is_some());
    }

    #[test]
    fn test_invalidate_key_hits_ancestors_and_descendants() {
        let cache = S3Cache::new(Duration::from_secs(60), 100);
        // Listing of the parent directory
        cache.put(
            "list_objects_v2",
            "b",
            "dir",
            "page=0",
            S3CachedValue::ListPage(ListPage::default()),
            None,
        );
        // Head of the key itself and of a descendant
        cache.put("head_object", "b", "dir/file", "", head("dir/file"), None);
        cache.put("head_object", "b", "dir/file/x", "", head("dir/file/x"), None);
        // Unrelated sibling listing
        cache.put(
            "list_objects_v2",
            "b",
            "zzz",
            "page=0",
            S3CachedValue::ListPage(ListPage::default()),
            None,
        );

        cache.invalidate_key("b", "dir/file");

        assert!(cache.get("list_objects_v2", "b", "dir", "page=0").is_none());
        assert!(cache.get("head_object", "b", "dir/file", "").is_none());
        assert!(cache.get("head_object", "b", "dir/file/x", "").is_none());
        assert!(cache.get("list_objects_v2", "b", "zzz", "page=0").is_some());
    }

    #[test]
    fn test_invalidate_prefix_and_bucket() {
        let cache = S3Cache::new(Duration::from_secs(60), 100);
        cache.put("head_object", "b", "p/one", "", head("p/one"), None);
        cache.put("head_object", "b", "q/two", "", head("q/two"), None);
        cache.put("head_object", "other", "p/one", "", head("p/one"), None);

        cache.invalidate_prefix("b", "p/");
        assert!(cache.get("head_object", "b", "p/one", "").is_none());
        assert!(cache.get("head_object", "b", "q/two", "").is_some());

        cache.invalidate_bucket("b");
        assert!(cache.get("head_object", "b", "q/two", "").is_none());
        assert!(cache.get("head_object", "other", "p/one", "").is_some());
    }

    #[test]
    fn test_custom_ttl_overrides_default() {
        let cache = S3Cache::new(Duration::from_millis(5), 10);
        cache.put(
            "head_object",
            "b",
            "k",
            "",
            head("k"),
            Some(Duration::from_secs(60)),
        );
        std::thread::sleep(Duration::from_millis(15));
        assert!(cache.get("head_object", "b", "k", "").is_some());
    }
}
