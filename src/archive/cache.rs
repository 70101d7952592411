//! LRU + TTL cache of open archive handlers.
//!
//! Keyed by the archive file's absolute path string. A hit touches recency
//! and returns the shared handler; a miss (or expired entry) evicts the LRU
//! handler if at capacity, constructs the right handler for the suffix, and
//! opens it. All public methods are thread-safe.

use super::handler::ArchiveHandler;
use crate::error::VfsError;
use crate::ignore_poison::IgnorePoison;
use crate::path::VfsPath;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_MAX_OPEN: usize = 5;
const DEFAULT_TTL_SECS: u64 = 300;

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveCacheStats {
    pub open_archives: usize,
    pub max_open: usize,
    pub ttl_seconds: u64,
    pub expired_count: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    /// Average time to open an archive, in seconds.
    pub avg_open_time: f64,
}

struct CacheInner {
    max_open: usize,
    ttl: Duration,
    handlers: HashMap<String, Arc<ArchiveHandler>>,
    access_times: HashMap<String, Instant>,
    cache_hits: u64,
    cache_misses: u64,
    evictions: u64,
    total_open_time: Duration,
}

impl CacheInner {
    fn evict_lru(&mut self) {
        let Some(oldest) = self
            .access_times
            .iter()
            .min_by_key(|(_, time)| **time)
            .map(|(key, _)| key.clone())
        else {
            return;
        };
        if let Some(handler) = self.handlers.remove(&oldest) {
            handler.close();
        }
        self.access_times.remove(&oldest);
        self.evictions += 1;
    }
}

/// Cache of open archive handlers with LRU eviction and TTL expiry.
pub struct ArchiveCache {
    inner: Mutex<CacheInner>,
}

impl ArchiveCache {
    pub fn new(max_open: usize, ttl: Duration) -> ArchiveCache {
        ArchiveCache {
            inner: Mutex::new(CacheInner {
                max_open,
                ttl,
                handlers: HashMap::new(),
                access_times: HashMap::new(),
                cache_hits: 0,
                cache_misses: 0,
                evictions: 0,
                total_open_time: Duration::ZERO,
            }),
        }
    }

    /// Returns the cached handler for an archive, opening it on a miss.
    pub fn get_handler(&self, archive_path: &VfsPath) -> Result<Arc<ArchiveHandler>, VfsError> {
        let cache_key = archive_path.as_uri();
        let mut inner = self.inner.lock_ignore_poison();
        let now = Instant::now();

        if let Some(handler) = inner.handlers.get(&cache_key).cloned() {
            let expired = inner
                .access_times
                .get(&cache_key)
                .is_none_or(|t| now.duration_since(*t) > inner.ttl);
            if expired {
                handler.close();
                inner.handlers.remove(&cache_key);
                inner.access_times.remove(&cache_key);
                inner.cache_misses += 1;
            } else {
                inner.access_times.insert(cache_key, now);
                inner.cache_hits += 1;
                return Ok(handler);
            }
        } else {
            inner.cache_misses += 1;
        }

        if inner.handlers.len() >= inner.max_open {
            inner.evict_lru();
        }

        let handler = Arc::new(ArchiveHandler::for_path(archive_path)?);
        let open_start = Instant::now();
        handler.open()?;
        inner.total_open_time += open_start.elapsed();

        inner.handlers.insert(cache_key.clone(), Arc::clone(&handler));
        inner.access_times.insert(cache_key, now);
        Ok(handler)
    }

    /// Closes and drops the handler for one archive, if cached.
    pub fn invalidate(&self, archive_path: &VfsPath) {
        let cache_key = archive_path.as_uri();
        let mut inner = self.inner.lock_ignore_poison();
        if let Some(handler) = inner.handlers.remove(&cache_key) {
            handler.close();
        }
        inner.access_times.remove(&cache_key);
    }

    /// Closes and drops all cached handlers.
    pub fn clear(&self) {
        let mut inner = self.inner.lock_ignore_poison();
        for handler in inner.handlers.values() {
            handler.close();
        }
        inner.handlers.clear();
        inner.access_times.clear();
    }

    /// Replaces limits and drops all cached entries.
    pub fn configure(&self, max_open: usize, ttl: Duration) {
        self.clear();
        let mut inner = self.inner.lock_ignore_poison();
        inner.max_open = max_open;
        inner.ttl = ttl;
    }

    pub fn stats(&self) -> ArchiveCacheStats {
        let inner = self.inner.lock_ignore_poison();
        let now = Instant::now();
        let expired_count = inner
            .access_times
            .values()
            .filter(|t| now.duration_since(**t) > inner.ttl)
            .count();
        let total_requests = inner.cache_hits + inner.cache_misses;
        ArchiveCacheStats {
            open_archives: inner.handlers.len(),
            max_open: inner.max_open,
            ttl_seconds: inner.ttl.as_secs(),
            expired_count,
            cache_hits: inner.cache_hits,
            cache_misses: inner.cache_misses,
            hit_rate: if total_requests > 0 {
                inner.cache_hits as f64 / total_requests as f64
            } else {
                0.0
            },
            evictions: inner.evictions,
            avg_open_time: if inner.cache_misses > 0 {
                inner.total_open_time.as_secs_f64() / inner.cache_misses as f64
            } else {
                0.0
            },
        }
    }
}

static ARCHIVE_CACHE: LazyLock<ArchiveCache> =
    LazyLock::new(|| ArchiveCache::new(DEFAULT_MAX_OPEN, Duration::from_secs(DEFAULT_TTL_SECS)));

/// Process-wide archive handler cache.
pub fn archive_cache() -> &'static ArchiveCache {
    &ARCHIVE_CACHE
}

/// Reconfigures the process-wide cache, dropping current entries.
pub fn configure_archive_cache(max_open: usize, ttl: Duration) {
    ARCHIVE_CACHE.configure(max_open, ttl);
}

/// Closes every cached handler.
pub fn clear_archive_cache() {
    ARCHIVE_CACHE.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_zip(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("hello.txt", options).unwrap();
        writer.write_all(b"hi").unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_hit_miss_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = VfsPath::from_std(&make_zip(dir.path(), "a.zip"));
        let cache = ArchiveCache::new(5, Duration::from_secs(300));

        cache.get_handler(&zip_path).unwrap();
        cache.get_handler(&zip_path).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.open_archives, 1);
        assert!(stats.avg_open_time >= 0.0);
    }

    #[test]
    fn test_invalidate_forces_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = VfsPath::from_std(&make_zip(dir.path(), "a.zip"));
        let cache = ArchiveCache::new(5, Duration::from_secs(300));

        let first = cache.get_handler(&zip_path).unwrap();
        cache.invalidate(&zip_path);
        assert!(!first.is_open());
        let second = cache.get_handler(&zip_path).unwrap();
        assert!(second.is_open());

        let stats = cache.stats();
        // Two opens, zero hits
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.cache_hits, 0);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let a = VfsPath::from_std(&make_zip(dir.path(), "a.zip"));
        let b = VfsPath::from_std(&make_zip(dir.path(), "b.zip"));
        let c = VfsPath::from_std(&make_zip(dir.path(), "c.zip"));
        let cache = ArchiveCache::new(2, Duration::from_secs(300));

        let handler_a = cache.get_handler(&a).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        cache.get_handler(&b).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        cache.get_handler(&c).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.open_archives, 2);
        assert_eq!(stats.evictions, 1);
        assert!(!handler_a.is_open());
    }

    #[test]
    fn test_clear_closes_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let a = VfsPath::from_std(&make_zip(dir.path(), "a.zip"));
        let cache = ArchiveCache::new(5, Duration::from_secs(300));
        let handler = cache.get_handler(&a).unwrap();
        cache.clear();
        assert!(!handler.is_open());
        assert_eq!(cache.stats().open_archives, 0);
    }
}
