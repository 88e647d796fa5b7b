//! Compiled pattern caching
//!
//! Compiling a pattern is deterministic, so matchers are cached by
//! `(pattern, case_sensitive, end)` with LRU eviction. Matching runs against
//! a shared route set, so the cache lives behind a mutex.

use crate::error::RouterError;
use crate::path::{compile_path, CompiledPath};
use crate::trace_log;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Cache key for a compiled pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PatternKey {
    path: String,
    case_sensitive: bool,
    end: bool,
}

/// Cache performance statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub invalidations: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Inner {
    entries: LruCache<PatternKey, CompiledPath>,
    stats: CacheStats,
}

/// Compiled pattern cache with LRU eviction
///
/// Default capacity: 1000 entries.
#[derive(Debug)]
pub struct PatternCache {
    inner: Mutex<Inner>,
}

impl PatternCache {
    const DEFAULT_CAPACITY: usize = 1000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// A zero capacity is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(cap),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Return the cached matcher, compiling and caching it on a miss.
    pub fn get_or_compile(
        &self,
        path: &str,
        case_sensitive: bool,
        end: bool,
    ) -> Result<CompiledPath, RouterError> {
        let key = PatternKey {
            path: path.to_string(),
            case_sensitive,
            end,
        };
        {
            let mut inner = self.inner.lock();
            if let Some(compiled) = inner.entries.get(&key).cloned() {
                inner.stats.hits += 1;
                return Ok(compiled);
            }
            inner.stats.misses += 1;
        }

        trace_log!("Pattern cache miss for '{}'", path);
        let compiled = compile_path(path, case_sensitive, end)?;
        self.inner.lock().entries.push(key, compiled.clone());
        Ok(compiled)
    }

    pub fn clear(&self) {
        trace_log!("Clearing pattern cache");
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.stats.invalidations += 1;
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.inner.lock().stats = CacheStats::default();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for PatternCache {
    /// Clones start empty with the same capacity.
    fn clone(&self) -> Self {
        let inner = self.inner.lock();
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(inner.entries.cap()),
                stats: inner.stats.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_creation() {
        let cache = PatternCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = PatternCache::new();
        let first = cache.get_or_compile("/users/:id", false, true).unwrap();
        let second = cache.get_or_compile("/users/:id", false, true).unwrap();
        assert_eq!(first.as_str(), second.as_str());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_flags_are_part_of_key() {
        let cache = PatternCache::new();
        cache.get_or_compile("/a", false, true).unwrap();
        cache.get_or_compile("/a", false, false).unwrap();
        cache.get_or_compile("/a", true, true).unwrap();
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().misses, 3);
    }

    #[test]
    fn test_eviction() {
        let cache = PatternCache::with_capacity(2);
        cache.get_or_compile("/a", false, true).unwrap();
        cache.get_or_compile("/b", false, true).unwrap();
        cache.get_or_compile("/c", false, true).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cache_clear() {
        let cache = PatternCache::new();
        cache.get_or_compile("/a", false, true).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn test_hit_rate_calculation() {
        let cache = PatternCache::new();
        for _ in 0..4 {
            cache.get_or_compile("/a", false, true).unwrap();
        }
        cache.get_or_compile("/b", false, true).unwrap();
        assert!((cache.stats().hit_rate() - 0.6).abs() < 0.001);
    }
}
