//! LRU caches for compiled patterns and expressions
//!
//! Regexes built by the key/glob/regex builtins and sub-expressions compiled by `eval()`
//! are cached so hot matchers do not recompile on every row.

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::OnceLock;

/// Default capacity of the shared regex cache
pub const DEFAULT_PATTERN_CACHE_CAPACITY: usize = 512;

/// Thread-safe LRU cache keyed by source text
pub struct CompileCache<V: Clone> {
    cache: Mutex<LruCache<String, V>>,
}

impl<V: Clone> CompileCache<V> {
    /// Create a new cache with given capacity
    pub fn new(capacity: usize) -> Self {
        CompileCache {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Get a cached entry
    pub fn get(&self, key: &str) -> Option<V> {
        self.cache.lock().get(key).cloned()
    }

    /// Return the cached entry or compile, cache and return it
    ///
    /// Compilation runs without holding the lock; two threads racing on the same key
    /// both compile and the last insert wins.
    pub fn get_or_try_insert<E>(
        &self,
        key: &str,
        compile: impl FnOnce() -> std::result::Result<V, E>,
    ) -> std::result::Result<V, E> {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = compile()?;
        self.cache.lock().put(key.to_string(), value.clone());
        Ok(value)
    }

    /// Clear the cache
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

/// Process-wide cache used by the pattern builtins
pub fn regex_cache() -> &'static CompileCache<Regex> {
    static CACHE: OnceLock<CompileCache<Regex>> = OnceLock::new();
    CACHE.get_or_init(|| CompileCache::new(DEFAULT_PATTERN_CACHE_CAPACITY))
}

/// Compile `pattern` through the shared cache
pub fn cached_regex(pattern: &str) -> Result<Regex, regex::Error> {
    regex_cache().get_or_try_insert(pattern, || Regex::new(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_basic() {
        let cache: CompileCache<usize> = CompileCache::new(10);
        assert!(cache.get("a").is_none());

        let value = cache
            .get_or_try_insert("a", || Ok::<_, ()>(1))
            .unwrap();
        assert_eq!(value, 1);

        // Cached value wins over the new compile closure
        let value = cache
            .get_or_try_insert("a", || Ok::<_, ()>(2))
            .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_cache_lru_eviction() {
        let cache: CompileCache<usize> = CompileCache::new(2);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            cache.get_or_try_insert(key, || Ok::<_, ()>(i)).unwrap();
        }
        assert!(cache.get("a").is_none()); // Evicted
        assert_eq!(cache.get("b"), Some(1));
        assert_eq!(cache.get("c"), Some(2));
    }

    #[test]
    fn test_failed_compile_is_not_cached() {
        let cache: CompileCache<usize> = CompileCache::new(4);
        assert!(cache.get_or_try_insert("bad", || Err("nope")).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_clear() {
        let cache: CompileCache<usize> = CompileCache::new(4);
        cache.get_or_try_insert("a", || Ok::<_, ()>(1)).unwrap();
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_shared_regex_cache() {
        let re = cached_regex("^/api/[0-9]+$").unwrap();
        assert!(re.is_match("/api/42"));
        assert!(cached_regex("(").is_err());
    }
}
