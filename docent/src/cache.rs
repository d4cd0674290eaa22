use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::models::SearchResult;

/// Snapshot of a cache's occupancy and effectiveness, exposed for health
/// endpoints. Hit rate plays no part in eviction.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
}

/// Thread-safe bounded key/value cache with LRU eviction and hit/miss
/// counters.
///
/// Keys must be built with [`scoped_key`] so the tenant (and bot, when
/// relevant) is part of the key; two tenants asking the same question must
/// never share an entry.
pub struct BoundedCache<V> {
    cache: Mutex<LruCache<String, V>>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> BoundedCache<V> {
    /// # Panics
    /// Panics if capacity is 0.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("Capacity must be non-zero"),
            )),
            max_size: capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut cache = self.cache.lock().unwrap();
        match cache.get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: String, value: V) {
        let mut cache = self.cache.lock().unwrap();
        cache.put(key, value);
    }

    pub fn stats(&self) -> CacheStats {
        let size = self.cache.lock().unwrap().len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        CacheStats {
            size,
            max_size: self.max_size,
            hit_rate,
        }
    }
}

/// Build a deterministic cache key from an input string plus its tenant
/// scope. The unit separator keeps `("ab", "c")` and `("a", "bc")` distinct.
pub fn scoped_key(input: &str, workspace_id: &str, bot_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.update([0x1f]);
    hasher.update(workspace_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(bot_id.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// The short-lived projection of a search result kept in the result cache.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CachedHit {
    pub chunk_id: String,
    pub content: String,
    pub source_title: String,
    pub similarity: f32,
}

impl From<&SearchResult> for CachedHit {
    fn from(result: &SearchResult) -> Self {
        Self {
            chunk_id: result.chunk_id.clone(),
            content: result.content.clone(),
            source_title: result.source_title.clone(),
            similarity: result.similarity,
        }
    }
}

/// The full set of process-wide caches, constructed explicitly and injected
/// into the services that need them. No module-level singletons: tests build
/// isolated sets.
pub struct CacheSet {
    pub embeddings: BoundedCache<Vec<f32>>,
    pub search_results: BoundedCache<Vec<CachedHit>>,
    pub responses: BoundedCache<String>,
}

impl CacheSet {
    pub fn new(config: &CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            embeddings: BoundedCache::new(config.embedding_capacity),
            search_results: BoundedCache::new(config.search_capacity),
            responses: BoundedCache::new(config.response_capacity),
        })
    }
}
