use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use lru::LruCache;
use parking_lot::Mutex;
use crate::core::error::Result;
use crate::query::ast::Node;
use crate::query::parser::parse_query;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct AstKey {
    pub query: String,
    pub dialect: u32,
}

/// Cache of parsed, parameter-free ASTs keyed by (query text, dialect).
pub struct AstCache {
    cache: Mutex<LruCache<AstKey, Arc<Node>>>,
    capacity: usize,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl AstCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        AstCache {
            cache: Mutex::new(LruCache::new(cap)),
            capacity: capacity.max(1),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    /// Parses through the cache. Parse errors are not cached.
    pub fn parse(&self, query: &str, dialect: u32) -> Result<Arc<Node>> {
        let key = AstKey { query: query.to_string(), dialect };
        if let Some(node) = self.cache.lock().get(&key) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(node.clone());
        }
        self.miss_count.fetch_add(1, Ordering::Relaxed);
        let node = Arc::new(parse_query(query, dialect)?);
        self.cache.lock().put(key, node.clone());
        Ok(node)
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.cache.lock().len(),
            capacity: self.capacity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}
