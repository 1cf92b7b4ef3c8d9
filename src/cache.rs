//! Compiled expression cache
//!
//! Compiling the same expression text for every batch is wasted work, so the
//! cache maps source text to a shared compiled expression. Lookups take a read
//! lock; only misses take the write lock. Failed compilations are not cached.

use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

use crate::expr::CompiledExpr;
use crate::vm::DEFAULT_MAX_STACK_DEPTH;
use crate::Result;

/// Default number of cached expressions.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Thread-safe read-through cache of compiled expressions
pub struct ExprCache {
    cache: RwLock<FxHashMap<String, Arc<CompiledExpr>>>,
    capacity: usize,
    stack_limit: usize,
}

impl Default for ExprCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_STACK_DEPTH)
    }

    /// Create a cache holding at most `capacity` expressions, each compiled
    /// with `stack_limit`.
    pub fn with_capacity(capacity: usize, stack_limit: usize) -> Self {
        Self {
            cache: RwLock::new(FxHashMap::default()),
            capacity: capacity.max(1),
            stack_limit,
        }
    }

    /// Get the compiled form of `source`, compiling it on a miss.
    pub fn get_or_compile(&self, source: &str) -> Result<Arc<CompiledExpr>> {
        // Fast path: check cache
        if let Some(expr) = self.get(source) {
            return Ok(expr);
        }

        let compiled = Arc::new(CompiledExpr::compile_with_limit(source, self.stack_limit)?);

        if let Ok(mut cache) = self.cache.write() {
            // another thread may have compiled it meanwhile
            if let Some(existing) = cache.get(source) {
                return Ok(Arc::clone(existing));
            }
            if cache.len() >= self.capacity {
                // Simple eviction: clear half the cache
                let keys: Vec<_> = cache.keys().take(self.capacity.div_ceil(2)).cloned().collect();
                for key in &keys {
                    cache.remove(key);
                }
                log::debug!("expression cache full, evicted {} entries", keys.len());
            }
            cache.insert(source.to_string(), Arc::clone(&compiled));
        }

        Ok(compiled)
    }

    /// Cached expression for `source`, if present.
    pub fn get(&self, source: &str) -> Option<Arc<CompiledExpr>> {
        self.cache.read().ok()?.get(source).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }
}
