//! Read-side cache collaborator. Stores call [`ArticleCache::invalidate`] after every write.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Article(Uuid),
    AllArticles,
}

/// Read-through callers take [`ArticleCache::generation`] before querying the store and fill
/// the cache with [`ArticleCache::put_if_unchanged`], so a write that lands in between is
/// never overwritten by the older read.
pub trait ArticleCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<JsonValue>;
    fn put(&self, key: CacheKey, value: JsonValue);
    /// Changes every time `key` is invalidated or the cache is cleared.
    fn generation(&self, key: &CacheKey) -> u64;
    /// Stores `value` only while `key` is still at `generation`. Returns whether it was stored.
    fn put_if_unchanged(&self, key: CacheKey, generation: u64, value: JsonValue) -> bool;
    fn invalidate(&self, key: &CacheKey);
    fn clear(&self);
}

/// Invalidates the per-article entry and the "all articles" aggregate.
pub fn invalidate_article(cache: &dyn ArticleCache, id: Uuid) {
    cache.invalidate(&CacheKey::Article(id));
    cache.invalidate(&CacheKey::AllArticles);
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, JsonValue>,
    invalidated_at: HashMap<CacheKey, u64>,
    cleared_at: u64,
    clock: u64,
}

impl CacheState {
    fn generation(&self, key: &CacheKey) -> u64 {
        self.invalidated_at
            .get(key)
            .copied()
            .unwrap_or(0)
            .max(self.cleared_at)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

#[derive(Debug, Default)]
pub struct MemoryArticleCache {
    state: RwLock<CacheState>,
}

impl MemoryArticleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    // A poisoned lock only means a writer panicked mid-insert; the map itself is still usable.
    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ArticleCache for MemoryArticleCache {
    fn get(&self, key: &CacheKey) -> Option<JsonValue> {
        self.read().entries.get(key).cloned()
    }

    fn put(&self, key: CacheKey, value: JsonValue) {
        self.write().entries.insert(key, value);
    }

    fn generation(&self, key: &CacheKey) -> u64 {
        self.read().generation(key)
    }

    fn put_if_unchanged(&self, key: CacheKey, generation: u64, value: JsonValue) -> bool {
        let mut state = self.write();
        if state.generation(&key) != generation {
            return false;
        }
        state.entries.insert(key, value);
        true
    }

    fn invalidate(&self, key: &CacheKey) {
        let mut state = self.write();
        let now = state.tick();
        state.invalidated_at.insert(key.clone(), now);
        state.entries.remove(key);
    }

    fn clear(&self) {
        let mut state = self.write();
        let now = state.tick();
        state.entries.clear();
        state.invalidated_at.clear();
        state.cleared_at = now;
    }
}

/// Cache that stores nothing, for callers that do not read through a cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopArticleCache;

impl ArticleCache for NoopArticleCache {
    fn get(&self, _key: &CacheKey) -> Option<JsonValue> {
        None
    }

    fn put(&self, _key: CacheKey, _value: JsonValue) {}

    fn generation(&self, _key: &CacheKey) -> u64 {
        0
    }

    fn put_if_unchanged(&self, _key: CacheKey, _generation: u64, _value: JsonValue) -> bool {
        false
    }

    fn invalidate(&self, _key: &CacheKey) {}

    fn clear(&self) {}
}
