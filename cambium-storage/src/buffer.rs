use crate::page::Page;
use crate::{Error, Result};
use lru::LruCache;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide default cache budget: 16 GiB, overridable per database
/// via `maxSegmentAllocationSize` and the environment.
pub const DEFAULT_BUDGET: usize = 16 * 1024 * 1024 * 1024;

const SHARD_COUNT: usize = 16;

/// Decoded-page cache shared by all sessions of a database. Sharded LRU
/// with byte accounting; keys are `(resource id, block offset)`.
#[derive(Debug)]
pub struct BufferManager {
    shards: Vec<Mutex<Shard>>,
    budget_per_shard: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug)]
struct Shard {
    pages: LruCache<(u32, u64), Arc<Page>>,
    bytes: usize,
}

impl BufferManager {
    pub fn new(budget: usize) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| {
                Mutex::new(Shard {
                    pages: LruCache::unbounded(),
                    bytes: 0,
                })
            })
            .collect();
        Self {
            shards,
            budget_per_shard: (budget / SHARD_COUNT).max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn shard(&self, resource_id: u32, offset: u64) -> &Mutex<Shard> {
        let mut hash = offset ^ ((resource_id as u64) << 32);
        hash ^= hash >> 17;
        &self.shards[(hash as usize) % SHARD_COUNT]
    }

    pub fn get(&self, resource_id: u32, offset: u64) -> Option<Arc<Page>> {
        let mut shard = self.shard(resource_id, offset).lock().unwrap();
        let found = shard.pages.get(&(resource_id, offset)).cloned();
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, resource_id: u32, offset: u64, page: Arc<Page>) {
        let size = page.estimated_size();
        let mut shard = self.shard(resource_id, offset).lock().unwrap();
        if let Some(old) = shard.pages.put((resource_id, offset), page) {
            shard.bytes = shard.bytes.saturating_sub(old.estimated_size());
        }
        shard.bytes += size;
        while shard.bytes > self.budget_per_shard {
            match shard.pages.pop_lru() {
                Some((_, evicted)) => {
                    shard.bytes = shard.bytes.saturating_sub(evicted.estimated_size());
                }
                None => break,
            }
        }
    }

    /// Cached page or `load()` on miss; the loaded page is inserted.
    pub fn get_or_load(
        &self,
        resource_id: u32,
        offset: u64,
        load: impl FnOnce() -> Result<Page>,
    ) -> Result<Arc<Page>> {
        if let Some(page) = self.get(resource_id, offset) {
            return Ok(page);
        }
        let page = Arc::new(load()?);
        self.insert(resource_id, offset, page.clone());
        Ok(page)
    }

    /// Drops every cached page of one resource.
    pub fn evict_resource(&self, resource_id: u32) {
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            let keys: Vec<(u32, u64)> = shard
                .pages
                .iter()
                .map(|(&key, _)| key)
                .filter(|(rid, _)| *rid == resource_id)
                .collect();
            for key in keys {
                if let Some(page) = shard.pages.pop(&key) {
                    shard.bytes = shard.bytes.saturating_sub(page.estimated_size());
                }
            }
        }
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn cached_bytes(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap().bytes)
            .sum()
    }
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET)
    }
}

/// Guard against zero budgets sneaking in from config parsing.
pub fn validate_budget(budget: usize) -> Result<usize> {
    if budget < 1024 * 1024 {
        return Err(Error::Config(format!(
            "buffer budget {budget} below 1 MiB minimum"
        )));
    }
    Ok(budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::indirect::IndirectPage;

    fn page() -> Arc<Page> {
        Arc::new(Page::Indirect(IndirectPage::new()))
    }

    #[test]
    fn hit_and_miss_accounting() {
        let cache = BufferManager::new(64 * 1024 * 1024);
        assert!(cache.get(1, 100).is_none());
        cache.insert(1, 100, page());
        assert!(cache.get(1, 100).is_some());
        assert!(cache.get(2, 100).is_none());
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 2);
    }

    #[test]
    fn eviction_respects_byte_budget() {
        let one_page = page().estimated_size();
        let cache = BufferManager::new(one_page * SHARD_COUNT * 4);
        for offset in 0..64u64 {
            cache.insert(7, offset, page());
        }
        assert!(cache.cached_bytes() <= one_page * SHARD_COUNT * 4 + one_page);
    }

    #[test]
    fn get_or_load_populates_on_miss() {
        let cache = BufferManager::new(64 * 1024 * 1024);
        let loaded = cache
            .get_or_load(3, 42, || Ok(Page::Indirect(IndirectPage::new())))
            .unwrap();
        assert_eq!(loaded.kind_name(), "indirect");
        // Second access must not call the loader.
        let again = cache
            .get_or_load(3, 42, || Err(Error::Invariant("loader must not run")))
            .unwrap();
        assert_eq!(again.kind_name(), "indirect");
    }

    #[test]
    fn evict_resource_only_touches_that_resource() {
        let cache = BufferManager::new(64 * 1024 * 1024);
        cache.insert(1, 10, page());
        cache.insert(2, 10, page());
        cache.evict_resource(1);
        assert!(cache.get(1, 10).is_none());
        assert!(cache.get(2, 10).is_some());
    }
}
