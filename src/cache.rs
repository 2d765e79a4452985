//! Edge cache for complete objects
//!
//! The gateway consumes the cache through the [`ContentCache`] trait so the
//! storage engine can be swapped: [`MemoryCache`] for a single process,
//! [`TieredCache`](crate::tiered_cache::TieredCache) for memory plus disk, and
//! [`NoopCache`] when caching is disabled.
//!
//! Each implementation owns its eviction policy (TTL and size bound); the gateway
//! only decides what is admitted.

use crate::error::{GatewayError, Result};
use crate::models::{CacheEntry, CacheKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Outcome of an admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// The entry was stored
    Stored,
    /// The cache declined the entry (too large, disabled)
    Ignored,
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Key/value byte store for complete objects
#[async_trait]
pub trait ContentCache: Send + Sync {
    /// Look up a fresh entry
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Offer an entry for storage
    async fn admit(&self, key: &CacheKey, entry: CacheEntry) -> Result<AdmitOutcome>;

    /// Current statistics
    fn stats(&self) -> CacheStats;
}

/// Cache that never stores anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl ContentCache for NoopCache {
    async fn lookup(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    async fn admit(&self, _key: &CacheKey, _entry: CacheEntry) -> Result<AdmitOutcome> {
        Ok(AdmitOutcome::Ignored)
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// Cached entry with expiration and access tracking
struct StoredEntry {
    entry: CacheEntry,
    size: usize,
    expires_at: SystemTime,
    last_accessed: SystemTime,
}

#[derive(Default)]
struct MemoryStore {
    entries: HashMap<CacheKey, StoredEntry>,
    current_size: usize,
}

impl MemoryStore {
    fn remove(&mut self, key: &CacheKey) -> Option<StoredEntry> {
        let removed = self.entries.remove(key)?;
        self.current_size = self.current_size.saturating_sub(removed.size);
        Some(removed)
    }

    /// Evict least recently used entries until `needed` more bytes fit under `max`
    fn evict_lru(&mut self, needed: usize, max: usize) {
        let mut evicted = 0;
        while self.current_size + needed > max && !self.entries.is_empty() {
            let lru = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            match lru {
                Some(key) => {
                    self.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            debug!("LRU eviction: removed {} entries", evicted);
        }
    }

    fn cleanup_expired(&mut self, now: SystemTime) {
        let mut removed_bytes = 0;
        self.entries.retain(|_, e| {
            if e.expires_at <= now {
                removed_bytes += e.size;
                false
            } else {
                true
            }
        });
        self.current_size = self.current_size.saturating_sub(removed_bytes);
    }
}

/// In-memory cache with TTL expiry and LRU eviction under a size bound
pub struct MemoryCache {
    store: Mutex<MemoryStore>,
    ttl: Duration,
    max_size_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create a new MemoryCache
    ///
    /// # Arguments
    /// * `ttl` - Freshness horizon of admitted entries
    /// * `max_size_bytes` - Upper bound on stored bytes; older entries are evicted first
    pub fn new(ttl: Duration, max_size_bytes: usize) -> Self {
        MemoryCache {
            store: Mutex::new(MemoryStore::default()),
            ttl,
            max_size_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryStore>> {
        self.store
            .lock()
            .map_err(|e| GatewayError::CacheError(format!("memory cache lock poisoned: {}", e)))
    }

    /// Look up an entry without touching hit/miss counters
    pub(crate) fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let now = SystemTime::now();
        let mut store = self.lock()?;

        let expired = match store.entries.get_mut(key) {
            Some(stored) if stored.expires_at > now => {
                stored.last_accessed = now;
                return Ok(Some(stored.entry.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            store.remove(key);
            debug!("Cache entry expired: {}", key);
        }
        Ok(None)
    }

    /// Store an entry with an explicit expiry
    pub(crate) fn put(
        &self,
        key: &CacheKey,
        entry: CacheEntry,
        expires_at: SystemTime,
    ) -> Result<AdmitOutcome> {
        let size = entry.size_bytes();
        if size > self.max_size_bytes {
            debug!(
                "Entry too large for memory cache: {} ({} > {} bytes)",
                key, size, self.max_size_bytes
            );
            return Ok(AdmitOutcome::Ignored);
        }

        let now = SystemTime::now();
        let mut store = self.lock()?;

        store.remove(key);
        store.cleanup_expired(now);
        store.evict_lru(size, self.max_size_bytes);

        store.entries.insert(
            key.clone(),
            StoredEntry {
                entry,
                size,
                expires_at,
                last_accessed: now,
            },
        );
        store.current_size += size;

        debug!("Stored in memory cache: {} ({} bytes)", key, size);
        Ok(AdmitOutcome::Stored)
    }

    /// Remove an entry, returning whether it was present
    pub(crate) fn remove(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn size_stats(&self) -> (usize, usize) {
        match self.store.lock() {
            Ok(store) => (store.entries.len(), store.current_size),
            Err(_) => (0, 0),
        }
    }
}

#[async_trait]
impl ContentCache for MemoryCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let result = self.get(key)?;
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit: {}", key);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Cache miss: {}", key);
        }
        Ok(result)
    }

    async fn admit(&self, key: &CacheKey, entry: CacheEntry) -> Result<AdmitOutcome> {
        self.put(key, entry, SystemTime::now() + self.ttl)
    }

    fn stats(&self) -> CacheStats {
        let (total_entries, total_bytes) = self.size_stats();
        CacheStats {
            total_entries,
            total_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
