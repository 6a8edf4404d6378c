//! Bounded TTL/LRU cache
//!
//! A key→value store with per-entry expiry and recency-based eviction:
//! - Expired entries are purged lazily on access and counted as misses
//! - At capacity, least-recently-used entries are evicted before an insert
//! - Internal failures (a panicking `Hash`, `Eq` or `Clone` impl, or a
//!   poisoned lock) are counted, reset the store and degrade to a miss or a
//!   no-op, so the cache never fails its caller
//!
//! TTL is measured from the last write; reads do not extend it.

use crate::error::{Error, Result};
use crate::metrics::{ratio, Counter, LatencyMean, Timer};
use lru::LruCache;
use serde::Serialize;
use std::future::Future;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for the cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of live entries
    pub max_size: usize,
    /// TTL applied by `set`
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry limit
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the default TTL
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::validation("cache.max_size", "must be greater than 0"));
        }
        if self.default_ttl.is_zero() {
            return Err(Error::validation(
                "cache.default_ttl",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// A stored value with its write time
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Lookups that returned a value
    pub hits: u64,
    /// Lookups that found nothing or a stale entry
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Entries purged because their TTL elapsed
    pub expirations: u64,
    /// Internal failures absorbed by the cache
    pub errors: u64,
    /// hits / (hits + misses)
    pub hit_rate: f64,
    /// Mean `get` latency in microseconds
    pub avg_get_latency_us: f64,
    /// Mean `set` latency in microseconds
    pub avg_set_latency_us: f64,
    /// Live entries, including not-yet-purged stale ones
    pub size: usize,
    /// Configured entry limit
    pub max_size: usize,
    /// size / max_size
    pub utilization: f64,
}

/// Thread-safe cache with write-time TTL and LRU eviction
pub struct TtlCache<K, V> {
    config: CacheConfig,
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
    hits: Counter,
    misses: Counter,
    evictions: Counter,
    expirations: Counter,
    errors: Counter,
    get_latency: LatencyMean,
    set_latency: LatencyMean,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new cache
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            max_size = config.max_size,
            default_ttl_ms = config.default_ttl.as_millis() as u64,
            "Cache created"
        );
        Ok(Self::from_valid(config))
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::from_valid(CacheConfig::default())
    }

    fn from_valid(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(LruCache::unbounded()),
            hits: Counter::new(),
            misses: Counter::new(),
            evictions: Counter::new(),
            expirations: Counter::new(),
            errors: Counter::new(),
            get_latency: LatencyMean::new(),
            set_latency: LatencyMean::new(),
        }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a value, marking it most-recently-used
    ///
    /// A stale entry is purged and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let timer = Timer::start();
        let found = self.lookup(key);
        timer.observe_into(&self.get_latency);

        if found.is_some() {
            self.hits.inc();
        } else {
            self.misses.inc();
        }
        found
    }

    fn lookup(&self, key: &K) -> Option<V> {
        let now = Instant::now();

        self.guarded("get", |entries| {
            let expired = entries.peek(key)?.is_expired(now);
            if expired {
                entries.pop(key);
                self.expirations.inc();
                debug!("Cache entry expired");
                return None;
            }

            entries.get(key).map(|entry| entry.value.clone())
        })
        .flatten()
    }

    /// Store a value with the default TTL
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.config.default_ttl);
    }

    /// Store a value with an explicit TTL
    ///
    /// Replacing a key does not count toward capacity twice. At capacity,
    /// least-recently-used entries are evicted until there is room.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let timer = Timer::start();

        self.guarded("set", |entries| {
            let entry = CacheEntry::new(value, ttl);
            if !entries.contains(&key) {
                while entries.len() >= self.config.max_size {
                    if entries.pop_lru().is_none() {
                        break;
                    }
                    self.evictions.inc();
                }
            }
            entries.put(key, entry);
        });

        timer.observe_into(&self.set_latency);
    }

    /// Remove a key, returning whether it was present
    pub fn delete(&self, key: &K) -> bool {
        self.guarded("delete", |entries| entries.pop(key).is_some())
            .unwrap_or(false)
    }

    /// Whether a live entry exists, without touching recency
    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.guarded("contains", |entries| {
            entries.peek(key).is_some_and(|entry| !entry.is_expired(now))
        })
        .unwrap_or(false)
    }

    /// Empty the store and reset hit/miss counters
    pub fn clear(&self) {
        if let Some(mut entries) = self.lock() {
            let count = entries.len();
            entries.clear();
            debug!(count = count, "Cache cleared");
        }
        self.hits.reset();
        self.misses.reset();
    }

    /// Drop every expired entry now, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();

        let purged = self
            .guarded("purge_expired", |entries| {
                let stale: Vec<K> = entries
                    .iter()
                    .filter(|(_, entry)| entry.is_expired(now))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in &stale {
                    entries.pop(key);
                }
                stale.len()
            })
            .unwrap_or(0);

        self.expirations.inc_by(purged as u64);
        purged
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value, or load, store and return it
    ///
    /// The loader runs without holding the cache lock. Loader errors are
    /// returned to the caller and nothing is stored.
    pub async fn get_or_insert_with<F, Fut, E>(&self, key: K, load: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = load().await?;
        self.set(key, value.clone());
        Ok(value)
    }

    /// Snapshot of the cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.get();
        let misses = self.misses.get();
        let size = self.len();

        CacheStats {
            hits,
            misses,
            evictions: self.evictions.get(),
            expirations: self.expirations.get(),
            errors: self.errors.get(),
            hit_rate: ratio(hits, hits + misses),
            avg_get_latency_us: self.get_latency.mean_us(),
            avg_set_latency_us: self.set_latency.mean_us(),
            size,
            max_size: self.config.max_size,
            utilization: ratio(size as u64, self.config.max_size as u64),
        }
    }

    /// Run `op` against the store, absorbing a panic raised inside it
    ///
    /// User `Hash`, `Eq` and `Clone` impls run here. A panic may leave the
    /// store half-updated, so it is counted as an error and the store is
    /// emptied before the lock is released.
    fn guarded<T>(
        &self,
        operation: &'static str,
        op: impl FnOnce(&mut LruCache<K, CacheEntry<V>>) -> T,
    ) -> Option<T> {
        let mut entries = self.lock()?;

        match panic::catch_unwind(AssertUnwindSafe(|| op(&mut *entries))) {
            Ok(value) => Some(value),
            Err(_) => {
                self.errors.inc();
                let dropped = entries.len();
                entries.clear();
                warn!(
                    operation = operation,
                    dropped = dropped,
                    "Cache operation panicked, store reset"
                );
                None
            }
        }
    }

    /// Acquire the store, absorbing a poisoned lock
    ///
    /// A panic while the lock was held may have left the store half-updated,
    /// so it is emptied before the poison flag is cleared.
    fn lock(&self) -> Option<MutexGuard<'_, LruCache<K, CacheEntry<V>>>> {
        match self.entries.lock() {
            Ok(guard) => Some(guard),
            Err(poisoned) => {
                self.errors.inc();
                let mut guard = poisoned.into_inner();
                let dropped = guard.len();
                guard.clear();
                drop(guard);
                self.entries.clear_poison();
                warn!(dropped = dropped, "Cache lock poisoned, store reset");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests;
