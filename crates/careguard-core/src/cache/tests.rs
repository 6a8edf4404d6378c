use super::*;
use std::hash::Hasher;
use std::panic::{self, AssertUnwindSafe};

fn cache(max_size: usize) -> TtlCache<String, i32> {
    TtlCache::new(CacheConfig::new().with_max_size(max_size)).unwrap()
}

#[test]
fn test_cache_config_defaults() {
    let config = CacheConfig::default();
    assert_eq!(config.max_size, 1000);
    assert_eq!(config.default_ttl, Duration::from_secs(3600));
}

#[test]
fn test_cache_rejects_invalid_config() {
    let err = TtlCache::<String, i32>::new(CacheConfig::new().with_max_size(0))
        .err()
        .unwrap();
    assert!(err.to_string().contains("cache.max_size"));

    let err = TtlCache::<String, i32>::new(CacheConfig::new().with_default_ttl(Duration::ZERO))
        .err()
        .unwrap();
    assert!(err.to_string().contains("cache.default_ttl"));
}

#[test]
fn test_set_and_get() {
    let cache = cache(10);
    cache.set("a".to_string(), 1);

    assert_eq!(cache.get(&"a".to_string()), Some(1));
    assert_eq!(cache.get(&"missing".to_string()), None);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hit_rate, 0.5);
}

#[test]
fn test_evicts_least_recently_used() {
    let cache = cache(2);
    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);
    cache.set("c".to_string(), 3);

    assert_eq!(cache.get(&"a".to_string()), None);
    assert_eq!(cache.get(&"b".to_string()), Some(2));
    assert_eq!(cache.get(&"c".to_string()), Some(3));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_get_refreshes_recency() {
    let cache = cache(2);
    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);

    // Touch "a" so "b" becomes the eviction candidate
    assert_eq!(cache.get(&"a".to_string()), Some(1));
    cache.set("c".to_string(), 3);

    assert_eq!(cache.get(&"a".to_string()), Some(1));
    assert_eq!(cache.get(&"b".to_string()), None);
}

#[test]
fn test_replace_does_not_evict() {
    let cache = cache(2);
    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);
    cache.set("a".to_string(), 10);

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&"a".to_string()), Some(10));
    assert_eq!(cache.get(&"b".to_string()), Some(2));
    assert_eq!(cache.stats().evictions, 0);
}

#[test]
fn test_size_never_exceeds_max() {
    let cache: TtlCache<u32, u32> = TtlCache::new(CacheConfig::new().with_max_size(7)).unwrap();
    for i in 0..200u32 {
        cache.set(i % 23, i);
        assert!(cache.len() <= 7);
    }
    assert_eq!(cache.stats().utilization, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_entry_expires_at_ttl() {
    let cache = cache(10);
    cache.set_with_ttl("a".to_string(), 1, Duration::from_secs(10));

    tokio::time::advance(Duration::from_secs(9)).await;
    assert_eq!(cache.get(&"a".to_string()), Some(1));

    // Reads do not extend the TTL
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(cache.get(&"a".to_string()), None);
    assert_eq!(cache.len(), 0);

    let stats = cache.stats();
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rewrite_resets_ttl() {
    let cache = cache(10);
    cache.set_with_ttl("a".to_string(), 1, Duration::from_secs(10));
    tokio::time::advance(Duration::from_secs(8)).await;

    cache.set_with_ttl("a".to_string(), 2, Duration::from_secs(10));
    tokio::time::advance(Duration::from_secs(8)).await;

    assert_eq!(cache.get(&"a".to_string()), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_purge_expired() {
    let cache = cache(10);
    cache.set_with_ttl("short".to_string(), 1, Duration::from_secs(1));
    cache.set_with_ttl("long".to_string(), 2, Duration::from_secs(60));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!cache.contains(&"short".to_string()));
    assert!(cache.contains(&"long".to_string()));

    assert_eq!(cache.purge_expired(), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_delete() {
    let cache = cache(10);
    cache.set("a".to_string(), 1);

    assert!(cache.delete(&"a".to_string()));
    assert!(!cache.delete(&"a".to_string()));
    assert!(cache.is_empty());
}

#[test]
fn test_clear_resets_hit_counters_only() {
    let cache = cache(1);
    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);
    cache.get(&"b".to_string());
    cache.get(&"a".to_string());

    cache.clear();

    let stats = cache.stats();
    assert_eq!(stats.size, 0);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.evictions, 1);
}

#[tokio::test]
async fn test_get_or_insert_with_loads_once() {
    let cache = cache(10);
    let mut loads = 0;

    for _ in 0..3 {
        let value = cache
            .get_or_insert_with("a".to_string(), || {
                loads += 1;
                async { Ok::<_, String>(7) }
            })
            .await;
        assert_eq!(value, Ok(7));
    }

    assert_eq!(loads, 1);
}

#[tokio::test]
async fn test_get_or_insert_with_does_not_cache_errors() {
    let cache = cache(10);

    let result = cache
        .get_or_insert_with("a".to_string(), || async { Err::<i32, _>("provider down") })
        .await;

    assert_eq!(result, Err("provider down"));
    assert!(!cache.contains(&"a".to_string()));
}

/// Key whose hash panics for one value, poisoning the cache lock mid-insert
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fragile(u32);

impl Hash for Fragile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if self.0 == 13 {
            panic!("unhashable key");
        }
        self.0.hash(state);
    }
}

#[test]
fn test_internal_failure_degrades_to_miss() {
    let cache: TtlCache<Fragile, i32> = TtlCache::with_defaults();
    cache.set(Fragile(1), 1);

    // A panicking key impl does not unwind into the caller
    cache.set(Fragile(13), 13);
    assert_eq!(cache.stats().errors, 1);

    // The store was reset
    assert_eq!(cache.get(&Fragile(1)), None);

    cache.set(Fragile(2), 2);
    assert_eq!(cache.get(&Fragile(13)), None);
    assert_eq!(cache.stats().errors, 2);
    assert!(cache.is_empty());

    cache.set(Fragile(3), 3);
    assert_eq!(cache.get(&Fragile(3)), Some(3));
    assert_eq!(cache.stats().errors, 2);
}

#[test]
fn test_poisoned_lock_resets_store() {
    let cache: TtlCache<String, i32> = cache(4);
    cache.set("a".to_string(), 1);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let _guard = cache.entries.lock().unwrap();
        panic!("panic while holding the store");
    }));
    assert!(outcome.is_err());

    assert_eq!(cache.get(&"a".to_string()), None);
    assert_eq!(cache.stats().errors, 1);

    cache.set("b".to_string(), 2);
    assert_eq!(cache.get(&"b".to_string()), Some(2));
}

#[test]
fn test_concurrent_access_respects_bound() {
    let cache = std::sync::Arc::new(cache(16));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("{}-{}", t, i % 40);
                    cache.set(key.clone(), i);
                    cache.get(&key);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(cache.len() <= 16);
    assert_eq!(cache.stats().errors, 0);
}
