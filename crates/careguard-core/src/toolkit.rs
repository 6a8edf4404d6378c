//! Startup wiring
//!
//! [`Toolkit`] is built once from [`ToolkitSettings`] and handed to every
//! consumer by reference. Shared instances (breakers, retry policy, batcher,
//! latency estimator) live here; caches and pools are built per consumer from
//! the same settings.

use crate::adaptive_timeout::{AdaptiveTimeout, AdaptiveTimeoutStats};
use crate::batcher::{AsyncBatcher, BatcherStats};
use crate::cache::TtlCache;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerSnapshot};
use crate::error::Result;
use crate::pool::{ResourceFactory, ResourcePool};
use crate::retry::Retry;
use crate::settings::ToolkitSettings;
use serde::Serialize;
use std::hash::Hash;
use std::sync::Arc;
use tracing::info;

/// Point-in-time view of the shared components
#[derive(Debug, Clone, Serialize)]
pub struct ToolkitSnapshot {
    /// Every registered breaker, by name
    pub breakers: Vec<CircuitBreakerSnapshot>,
    /// Shared batcher
    pub batcher: BatcherStats,
    /// Shared latency estimator
    pub adaptive_timeout: AdaptiveTimeoutStats,
}

/// The resilience components, constructed once at startup
pub struct Toolkit {
    settings: ToolkitSettings,
    breakers: CircuitBreakerRegistry,
    retry: Retry,
    batcher: AsyncBatcher,
    adaptive_timeout: Arc<AdaptiveTimeout>,
}

impl Toolkit {
    /// Validate the settings and build the shared components
    pub fn from_settings(settings: ToolkitSettings) -> Result<Self> {
        settings.validate()?;

        let adaptive_timeout = Arc::new(AdaptiveTimeout::new(
            settings.adaptive_timeout.to_config(),
        )?);

        let mut breakers = CircuitBreakerRegistry::new(settings.circuit_breaker.to_config())?;
        for (name, overrides) in &settings.breakers {
            breakers = breakers.with_override(name.clone(), overrides.to_config())?;
        }
        if settings.adaptive_timeout.guard_breakers {
            breakers = breakers.with_adaptive_timeout(adaptive_timeout.clone());
        }
        for name in settings.breakers.keys() {
            breakers.get_or_create(name);
        }

        let retry = Retry::new(settings.retry.to_config())?;
        let batcher = AsyncBatcher::new(settings.batcher.to_config())?;

        info!(
            breakers = settings.breakers.len(),
            max_concurrent = settings.batcher.max_concurrent,
            "Resilience toolkit ready"
        );

        Ok(Self {
            settings,
            breakers,
            retry,
            batcher,
            adaptive_timeout,
        })
    }

    /// The settings this toolkit was built from
    #[must_use]
    pub fn settings(&self) -> &ToolkitSettings {
        &self.settings
    }

    /// Breaker registry
    #[must_use]
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Shared breaker guarding `dependency`
    pub fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create(dependency)
    }

    /// Retry policy
    #[must_use]
    pub fn retry(&self) -> &Retry {
        &self.retry
    }

    /// Shared batcher
    #[must_use]
    pub fn batcher(&self) -> &AsyncBatcher {
        &self.batcher
    }

    /// Shared latency estimator
    #[must_use]
    pub fn adaptive_timeout(&self) -> &Arc<AdaptiveTimeout> {
        &self.adaptive_timeout
    }

    /// A new cache using the cache settings
    pub fn cache<K, V>(&self) -> Result<TtlCache<K, V>>
    where
        K: Hash + Eq + Clone,
        V: Clone,
    {
        TtlCache::new(self.settings.cache.to_config())
    }

    /// A new, uninitialized pool using the pool settings
    pub fn pool<R, F>(&self, factory: F) -> Result<ResourcePool<R>>
    where
        R: Send + 'static,
        F: ResourceFactory<R> + 'static,
    {
        ResourcePool::new(self.settings.pool.to_config(), factory)
    }

    /// Snapshot of the shared components
    #[must_use]
    pub fn snapshot(&self) -> ToolkitSnapshot {
        ToolkitSnapshot {
            breakers: self.breakers.snapshots(),
            batcher: self.batcher.stats(),
            adaptive_timeout: self.adaptive_timeout.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::settings::BreakerSettings;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Sevens;

    #[async_trait]
    impl ResourceFactory<u32> for Sevens {
        async fn create(&self) -> anyhow::Result<u32> {
            Ok(7)
        }
    }

    fn settings() -> ToolkitSettings {
        let mut settings = ToolkitSettings::default();
        settings.breakers.insert(
            "llm".to_string(),
            BreakerSettings {
                failure_threshold: 2,
                ..BreakerSettings::default()
            },
        );
        settings.pool.max_size = 2;
        settings.cache.max_size = 4;
        settings
    }

    #[test]
    fn test_from_settings_registers_breakers() {
        let toolkit = Toolkit::from_settings(settings()).unwrap();

        assert_eq!(toolkit.breakers().names(), vec!["llm".to_string()]);
        assert_eq!(toolkit.breaker("llm").config().failure_threshold, 2);
        // Unknown dependencies get the defaults
        assert_eq!(toolkit.breaker("sms").config().failure_threshold, 5);
        assert!(toolkit.breaker("llm").config().call_timeout.is_none());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut settings = settings();
        settings.batcher.max_concurrent = 0;
        assert!(Toolkit::from_settings(settings).is_err());
    }

    #[test]
    fn test_breakers_are_shared() {
        let toolkit = Toolkit::from_settings(settings()).unwrap();

        let _ = toolkit.breaker("llm").call(|| Err::<(), _>("down"));
        let _ = toolkit.breaker("llm").call(|| Err::<(), _>("down"));
        assert_eq!(toolkit.breaker("llm").state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_cache_and_pool_use_settings() {
        let toolkit = Toolkit::from_settings(settings()).unwrap();

        let cache = toolkit.cache::<String, u32>().unwrap();
        assert_eq!(cache.config().max_size, 4);

        let pool = toolkit.pool::<u32, _>(Sevens).unwrap();
        pool.initialize().await.unwrap();
        assert_eq!(*pool.acquire().await.unwrap(), 7);
        assert_eq!(pool.stats().max_size, 2);
    }

    #[test]
    fn test_adaptive_timeout_guards_breakers_when_enabled() {
        let mut settings = settings();
        settings.adaptive_timeout.guard_breakers = true;
        settings.adaptive_timeout.min_timeout_ms = 250;
        let toolkit = Toolkit::from_settings(settings).unwrap();

        assert_eq!(
            toolkit.adaptive_timeout().get_timeout(),
            Duration::from_millis(250)
        );
        assert!(toolkit.breaker("llm").has_adaptive_timeout());
    }

    #[test]
    fn test_snapshot_serializes() {
        let toolkit = Toolkit::from_settings(settings()).unwrap();
        let json = serde_json::to_value(toolkit.snapshot()).unwrap();

        assert_eq!(json["breakers"][0]["name"], "llm");
        assert_eq!(json["breakers"][0]["state"], "closed");
        assert_eq!(json["batcher"]["max_concurrent"], 10);
        assert_eq!(json["adaptive_timeout"]["count"], 0);
    }
}
