//! Named breakers, one per guarded dependency

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use crate::adaptive_timeout::AdaptiveTimeout;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Registry handing out shared breakers by dependency name
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    adaptive_timeout: Option<Arc<AdaptiveTimeout>>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers use `defaults`
    pub fn new(defaults: CircuitBreakerConfig) -> Result<Self> {
        defaults.validate()?;
        Ok(Self {
            defaults,
            ..Self::default()
        })
    }

    /// Use a dedicated configuration for one dependency
    pub fn with_override(
        mut self,
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Self> {
        config.validate()?;
        self.overrides.insert(name.into(), config);
        Ok(self)
    }

    /// Attach a latency estimator to every breaker created afterwards
    #[must_use]
    pub fn with_adaptive_timeout(mut self, timeout: Arc<AdaptiveTimeout>) -> Self {
        self.adaptive_timeout = Some(timeout);
        self
    }

    /// Get or create the breaker for a dependency
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        if let Some(breaker) = breakers.get(name) {
            return breaker.clone();
        }
        drop(breakers);

        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| self.defaults.clone());
                debug!(name = name, "Registering circuit breaker");
                let breaker = CircuitBreaker::from_valid(name.to_string(), config);
                Arc::new(match &self.adaptive_timeout {
                    Some(adaptive) => breaker.with_adaptive_timeout(adaptive.clone()),
                    None => breaker,
                })
            })
            .clone()
    }

    /// Get an existing breaker
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Names of registered breakers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Snapshots of every breaker, sorted by name
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut snapshots: Vec<_> = breakers.iter().map(|b| b.metrics()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Close every breaker
    pub fn reset_all(&self) {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        for breaker in breakers.values() {
            breaker.reset();
        }
    }
}
