//! Serializable toolkit settings
//!
//! The deserializable face of the component configurations. Durations are
//! plain integers (`_ms` / `_secs`) so they read naturally in TOML and
//! environment variables; each section converts into its runtime config.

use crate::adaptive_timeout::AdaptiveTimeoutConfig;
use crate::batcher::BatcherConfig;
use crate::cache::CacheConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::Result;
use crate::pool::PoolConfig;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Settings for every component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolkitSettings {
    /// Response cache
    #[serde(default)]
    pub cache: CacheSettings,
    /// Defaults for every circuit breaker
    #[serde(default)]
    pub circuit_breaker: BreakerSettings,
    /// Per-dependency breaker overrides, registered at startup
    #[serde(default)]
    pub breakers: BTreeMap<String, BreakerSettings>,
    /// Retry policy
    #[serde(default)]
    pub retry: RetrySettings,
    /// Fan-out executor
    #[serde(default)]
    pub batcher: BatcherSettings,
    /// Latency-based timeout estimator
    #[serde(default)]
    pub adaptive_timeout: AdaptiveTimeoutSettings,
    /// Resource pools
    #[serde(default)]
    pub pool: PoolSettings,
}

impl ToolkitSettings {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.cache.to_config().validate()?;
        self.circuit_breaker.to_config().validate()?;
        for settings in self.breakers.values() {
            settings.to_config().validate()?;
        }
        self.retry.to_config().validate()?;
        self.batcher.to_config().validate()?;
        self.adaptive_timeout.to_config().validate()?;
        self.pool.to_config().validate()
    }
}

/// Cache section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Entry limit
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    /// TTL applied by `set`, in seconds
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_cache_max_size() -> usize {
    1000
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheSettings {
    /// Runtime configuration
    pub fn to_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_max_size(self.max_size)
            .with_default_ttl(Duration::from_secs(self.default_ttl_secs))
    }
}

/// Circuit breaker section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds in `Open` before a trial call
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    /// Concurrent trial calls while half-open
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
    /// Fixed bound for async calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn default_half_open_max_calls() -> u32 {
    3
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
            call_timeout_ms: None,
        }
    }
}

impl BreakerSettings {
    /// Runtime configuration
    pub fn to_config(&self) -> CircuitBreakerConfig {
        let config = CircuitBreakerConfig::new()
            .with_failure_threshold(self.failure_threshold)
            .with_recovery_timeout(Duration::from_secs(self.recovery_timeout_secs))
            .with_half_open_max_calls(self.half_open_max_calls);
        match self.call_timeout_ms {
            Some(ms) => config.with_call_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}

/// Retry section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff ceiling
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor per attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Add up to 10% random jitter
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_true(),
        }
    }
}

impl RetrySettings {
    /// Runtime configuration
    pub fn to_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
            .with_jitter(self.jitter)
    }
}

/// Batcher section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherSettings {
    /// Operations admitted at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Batch deadline; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_max_concurrent() -> usize {
    10
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_ms: None,
        }
    }
}

impl BatcherSettings {
    /// Runtime configuration
    pub fn to_config(&self) -> BatcherConfig {
        let config = BatcherConfig::new().with_max_concurrent(self.max_concurrent);
        match self.timeout_ms {
            Some(ms) => config.with_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}

/// Adaptive timeout section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveTimeoutSettings {
    /// Percentile of the window used as the base
    #[serde(default = "default_percentile")]
    pub percentile: f64,
    /// Headroom added to the percentile
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u64,
    /// Lower clamp
    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: u64,
    /// Upper clamp
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    /// Latency samples kept
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Let every registered breaker bound its async calls with the estimate
    #[serde(default)]
    pub guard_breakers: bool,
}

fn default_percentile() -> f64 {
    95.0
}

fn default_buffer_ms() -> u64 {
    100
}

fn default_min_timeout_ms() -> u64 {
    1000
}

fn default_max_timeout_ms() -> u64 {
    30_000
}

fn default_history_size() -> usize {
    100
}

impl Default for AdaptiveTimeoutSettings {
    fn default() -> Self {
        Self {
            percentile: default_percentile(),
            buffer_ms: default_buffer_ms(),
            min_timeout_ms: default_min_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            history_size: default_history_size(),
            guard_breakers: false,
        }
    }
}

impl AdaptiveTimeoutSettings {
    /// Runtime configuration
    pub fn to_config(&self) -> AdaptiveTimeoutConfig {
        AdaptiveTimeoutConfig::new()
            .with_percentile(self.percentile)
            .with_buffer(Duration::from_millis(self.buffer_ms))
            .with_bounds(
                Duration::from_millis(self.min_timeout_ms),
                Duration::from_millis(self.max_timeout_ms),
            )
            .with_history_size(self.history_size)
    }
}

/// Resource pool section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Resources per pool
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,
    /// How long `acquire` waits
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_pool_max_size() -> usize {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl PoolSettings {
    /// Runtime configuration
    pub fn to_config(&self) -> PoolConfig {
        PoolConfig::new()
            .with_max_size(self.max_size)
            .with_acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_runtime_defaults() {
        let settings = ToolkitSettings::default();
        assert!(settings.validate().is_ok());

        let breaker = settings.circuit_breaker.to_config();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.recovery_timeout, Duration::from_secs(60));
        assert!(breaker.call_timeout.is_none());

        let retry = settings.retry.to_config();
        assert_eq!(retry.max_delay, Duration::from_secs(10));
        assert!(retry.jitter);

        let adaptive = settings.adaptive_timeout.to_config();
        assert_eq!(adaptive.min_timeout, Duration::from_secs(1));
        assert_eq!(adaptive.max_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: ToolkitSettings = serde_json::from_str(
            r#"{
                "cache": { "max_size": 50 },
                "breakers": { "sms": { "recovery_timeout_secs": 5, "call_timeout_ms": 800 } },
                "batcher": { "timeout_ms": 2500 }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.cache.max_size, 50);
        assert_eq!(settings.cache.default_ttl_secs, 3600);

        let sms = settings.breakers["sms"].to_config();
        assert_eq!(sms.failure_threshold, 5);
        assert_eq!(sms.recovery_timeout, Duration::from_secs(5));
        assert_eq!(sms.call_timeout, Some(Duration::from_millis(800)));

        assert_eq!(
            settings.batcher.to_config().timeout,
            Some(Duration::from_millis(2500))
        );
        assert_eq!(settings.pool.max_size, 10);
    }

    #[test]
    fn test_invalid_section_fails_validation() {
        let mut settings = ToolkitSettings::default();
        settings.retry.max_attempts = 0;
        assert!(settings.validate().is_err());

        let mut settings = ToolkitSettings::default();
        settings
            .breakers
            .insert("db".to_string(), BreakerSettings {
                half_open_max_calls: 0,
                ..BreakerSettings::default()
            });
        assert!(settings.validate().is_err());

        let mut settings = ToolkitSettings::default();
        settings.adaptive_timeout.min_timeout_ms = 50_000;
        assert!(settings.validate().is_err());
    }
}
