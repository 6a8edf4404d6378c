//! Careguard Core - Resilience Toolkit
//!
//! In-process guards for every call the care assistant makes to a
//! downstream dependency (LLM gateways, cache lookups, database calls):
//! - Cache: bounded key/value store with write-time TTL and LRU eviction
//! - Circuit breaker: per-dependency fail-fast state machine
//! - Retry: exponential backoff with jitter
//! - Adaptive timeout: latency-percentile call bound
//! - Batcher: bounded-concurrency fan-out with an optional deadline
//! - Pool: fixed-size pool of pre-created async resources
//!
//! Components are independent instances; [`Toolkit`] builds the shared ones
//! once from [`ToolkitSettings`] so they can be handed to consumers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adaptive_timeout;
pub mod batcher;
pub mod cache;
pub mod circuit_breaker;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod settings;
pub mod toolkit;

pub use adaptive_timeout::{AdaptiveTimeout, AdaptiveTimeoutConfig, AdaptiveTimeoutStats};
pub use batcher::{AsyncBatcher, BatcherConfig, BatcherStats};
pub use cache::{CacheConfig, CacheStats, TtlCache};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerSnapshot,
    CircuitState,
};
pub use error::{BatchError, BreakerError, CircuitOpenError, Error, Result};
pub use pool::{PoolConfig, PoolStats, PooledResource, ResourceFactory, ResourcePool};
pub use retry::{retry_with_backoff, Retry, RetryConfig};
pub use settings::ToolkitSettings;
pub use toolkit::{Toolkit, ToolkitSnapshot};
