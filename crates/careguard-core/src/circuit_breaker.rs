//! Circuit Breaker pattern implementation
//!
//! Provides fault tolerance by failing fast while a dependency is unhealthy.
//! The circuit breaker has three states:
//! - Closed: Normal operation, calls pass through
//! - Open: Failures reached the threshold, calls are rejected
//! - HalfOpen: A bounded number of trial calls probe for recovery
//!
//! All bookkeeping for one breaker happens under a single mutex, and the lock
//! is never held while the guarded operation runs.

mod registry;

pub use registry::CircuitBreakerRegistry;

use crate::adaptive_timeout::AdaptiveTimeout;
use crate::error::{BreakerError, CircuitOpenError, Error, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Failures exceeded threshold - calls are rejected
    Open,
    /// Testing recovery - limited calls pass through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time since the last failure before a probe is admitted
    pub recovery_timeout: Duration,
    /// Concurrent trial calls admitted while half-open
    pub half_open_max_calls: u32,
    /// Fixed bound for async calls (ignored when an adaptive timeout is attached)
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            call_timeout: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set recovery timeout
    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Set the half-open trial budget
    #[must_use]
    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }

    /// Bound every async call
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::validation(
                "circuit_breaker.failure_threshold",
                "must be greater than 0",
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(Error::validation(
                "circuit_breaker.half_open_max_calls",
                "must be greater than 0",
            ));
        }
        if self.call_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::validation(
                "circuit_breaker.call_timeout",
                "must be greater than 0 when set",
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Consecutive classified failures
    pub failure_count: u32,
    /// Trial calls currently running
    pub half_open_inflight: u32,
    /// Calls presented to the breaker
    pub total_calls: u64,
    /// Calls that succeeded
    pub successes: u64,
    /// Calls that failed with a classified error or timed out
    pub failures: u64,
    /// Calls rejected without running
    pub rejections: u64,
    /// Rejections served by a fallback
    pub fallbacks: u64,
    /// Failures that did not match the classification
    pub ignored: u64,
    /// Number of state transitions
    pub state_changes: u64,
    /// Seconds since the last recorded failure
    pub seconds_since_last_failure: Option<f64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    half_open_inflight: u32,
    /// Bumped on every transition so stale trial permits are recognisable
    generation: u64,
    total_calls: u64,
    successes: u64,
    failures: u64,
    rejections: u64,
    fallbacks: u64,
    ignored: u64,
    state_changes: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            half_open_inflight: 0,
            generation: 0,
            total_calls: 0,
            successes: 0,
            failures: 0,
            rejections: 0,
            fallbacks: 0,
            ignored: 0,
            state_changes: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Ignored,
}

/// Circuit breaker for fault tolerance
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    adaptive_timeout: Option<Arc<AdaptiveTimeout>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid(name.into(), config))
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::from_valid(name.into(), CircuitBreakerConfig::default())
    }

    pub(crate) fn from_valid(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerState::new()),
            adaptive_timeout: None,
        }
    }

    /// Bound async calls by a shared latency estimator and feed it every call
    #[must_use]
    pub fn with_adaptive_timeout(mut self, timeout: Arc<AdaptiveTimeout>) -> Self {
        self.adaptive_timeout = Some(timeout);
        self
    }

    /// Whether async calls are bounded by a latency estimator
    #[must_use]
    pub fn has_adaptive_timeout(&self) -> bool {
        self.adaptive_timeout.is_some()
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Get current failure count
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Time of the most recent classified failure
    #[must_use]
    pub fn last_failure_time(&self) -> Option<Instant> {
        self.lock().last_failure_time
    }

    /// Run a synchronous operation; every error counts as a failure
    pub fn call<T, E, F>(&self, operation: F) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.call_classified(operation, |_| true)
    }

    /// Run a synchronous operation; only errors matching `is_failure` count
    pub fn call_classified<T, E, F, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        C: Fn(&E) -> bool,
    {
        let permit = self.admit().map_err(BreakerError::Open)?;
        Self::settle(permit, operation(), &is_failure)
    }

    /// Run a synchronous operation, serving rejections from `fallback`
    pub fn call_with_fallback<T, E, F, G>(
        &self,
        operation: F,
        fallback: G,
    ) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        G: FnOnce() -> std::result::Result<T, E>,
    {
        self.call_classified_with_fallback(operation, |_| true, fallback)
    }

    /// Classified variant of [`call_with_fallback`](Self::call_with_fallback)
    pub fn call_classified_with_fallback<T, E, F, C, G>(
        &self,
        operation: F,
        is_failure: C,
        fallback: G,
    ) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        C: Fn(&E) -> bool,
        G: FnOnce() -> std::result::Result<T, E>,
    {
        match self.admit() {
            Ok(permit) => Self::settle(permit, operation(), &is_failure),
            Err(open) => {
                self.note_fallback(&open);
                fallback().map_err(BreakerError::Failed)
            }
        }
    }

    /// Run an async operation; every error counts as a failure
    pub async fn call_async<T, E, F, Fut>(
        &self,
        operation: F,
    ) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.call_async_classified(operation, |_| true).await
    }

    /// Run an async operation; only errors matching `is_failure` count
    pub async fn call_async_classified<T, E, F, Fut, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let permit = self.admit().map_err(BreakerError::Open)?;
        self.run_async(permit, operation, &is_failure).await
    }

    /// Run an async operation, serving rejections from `fallback`
    pub async fn call_async_with_fallback<T, E, F, Fut, G, GFut>(
        &self,
        operation: F,
        fallback: G,
    ) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = std::result::Result<T, E>>,
    {
        self.call_async_classified_with_fallback(operation, |_| true, fallback)
            .await
    }

    /// Classified variant of [`call_async_with_fallback`](Self::call_async_with_fallback)
    pub async fn call_async_classified_with_fallback<T, E, F, Fut, C, G, GFut>(
        &self,
        operation: F,
        is_failure: C,
        fallback: G,
    ) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        C: Fn(&E) -> bool,
        G: FnOnce() -> GFut,
        GFut: Future<Output = std::result::Result<T, E>>,
    {
        match self.admit() {
            Ok(permit) => self.run_async(permit, operation, &is_failure).await,
            Err(open) => {
                self.note_fallback(&open);
                fallback().await.map_err(BreakerError::Failed)
            }
        }
    }

    /// Reset the circuit breaker to closed state
    ///
    /// Cumulative counters are kept.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.failure_count = 0;
        inner.last_failure_time = None;
        info!(name = %self.name, "Circuit breaker reset");
    }

    /// Snapshot of state and counters
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        let now = Instant::now();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_inflight: inner.half_open_inflight,
            total_calls: inner.total_calls,
            successes: inner.successes,
            failures: inner.failures,
            rejections: inner.rejections,
            fallbacks: inner.fallbacks,
            ignored: inner.ignored,
            state_changes: inner.state_changes,
            seconds_since_last_failure: inner
                .last_failure_time
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
        }
    }

    async fn run_async<T, E, F, Fut, C>(
        &self,
        permit: CallPermit<'_>,
        operation: F,
        is_failure: &C,
    ) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let bound = match &self.adaptive_timeout {
            Some(adaptive) => Some(adaptive.get_timeout()),
            None => self.config.call_timeout,
        };
        let started = Instant::now();

        let result = match bound {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => {
                    if let Some(adaptive) = &self.adaptive_timeout {
                        adaptive.record(limit);
                    }
                    warn!(
                        name = %self.name,
                        timeout_ms = limit.as_millis() as u64,
                        "Guarded call timed out"
                    );
                    permit.finish(Outcome::Failure);
                    return Err(BreakerError::TimedOut(limit));
                }
            },
            None => operation().await,
        };

        if let Some(adaptive) = &self.adaptive_timeout {
            adaptive.record(started.elapsed());
        }
        Self::settle(permit, result, is_failure)
    }

    fn settle<T, E, C>(
        permit: CallPermit<'_>,
        result: std::result::Result<T, E>,
        is_failure: &C,
    ) -> std::result::Result<T, BreakerError<E>>
    where
        C: Fn(&E) -> bool,
    {
        match result {
            Ok(value) => {
                permit.finish(Outcome::Success);
                Ok(value)
            }
            Err(error) => {
                let outcome = if is_failure(&error) {
                    Outcome::Failure
                } else {
                    Outcome::Ignored
                };
                permit.finish(outcome);
                Err(BreakerError::Failed(error))
            }
        }
    }

    /// Admit a call or reject it, moving Open to HalfOpen once recovery is due
    fn admit(&self) -> std::result::Result<CallPermit<'_>, CircuitOpenError> {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.total_calls += 1;

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure_time
                .map(|t| now.saturating_duration_since(t));
            match elapsed {
                Some(elapsed) if elapsed < self.config.recovery_timeout => {
                    inner.rejections += 1;
                    debug!(name = %self.name, "Circuit breaker rejected call");
                    return Err(CircuitOpenError {
                        name: self.name.clone(),
                        state: CircuitState::Open,
                        retry_after: Some(self.config.recovery_timeout - elapsed),
                    });
                }
                _ => self.transition(&mut inner, CircuitState::HalfOpen),
            }
        }

        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, inner.generation, false)),
            CircuitState::HalfOpen => {
                if inner.half_open_inflight < self.config.half_open_max_calls {
                    inner.half_open_inflight += 1;
                    debug!(
                        name = %self.name,
                        inflight = inner.half_open_inflight,
                        "Circuit breaker admitted trial call"
                    );
                    Ok(CallPermit::new(self, inner.generation, true))
                } else {
                    inner.rejections += 1;
                    debug!(name = %self.name, "Half-open trial budget exhausted");
                    Err(CircuitOpenError {
                        name: self.name.clone(),
                        state: CircuitState::HalfOpen,
                        retry_after: None,
                    })
                }
            }
            CircuitState::Open => {
                inner.rejections += 1;
                Err(CircuitOpenError {
                    name: self.name.clone(),
                    state: CircuitState::Open,
                    retry_after: None,
                })
            }
        }
    }

    fn record(&self, inner: &mut BreakerState, outcome: Outcome) {
        match outcome {
            Outcome::Success => {
                inner.successes += 1;
                match inner.state {
                    CircuitState::Closed => inner.failure_count = 0,
                    CircuitState::HalfOpen => self.transition(inner, CircuitState::Closed),
                    // A call admitted before the circuit opened; leave the state alone
                    CircuitState::Open => {}
                }
            }
            Outcome::Failure => {
                let now = Instant::now();
                inner.failures += 1;
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_time = Some(match inner.last_failure_time {
                    Some(previous) if previous > now => previous,
                    _ => now,
                });

                debug!(
                    name = %self.name,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );

                match inner.state {
                    CircuitState::Closed => {
                        if inner.failure_count >= self.config.failure_threshold {
                            self.transition(inner, CircuitState::Open);
                        }
                    }
                    CircuitState::HalfOpen => {
                        warn!(
                            name = %self.name,
                            "Circuit breaker failure in half-open state, reopening"
                        );
                        self.transition(inner, CircuitState::Open);
                    }
                    CircuitState::Open => {}
                }
            }
            Outcome::Ignored => inner.ignored += 1,
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        if inner.state == to {
            return;
        }
        info!(
            name = %self.name,
            from = %inner.state,
            to = %to,
            failures = inner.failure_count,
            "Circuit breaker state change"
        );
        inner.state = to;
        inner.state_changes += 1;
        inner.generation += 1;
        inner.half_open_inflight = 0;
        if to == CircuitState::Closed {
            inner.failure_count = 0;
        }
    }

    fn note_fallback(&self, open: &CircuitOpenError) {
        self.lock().fallbacks += 1;
        debug!(name = %self.name, state = %open.state, "Serving fallback");
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Admission ticket for one guarded call
///
/// Dropping an unfinished permit (a cancelled call) only releases its
/// half-open slot; no outcome is recorded.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    finished: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, generation: u64, trial: bool) -> Self {
        Self {
            breaker,
            generation,
            trial,
            finished: false,
        }
    }

    fn finish(mut self, outcome: Outcome) {
        self.complete(Some(outcome));
    }

    fn complete(&mut self, outcome: Option<Outcome>) {
        self.finished = true;
        let mut inner = self.breaker.lock();
        if self.trial
            && inner.generation == self.generation
            && inner.state == CircuitState::HalfOpen
        {
            inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
        }
        if let Some(outcome) = outcome {
            self.breaker.record(&mut inner, outcome);
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.complete(None);
        }
    }
}
