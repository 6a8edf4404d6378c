//! Adaptive timeout estimation
//!
//! Keeps a rolling window of recent latencies and derives a call bound from
//! a percentile of that window plus a fixed headroom, clamped to a range.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for the estimator
#[derive(Debug, Clone)]
pub struct AdaptiveTimeoutConfig {
    /// Percentile of the window used as the base, in (0, 100]
    pub percentile: f64,
    /// Headroom added on top of the percentile
    pub buffer: Duration,
    /// Lower clamp, also returned while the window is empty
    pub min_timeout: Duration,
    /// Upper clamp
    pub max_timeout: Duration,
    /// Window capacity
    pub history_size: usize,
}

impl Default for AdaptiveTimeoutConfig {
    fn default() -> Self {
        Self {
            percentile: 95.0,
            buffer: Duration::from_millis(100),
            min_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(30),
            history_size: 100,
        }
    }
}

impl AdaptiveTimeoutConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the percentile
    #[must_use]
    pub fn with_percentile(mut self, percentile: f64) -> Self {
        self.percentile = percentile;
        self
    }

    /// Set the headroom
    #[must_use]
    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    /// Set both clamps
    #[must_use]
    pub fn with_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_timeout = min;
        self.max_timeout = max;
        self
    }

    /// Set the window capacity
    #[must_use]
    pub fn with_history_size(mut self, size: usize) -> Self {
        self.history_size = size;
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.percentile > 0.0 && self.percentile <= 100.0) {
            return Err(Error::validation(
                "adaptive_timeout.percentile",
                "must be within (0, 100]",
            ));
        }
        if self.history_size == 0 {
            return Err(Error::validation(
                "adaptive_timeout.history_size",
                "must be greater than 0",
            ));
        }
        if self.min_timeout.is_zero() {
            return Err(Error::validation(
                "adaptive_timeout.min_timeout",
                "must be greater than 0",
            ));
        }
        if self.min_timeout > self.max_timeout {
            return Err(Error::validation(
                "adaptive_timeout.max_timeout",
                "must not be below min_timeout",
            ));
        }
        Ok(())
    }
}

/// Window statistics, all latencies in milliseconds
#[derive(Debug, Clone, Serialize)]
pub struct AdaptiveTimeoutStats {
    /// Samples in the window
    pub count: usize,
    /// Smallest sample
    pub min_ms: f64,
    /// Largest sample
    pub max_ms: f64,
    /// Arithmetic mean
    pub mean_ms: f64,
    /// Median
    pub p50_ms: f64,
    /// 95th percentile
    pub p95_ms: f64,
    /// 99th percentile
    pub p99_ms: f64,
    /// Bound `get_timeout` would return now
    pub current_timeout_ms: f64,
}

/// Rolling-window timeout estimator
pub struct AdaptiveTimeout {
    config: AdaptiveTimeoutConfig,
    samples: Mutex<VecDeque<f64>>,
}

impl AdaptiveTimeout {
    /// Create a new estimator
    pub fn new(config: AdaptiveTimeoutConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            samples: Mutex::new(VecDeque::with_capacity(config.history_size)),
            config,
        })
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &AdaptiveTimeoutConfig {
        &self.config
    }

    /// Record an observed latency
    pub fn record(&self, latency: Duration) {
        self.record_ms(latency.as_micros() as f64 / 1000.0);
    }

    /// Record an observed latency in milliseconds
    pub fn record_ms(&self, latency_ms: f64) {
        if !latency_ms.is_finite() || latency_ms < 0.0 {
            warn!(latency_ms = latency_ms, "Discarding invalid latency sample");
            return;
        }

        let mut samples = self.lock();
        samples.push_back(latency_ms);
        while samples.len() > self.config.history_size {
            samples.pop_front();
        }
    }

    /// Current bound: percentile + buffer, clamped to [min, max]
    #[must_use]
    pub fn get_timeout(&self) -> Duration {
        let sorted = self.sorted_samples();
        self.timeout_for(&sorted)
    }

    /// Run a future bounded by the current timeout, recording how long it took
    ///
    /// On expiry the bound itself is recorded, so repeated timeouts push the
    /// estimate upward.
    pub async fn execute<T, Fut>(&self, future: Fut) -> Result<T>
    where
        Fut: Future<Output = T>,
    {
        let bound = self.get_timeout();
        let started = Instant::now();

        match tokio::time::timeout(bound, future).await {
            Ok(value) => {
                self.record(started.elapsed());
                Ok(value)
            }
            Err(_) => {
                self.record(bound);
                debug!(timeout_ms = bound.as_millis() as u64, "Adaptive timeout elapsed");
                Err(Error::Timeout(bound))
            }
        }
    }

    /// Window statistics
    #[must_use]
    pub fn stats(&self) -> AdaptiveTimeoutStats {
        let sorted = self.sorted_samples();
        let current = self.timeout_for(&sorted).as_micros() as f64 / 1000.0;

        if sorted.is_empty() {
            return AdaptiveTimeoutStats {
                count: 0,
                min_ms: 0.0,
                max_ms: 0.0,
                mean_ms: 0.0,
                p50_ms: 0.0,
                p95_ms: 0.0,
                p99_ms: 0.0,
                current_timeout_ms: current,
            };
        }

        AdaptiveTimeoutStats {
            count: sorted.len(),
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            mean_ms: sorted.iter().sum::<f64>() / sorted.len() as f64,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
            current_timeout_ms: current,
        }
    }

    /// Forget every sample
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn timeout_for(&self, sorted: &[f64]) -> Duration {
        if sorted.is_empty() {
            return self.config.min_timeout;
        }
        let base_ms = percentile(sorted, self.config.percentile);
        let base = Duration::try_from_secs_f64(base_ms / 1000.0).unwrap_or(self.config.max_timeout);
        let candidate = base.saturating_add(self.config.buffer);
        candidate.clamp(self.config.min_timeout, self.config.max_timeout)
    }

    fn sorted_samples(&self) -> Vec<f64> {
        let mut sorted: Vec<f64> = self.lock().iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        sorted
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<f64>> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests;
