//! Retry logic with exponential backoff
//!
//! Provides configurable retry behavior for transient failures. After the
//! last attempt the operation's own error is returned unchanged.

use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add up to 10% random jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum attempts
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::validation(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::validation(
                "retry.backoff_multiplier",
                "must be a finite value >= 1.0",
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::validation(
                "retry.initial_delay",
                "must not exceed max_delay",
            ));
        }
        Ok(())
    }

    /// Delay slept after the given failed attempt (1-based), before jitter
    ///
    /// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_nanos = self.initial_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);

        // NaN and overflow both land on the cap
        if !(base_nanos < self.max_delay.as_nanos() as f64) {
            return self.max_delay;
        }
        Duration::from_nanos(base_nanos.max(0.0).round() as u64)
    }

    /// Delay for an attempt including up to 10% jitter
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if !self.jitter {
            return delay;
        }

        let fraction: f64 = rand::thread_rng().gen_range(0.0..=0.1);
        delay + Duration::from_nanos((delay.as_nanos() as f64 * fraction) as u64)
    }
}

/// Execute an async operation with retry logic
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation` - Async operation to retry
/// * `is_retryable` - Function to determine if an error should trigger a retry
///
/// # Example
/// ```ignore
/// let config = RetryConfig::default();
/// let result = retry_with_backoff(
///     &config,
///     || async { call_provider().await },
///     |e| e.is_transient(),
/// ).await;
/// ```
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: R,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Debug,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= max_attempts || !is_retryable(&e) {
                    debug!(
                        attempt = attempt,
                        error = ?e,
                        "Operation failed, no more retries"
                    );
                    return Err(e);
                }

                let delay = config.calculate_delay(attempt);
                warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = ?e,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Reusable retry policy
#[derive(Debug, Clone)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    /// Create a retry policy
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run an operation, retrying every error
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Debug,
    {
        retry_with_backoff(&self.config, operation, |_| true).await
    }

    /// Run an operation, retrying only errors matching `is_retryable`
    pub async fn run_if<T, E, F, Fut, R>(
        &self,
        operation: F,
        is_retryable: R,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Debug,
    {
        retry_with_backoff(&self.config, operation, is_retryable).await
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }
}
