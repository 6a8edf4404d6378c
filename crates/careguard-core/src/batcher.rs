//! Bounded-concurrency fan-out
//!
//! Runs a set of independent operations on the current task, admitting at
//! most `max_concurrent` at a time through a semaphore shared by every batch
//! on the same instance. An optional deadline cancels whatever is still
//! pending when it elapses.

use crate::error::{BatchError, Error, Result};
use crate::metrics::{Counter, Gauge, LatencyMean, Timer};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for the batcher
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Operations allowed to run at the same time
    pub max_concurrent: usize,
    /// Deadline for a whole batch, `None` for unbounded
    pub timeout: Option<Duration>,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            timeout: None,
        }
    }
}

impl BatcherConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the admission limit
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the default batch deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 || self.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(Error::validation(
                "batcher.max_concurrent",
                format!("must be within 1..={}", Semaphore::MAX_PERMITS),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::validation(
                "batcher.timeout",
                "must be greater than 0 when set",
            ));
        }
        Ok(())
    }
}

/// Batcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct BatcherStats {
    /// Admission limit
    pub max_concurrent: usize,
    /// Operations running right now
    pub active_tasks: i64,
    /// Highest number of operations that ever ran together
    pub peak_active_tasks: i64,
    /// Operations that returned `Ok`
    pub completed_tasks: u64,
    /// Operations that returned `Err`
    pub failed_tasks: u64,
    /// Operations dropped before finishing
    pub cancelled_tasks: u64,
    /// Mean run time of finished operations
    pub avg_duration_ms: f64,
}

/// Why a batch stopped driving its operations
enum Halt<E> {
    Finished,
    Deadline(Duration),
    TaskFailed { index: usize, error: E },
}

/// Bounded-concurrency executor
pub struct AsyncBatcher {
    config: BatcherConfig,
    semaphore: Semaphore,
    active: Gauge,
    completed: Counter,
    failed: Counter,
    cancelled: Counter,
    durations: LatencyMean,
}

impl AsyncBatcher {
    /// Create a new batcher
    pub fn new(config: BatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            semaphore: Semaphore::new(config.max_concurrent),
            config,
            active: Gauge::new(),
            completed: Counter::new(),
            failed: Counter::new(),
            cancelled: Counter::new(),
            durations: LatencyMean::new(),
        })
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Run every operation; all results in input order or the first failure
    ///
    /// A failing operation or the configured deadline cancels everything
    /// still pending.
    pub async fn batch<T, E, I, Fut>(&self, operations: I) -> std::result::Result<Vec<T>, BatchError<E>>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.batch_with_timeout(operations, self.config.timeout).await
    }

    /// [`batch`](Self::batch) with an explicit deadline
    pub async fn batch_with_timeout<T, E, I, Fut>(
        &self,
        operations: I,
        timeout: Option<Duration>,
    ) -> std::result::Result<Vec<T>, BatchError<E>>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let (slots, halt) = self.drive(operations, timeout, true).await;

        match halt {
            Halt::Finished => Ok(slots
                .into_iter()
                .flatten()
                .filter_map(std::result::Result::ok)
                .collect()),
            Halt::Deadline(bound) => Err(BatchError::Timeout(bound)),
            Halt::TaskFailed { index, error } => Err(BatchError::Task { index, error }),
        }
    }

    /// Run every operation and report each outcome in input order
    ///
    /// Operations cut off by the deadline are reported as
    /// [`BatchError::Timeout`]; the ones that finished keep their results.
    pub async fn batch_settled<T, E, I, Fut>(
        &self,
        operations: I,
    ) -> Vec<std::result::Result<T, BatchError<E>>>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.batch_settled_with_timeout(operations, self.config.timeout)
            .await
    }

    /// [`batch_settled`](Self::batch_settled) with an explicit deadline
    pub async fn batch_settled_with_timeout<T, E, I, Fut>(
        &self,
        operations: I,
        timeout: Option<Duration>,
    ) -> Vec<std::result::Result<T, BatchError<E>>>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let (slots, halt) = self.drive(operations, timeout, false).await;
        let bound = match halt {
            Halt::Deadline(bound) => bound,
            _ => Duration::ZERO,
        };

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| match slot {
                Some(Ok(value)) => Ok(value),
                Some(Err(error)) => Err(BatchError::Task { index, error }),
                None => Err(BatchError::Timeout(bound)),
            })
            .collect()
    }

    /// Batcher statistics
    #[must_use]
    pub fn stats(&self) -> BatcherStats {
        BatcherStats {
            max_concurrent: self.config.max_concurrent,
            active_tasks: self.active.get(),
            peak_active_tasks: self.active.peak(),
            completed_tasks: self.completed.get(),
            failed_tasks: self.failed.get(),
            cancelled_tasks: self.cancelled.get(),
            avg_duration_ms: self.durations.mean_ms(),
        }
    }

    async fn drive<T, E, I, Fut>(
        &self,
        operations: I,
        timeout: Option<Duration>,
        fail_fast: bool,
    ) -> (Vec<Option<std::result::Result<T, E>>>, Halt<E>)
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut pending: FuturesUnordered<_> = operations
            .into_iter()
            .enumerate()
            .map(|(index, operation)| self.run_one(index, operation))
            .collect();
        let mut slots: Vec<Option<std::result::Result<T, E>>> =
            std::iter::repeat_with(|| None).take(pending.len()).collect();

        debug!(
            tasks = slots.len(),
            max_concurrent = self.config.max_concurrent,
            "Starting batch"
        );

        let deadline = timeout.map(|bound| (Instant::now() + bound, bound));
        let expiry = async {
            match deadline {
                Some((at, _)) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expiry);

        let halt = loop {
            tokio::select! {
                biased;
                next = pending.next() => match next {
                    Some((index, Err(error))) if fail_fast => {
                        break Halt::TaskFailed { index, error };
                    }
                    Some((index, result)) => slots[index] = Some(result),
                    None => break Halt::Finished,
                },
                () = &mut expiry => {
                    let bound = deadline.map_or(Duration::ZERO, |(_, bound)| bound);
                    break Halt::Deadline(bound);
                }
            }
        };

        if !pending.is_empty() {
            let dropped = pending.len();
            drop(pending);
            self.cancelled.inc_by(dropped as u64);
            warn!(cancelled = dropped, "Batch stopped early, cancelling pending operations");
        }

        (slots, halt)
    }

    async fn run_one<T, E, Fut>(&self, index: usize, operation: Fut) -> (usize, std::result::Result<T, E>)
    where
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        // This semaphore is never closed, so acquisition cannot fail.
        let _permit = self.semaphore.acquire().await.ok();
        let _active = ActiveTask::enter(&self.active);
        let timer = Timer::start();

        let result = operation.await;

        timer.observe_into(&self.durations);
        match &result {
            Ok(_) => self.completed.inc(),
            Err(_) => self.failed.inc(),
        }
        (index, result)
    }
}

/// Holds one unit of the active gauge for a running operation
struct ActiveTask<'a> {
    gauge: &'a Gauge,
}

impl<'a> ActiveTask<'a> {
    fn enter(gauge: &'a Gauge) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for ActiveTask<'_> {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
