//! Error types for careguard-core
//!
//! Component constructors and the pool report [`Error`]. Wrapped operations keep
//! their own error type; the breaker and batcher return small generic enums
//! around it so callers can tell a fast-fail from the operation's own failure.

use crate::circuit_breaker::CircuitState;
use std::time::Duration;
use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid component configuration
    #[error("invalid configuration: {field}: {message}")]
    Validation {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },

    /// Call rejected by an open circuit breaker
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Operation exceeded its time bound
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// No pooled resource became available in time
    #[error("resource pool exhausted: nothing available within {waited:?}")]
    PoolExhausted {
        /// How long the caller waited
        waited: Duration,
    },

    /// Pool used before `initialize()`
    #[error("resource pool is not initialized")]
    PoolNotInitialized,

    /// Pool used after `close()`
    #[error("resource pool is closed")]
    PoolClosed,

    /// The resource factory failed during pool initialization
    #[error("failed to create pooled resource: {0}")]
    ResourceCreation(#[source] anyhow::Error),
}

impl Error {
    /// Build a validation error for a config field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a fast-fail from an open breaker
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Whether this error is a timeout of any kind
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::PoolExhausted { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Fast-fail raised while a breaker is open or its half-open budget is spent
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{name}' is {state}, call rejected")]
pub struct CircuitOpenError {
    /// Breaker name
    pub name: String,
    /// State at rejection time
    pub state: CircuitState,
    /// Time until the breaker will admit a probe, if known
    pub retry_after: Option<Duration>,
}

/// Outcome of a failed breaker-guarded call
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation
    #[error(transparent)]
    Open(CircuitOpenError),

    /// The per-call time bound elapsed
    #[error("guarded call timed out after {0:?}")]
    TimedOut(Duration),

    /// The operation itself failed
    #[error("guarded call failed: {0}")]
    Failed(E),
}

impl<E> BreakerError<E> {
    /// Whether the call was rejected by the breaker
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// The operation's own error, if that is what failed
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcome of a failed batch
#[derive(Debug, Error)]
pub enum BatchError<E> {
    /// The batch deadline elapsed; unfinished tasks were cancelled
    #[error("batch deadline of {0:?} elapsed")]
    Timeout(Duration),

    /// A task failed (fail-fast mode)
    #[error("batch task {index} failed: {error}")]
    Task {
        /// Position of the task in the input
        index: usize,
        /// The task's error
        error: E,
    },
}
