//! Fixed-size async resource pool
//!
//! Resources are created up front by a [`ResourceFactory`] and leased through
//! [`PooledResource`] guards that hand them back when dropped, whatever the
//! exit path. A semaphore whose permits mirror the idle set lets callers wait
//! for a resource with a bounded timeout.

use crate::error::{Error, Result};
use crate::metrics::{Counter, Gauge, LatencyMean, Timer};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

/// Creates and disposes of pooled resources
#[async_trait]
pub trait ResourceFactory<R: Send + 'static>: Send + Sync {
    /// Create one resource
    async fn create(&self) -> anyhow::Result<R>;

    /// Dispose of a resource when the pool shuts down
    async fn close(&self, _resource: R) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Configuration for the pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of resources created by `initialize`
    pub max_size: usize,
    /// How long `acquire` waits for an idle resource
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool size
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the acquire timeout
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 || self.max_size > Semaphore::MAX_PERMITS {
            return Err(Error::validation(
                "pool.max_size",
                format!("must be within 1..={}", Semaphore::MAX_PERMITS),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(Error::validation(
                "pool.acquire_timeout",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Configured size
    pub max_size: usize,
    /// Idle resources
    pub available: usize,
    /// Resources currently held by callers
    pub leased: usize,
    /// Successful acquisitions
    pub acquisitions: u64,
    /// Acquisitions that gave up waiting
    pub timeouts: u64,
    /// Mean wait before a successful acquisition
    pub avg_wait_ms: f64,
    /// Whether `close()` has run
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Ready,
    Closed,
}

struct Slot<R> {
    id: usize,
    resource: R,
}

struct PoolState<R> {
    lifecycle: Lifecycle,
    idle: VecDeque<Slot<R>>,
}

struct PoolInner<R: Send + 'static> {
    config: PoolConfig,
    factory: Arc<dyn ResourceFactory<R>>,
    state: Mutex<PoolState<R>>,
    /// One permit per idle resource
    idle_permits: Semaphore,
    /// Serializes `initialize` and `close`
    lifecycle_gate: tokio::sync::Mutex<()>,
    acquisitions: Counter,
    timeouts: Counter,
    waits: LatencyMean,
    /// Guards alive, including those outliving `close()`
    leased: Gauge,
}

/// Fixed-size pool of pre-created resources
///
/// Cloning yields another handle to the same pool.
pub struct ResourcePool<R: Send + 'static> {
    inner: Arc<PoolInner<R>>,
}

impl<R: Send + 'static> Clone for ResourcePool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Send + 'static> fmt::Debug for ResourcePool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<R: Send + 'static> ResourcePool<R> {
    /// Create an empty pool; call [`initialize`](Self::initialize) before use
    pub fn new<F>(config: PoolConfig, factory: F) -> Result<Self>
    where
        F: ResourceFactory<R> + 'static,
    {
        Self::with_factory(config, Arc::new(factory))
    }

    /// Create an empty pool around a shared factory
    pub fn with_factory(config: PoolConfig, factory: Arc<dyn ResourceFactory<R>>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    lifecycle: Lifecycle::Uninitialized,
                    idle: VecDeque::with_capacity(config.max_size),
                }),
                idle_permits: Semaphore::new(0),
                lifecycle_gate: tokio::sync::Mutex::new(()),
                acquisitions: Counter::new(),
                timeouts: Counter::new(),
                waits: LatencyMean::new(),
                leased: Gauge::new(),
                factory,
                config,
            }),
        })
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Create all `max_size` resources
    ///
    /// If any creation fails, the resources created so far are closed and the
    /// factory error is returned. Calling this on a ready pool is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        let _gate = inner.lifecycle_gate.lock().await;

        match inner.lock().lifecycle {
            Lifecycle::Ready => return Ok(()),
            Lifecycle::Closed => return Err(Error::PoolClosed),
            Lifecycle::Uninitialized => {}
        }

        let size = inner.config.max_size;
        let mut created = Vec::with_capacity(size);
        for id in 0..size {
            match inner.factory.create().await {
                Ok(resource) => created.push(Slot { id, resource }),
                Err(e) => {
                    warn!(
                        created = created.len(),
                        max_size = size,
                        error = %e,
                        "Resource creation failed, tearing down partial pool"
                    );
                    for slot in created {
                        inner.dispose(slot).await;
                    }
                    return Err(Error::ResourceCreation(e));
                }
            }
        }

        {
            let mut state = inner.lock();
            state.idle.extend(created);
            state.lifecycle = Lifecycle::Ready;
        }
        inner.idle_permits.add_permits(size);

        info!(max_size = size, "Resource pool initialized");
        Ok(())
    }

    /// Lease a resource, waiting up to the configured acquire timeout
    pub async fn acquire(&self) -> Result<PooledResource<R>> {
        self.acquire_timeout(self.inner.config.acquire_timeout).await
    }

    /// Lease a resource, waiting up to `timeout`
    ///
    /// Dropping the returned future while it waits leaves the pool untouched.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledResource<R>> {
        let inner = &self.inner;
        inner.ensure_ready()?;

        let timer = Timer::start();
        let permit = match tokio::time::timeout(timeout, inner.idle_permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::PoolClosed),
            Err(_) => {
                inner.timeouts.inc();
                debug!(timeout_ms = timeout.as_millis() as u64, "Pool acquire timed out");
                return Err(Error::PoolExhausted { waited: timeout });
            }
        };

        let slot = inner.take_idle()?;
        // The permit now travels with the lease and is restored on release.
        permit.forget();
        timer.observe_into(&inner.waits);
        Ok(self.lease(slot))
    }

    /// Lease a resource only if one is idle right now
    pub fn try_acquire(&self) -> Result<PooledResource<R>> {
        let inner = &self.inner;
        inner.ensure_ready()?;

        let permit = match inner.idle_permits.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(Error::PoolClosed),
            Err(TryAcquireError::NoPermits) => {
                return Err(Error::PoolExhausted {
                    waited: Duration::ZERO,
                })
            }
        };

        let slot = inner.take_idle()?;
        permit.forget();
        Ok(self.lease(slot))
    }

    /// Dispose of every idle resource and refuse further leases
    ///
    /// Resources still leased are disposed of when their guards drop. Dispose
    /// failures are logged and do not stop the shutdown.
    pub async fn close(&self) {
        let inner = &self.inner;
        let _gate = inner.lifecycle_gate.lock().await;

        inner.idle_permits.close();
        let idle: Vec<Slot<R>> = {
            let mut state = inner.lock();
            if state.lifecycle == Lifecycle::Closed {
                return;
            }
            state.lifecycle = Lifecycle::Closed;
            state.idle.drain(..).collect()
        };

        let closed = idle.len();
        for slot in idle {
            inner.dispose(slot).await;
        }
        info!(
            closed = closed,
            leased = inner.leased.get(),
            "Resource pool closed"
        );
    }

    /// Pool statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let (available, lifecycle) = {
            let state = inner.lock();
            (state.idle.len(), state.lifecycle)
        };

        PoolStats {
            max_size: inner.config.max_size,
            available,
            leased: usize::try_from(inner.leased.get()).unwrap_or(0),
            acquisitions: inner.acquisitions.get(),
            timeouts: inner.timeouts.get(),
            avg_wait_ms: inner.waits.mean_ms(),
            closed: lifecycle == Lifecycle::Closed,
        }
    }

    fn lease(&self, slot: Slot<R>) -> PooledResource<R> {
        self.inner.acquisitions.inc();
        self.inner.leased.inc();
        debug!(resource_id = slot.id, "Resource leased");
        PooledResource {
            slot: Some(slot),
            pool: self.inner.clone(),
        }
    }
}

impl<R: Send + 'static> PoolInner<R> {
    fn lock(&self) -> MutexGuard<'_, PoolState<R>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.lock().lifecycle {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Uninitialized => Err(Error::PoolNotInitialized),
            Lifecycle::Closed => Err(Error::PoolClosed),
        }
    }

    /// Pop an idle resource; the caller already holds its permit
    fn take_idle(&self) -> Result<Slot<R>> {
        let mut state = self.lock();
        if state.lifecycle == Lifecycle::Closed {
            return Err(Error::PoolClosed);
        }
        state.idle.pop_front().ok_or(Error::PoolClosed)
    }

    fn release(&self, slot: Slot<R>) {
        self.leased.dec();
        let mut state = self.lock();
        if state.lifecycle == Lifecycle::Closed {
            drop(state);
            self.dispose_detached(slot);
            return;
        }
        debug!(resource_id = slot.id, "Resource returned");
        state.idle.push_back(slot);
        drop(state);
        self.idle_permits.add_permits(1);
    }

    async fn dispose(&self, slot: Slot<R>) {
        if let Err(e) = self.factory.close(slot.resource).await {
            warn!(resource_id = slot.id, error = %e, "Failed to close pooled resource");
        }
    }

    /// Dispose of a resource returned after shutdown, outside any async context
    fn dispose_detached(&self, slot: Slot<R>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(resource_id = slot.id, "No runtime to close returned resource, dropping it");
            return;
        };
        let factory = self.factory.clone();
        handle.spawn(async move {
            if let Err(e) = factory.close(slot.resource).await {
                warn!(resource_id = slot.id, error = %e, "Failed to close pooled resource");
            }
        });
    }
}

/// A leased resource, returned to its pool on drop
pub struct PooledResource<R: Send + 'static> {
    slot: Option<Slot<R>>,
    pool: Arc<PoolInner<R>>,
}

impl<R: Send + 'static> PooledResource<R> {
    /// Stable index of the resource within its pool
    #[must_use]
    pub fn id(&self) -> usize {
        self.slot().id
    }

    fn slot(&self) -> &Slot<R> {
        match &self.slot {
            Some(slot) => slot,
            None => unreachable!("pooled resource used after release"),
        }
    }
}

impl<R: Send + 'static> Deref for PooledResource<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.slot().resource
    }
}

impl<R: Send + 'static> DerefMut for PooledResource<R> {
    fn deref_mut(&mut self) -> &mut R {
        match &mut self.slot {
            Some(slot) => &mut slot.resource,
            None => unreachable!("pooled resource used after release"),
        }
    }
}

impl<R: Send + 'static> Drop for PooledResource<R> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot);
        }
    }
}

impl<R: Send + fmt::Debug + 'static> fmt::Debug for PooledResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("id", &self.id())
            .field("resource", &**self)
            .finish()
    }
}

#[cfg(test)]
mod tests;
