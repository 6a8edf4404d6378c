use super::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio_test::assert_ok;

/// Test connection handing out sequential ids
#[derive(Debug)]
struct Conn {
    serial: usize,
    in_use: Arc<AtomicBool>,
}

#[derive(Default)]
struct ConnFactory {
    created: AtomicUsize,
    closed: Arc<AtomicUsize>,
    /// Fail the n-th creation (1-based)
    fail_on: Option<usize>,
    fail_close: bool,
}

#[async_trait]
impl ResourceFactory<Conn> for ConnFactory {
    async fn create(&self) -> anyhow::Result<Conn> {
        let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(serial) {
            anyhow::bail!("connection {serial} refused");
        }
        Ok(Conn {
            serial,
            in_use: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn close(&self, _conn: Conn) -> anyhow::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            anyhow::bail!("close failed");
        }
        Ok(())
    }
}

async fn ready_pool(size: usize) -> (ResourcePool<Conn>, Arc<AtomicUsize>) {
    let factory = ConnFactory::default();
    let closed = factory.closed.clone();
    let pool = ResourcePool::<Conn>::new(
        PoolConfig::new()
            .with_max_size(size)
            .with_acquire_timeout(Duration::from_millis(200)),
        factory,
    )
    .unwrap();
    pool.initialize().await.unwrap();
    (pool, closed)
}

#[test]
fn test_config_defaults() {
    let config = PoolConfig::default();
    assert_eq!(config.max_size, 10);
    assert_eq!(config.acquire_timeout, Duration::from_secs(30));
}

#[test]
fn test_invalid_config_rejected() {
    assert!(ResourcePool::<Conn>::new(PoolConfig::new().with_max_size(0), ConnFactory::default()).is_err());
    assert!(ResourcePool::<Conn>::new(
        PoolConfig::new().with_acquire_timeout(Duration::ZERO),
        ConnFactory::default()
    )
    .is_err());
}

#[tokio::test]
async fn test_initialize_creates_every_resource() {
    let (pool, _) = ready_pool(3).await;

    let stats = pool.stats();
    assert_eq!(stats.max_size, 3);
    assert_eq!(stats.available, 3);
    assert_eq!(stats.leased, 0);
    assert!(!stats.closed);

    // Second call is a no-op
    assert_ok!(pool.initialize().await);
    assert_eq!(pool.stats().available, 3);
}

#[tokio::test]
async fn test_acquire_before_initialize() {
    let pool = ResourcePool::<Conn>::new(PoolConfig::default(), ConnFactory::default()).unwrap();
    assert!(matches!(pool.acquire().await, Err(Error::PoolNotInitialized)));
    assert!(matches!(pool.try_acquire(), Err(Error::PoolNotInitialized)));
}

#[tokio::test]
async fn test_partial_initialize_failure_tears_down() {
    let factory = ConnFactory {
        fail_on: Some(3),
        ..ConnFactory::default()
    };
    let closed = factory.closed.clone();
    let pool = ResourcePool::<Conn>::new(PoolConfig::new().with_max_size(5), factory).unwrap();

    let result = pool.initialize().await;
    match result {
        Err(Error::ResourceCreation(e)) => assert!(e.to_string().contains("refused")),
        other => panic!("expected creation failure, got {other:?}"),
    }

    // The two resources created before the failure were closed
    assert_eq!(closed.load(Ordering::SeqCst), 2);
    assert_eq!(pool.stats().available, 0);
    assert!(matches!(pool.try_acquire(), Err(Error::PoolNotInitialized)));
}

#[tokio::test]
async fn test_release_on_drop() {
    let (pool, _) = ready_pool(2).await;

    {
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.serial, b.serial);
        assert_eq!(pool.stats().leased, 2);
        assert!(matches!(pool.try_acquire(), Err(Error::PoolExhausted { .. })));
    }

    let stats = pool.stats();
    assert_eq!(stats.available, 2);
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.acquisitions, 2);
}

#[tokio::test]
async fn test_release_on_error_path() {
    let (pool, _) = ready_pool(1).await;

    async fn failing_query(pool: &ResourcePool<Conn>) -> Result<()> {
        let _conn = pool.acquire().await?;
        Err(Error::Timeout(Duration::from_millis(5)))
    }

    assert!(failing_query(&pool).await.is_err());
    assert_eq!(pool.stats().available, 1);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_times_out_when_exhausted() {
    let (pool, _) = ready_pool(1).await;
    let _held = pool.acquire().await.unwrap();

    let result = pool.acquire_timeout(Duration::from_millis(50)).await;
    assert!(
        matches!(result, Err(Error::PoolExhausted { waited }) if waited == Duration::from_millis(50))
    );
    assert_eq!(pool.stats().timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_receives_released_resource() {
    let (pool, _) = ready_pool(1).await;
    let held = pool.acquire().await.unwrap();
    let held_id = held.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|conn| conn.id()) })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);

    assert_eq!(waiter.await.unwrap().unwrap(), held_id);
    assert_eq!(pool.stats().available, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_acquire_leaks_nothing() {
    let (pool, _) = ready_pool(1).await;
    let held = pool.acquire().await.unwrap();

    {
        let waiting = pool.acquire();
        tokio::pin!(waiting);
        assert!(futures::poll!(waiting.as_mut()).is_pending());
    }

    drop(held);
    let stats = pool.stats();
    assert_eq!(stats.available, 1);
    assert_eq!(stats.leased, 0);
    assert_ok!(pool.try_acquire());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_resource_is_leased_twice() {
    let (pool, _) = ready_pool(3).await;
    let violations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let pool = pool.clone();
        let violations = violations.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..10 {
                let conn = pool.acquire_timeout(Duration::from_secs(5)).await.unwrap();
                if conn.in_use.swap(true, Ordering::SeqCst) {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
                conn.in_use.store(false, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    let stats = pool.stats();
    assert_eq!(stats.available, 3);
    assert_eq!(stats.acquisitions, 320);
}

#[tokio::test]
async fn test_close_disposes_resources() {
    let factory = ConnFactory {
        fail_close: true,
        ..ConnFactory::default()
    };
    let closed = factory.closed.clone();
    let pool = ResourcePool::<Conn>::new(PoolConfig::new().with_max_size(3), factory).unwrap();
    pool.initialize().await.unwrap();

    let leased = pool.acquire().await.unwrap();
    // Close failures are logged, not raised
    pool.close().await;
    assert_eq!(closed.load(Ordering::SeqCst), 2);
    let stats = pool.stats();
    assert!(stats.closed);
    assert_eq!(stats.available, 0);
    // The outstanding guard is still reported until it drops
    assert_eq!(stats.leased, 1);
    assert!(matches!(pool.acquire().await, Err(Error::PoolClosed)));
    assert!(matches!(pool.initialize().await, Err(Error::PoolClosed)));

    // Late returns are disposed of instead of pooled
    drop(leased);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(closed.load(Ordering::SeqCst), 3);
    assert_eq!(pool.stats().available, 0);
    assert_eq!(pool.stats().leased, 0);

    // Closing twice is harmless
    pool.close().await;
    assert_eq!(closed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_resource_is_mutable_through_guard() {
    let (pool, _) = ready_pool(1).await;

    {
        let mut conn = pool.acquire().await.unwrap();
        conn.serial = 99;
    }

    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.serial, 99);
    assert_eq!(conn.id(), 0);
}
