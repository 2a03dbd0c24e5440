//! Pool behavior tests against an in-memory connection factory.
//!
//! Run with:
//! ```bash
//! cargo test -p sni-driver-pool --test pool
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sni_driver_pool::{
    Checkout, ConnectionFactory, IdentityProvider, OwnerToken, Pool, PoolConfig, PoolError,
    PoolGroup, PoolIdentity, PoolKey, PoolState, PooledObject,
};
use sni_transport::{Provider, SniErrorCode, TransportError};
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

// =============================================================================
// Mock factory
// =============================================================================

#[derive(Debug)]
struct MockConnection {
    serial: usize,
    alive: AtomicBool,
    poolable: bool,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl PooledObject for MockConnection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn can_be_pooled(&self) -> bool {
        self.poolable
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
struct Counters {
    created: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    unpoolable: Arc<AtomicBool>,
}

impl Counters {
    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockFactory {
    counters: Counters,
    delay: Duration,
    poolable: bool,
}

impl MockFactory {
    fn new(counters: &Counters) -> Self {
        Self {
            counters: counters.clone(),
            delay: Duration::from_millis(2),
            poolable: true,
        }
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn create(&self) -> Result<MockConnection, PoolError> {
        tokio::time::sleep(self.delay).await;
        if self.counters.fail.load(Ordering::SeqCst) {
            return Err(TransportError::new(
                Provider::Tcp,
                SniErrorCode::ConnOpenFailed,
                "connection refused",
            )
            .into());
        }
        let serial = self.counters.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockConnection {
            serial,
            alive: AtomicBool::new(true),
            poolable: self.poolable && !self.counters.unpoolable.load(Ordering::SeqCst),
            closed: Arc::clone(&self.counters.closed),
        })
    }
}

fn start(config: PoolConfig) -> (Pool<MockFactory>, Counters) {
    init_tracing();
    let counters = Counters::default();
    let pool = Pool::new(config, MockFactory::new(&counters)).unwrap();
    pool.startup();
    (pool, counters)
}

fn soon(ms: u64) -> Option<Instant> {
    Some(Instant::now() + Duration::from_millis(ms))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Drop a handle on a thread without a runtime, so it cannot be returned.
fn abandon<T: Send + 'static>(handle: T) {
    std::thread::spawn(move || drop(handle)).join().unwrap();
}

// =============================================================================
// Checkout and return
// =============================================================================

#[tokio::test]
async fn test_checkout_before_startup_fails() {
    let counters = Counters::default();
    let pool = Pool::new(PoolConfig::new(), MockFactory::new(&counters)).unwrap();
    assert_eq!(pool.state(), PoolState::Initializing);

    let err = pool.checkout(&OwnerToken::new(), None).await.unwrap_err();
    assert!(matches!(err, PoolError::PoolClosed));
}

#[tokio::test]
async fn test_checkout_and_release_reuses_connection() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(5));
    let owner = OwnerToken::new();

    let conn = pool.checkout(&owner, None).await.unwrap();
    let id = conn.id();
    assert_eq!(conn.serial, 1);
    assert_eq!(pool.status().checked_out, 1);
    conn.release().await;

    let status = pool.status();
    assert_eq!(status.idle_new, 1);
    assert_eq!(status.checked_out, 0);

    let again = pool.checkout(&owner, None).await.unwrap();
    assert_eq!(again.id(), id);
    assert_eq!(again.checkout_count(), 2);
    assert_eq!(counters.created(), 1);
}

#[tokio::test]
async fn test_dropped_handle_returns_connection() {
    let (pool, _) = start(PoolConfig::new().max_pool_size(2));
    let conn = pool.checkout(&OwnerToken::new(), None).await.unwrap();
    drop(conn);

    wait_for(|| pool.status().idle() == 1).await;
    assert_eq!(pool.status().checked_out, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_slot_serves_concurrent_checkouts() {
    let (pool, counters) = start(
        PoolConfig::new()
            .max_pool_size(1)
            .creation_timeout(Duration::from_secs(10)),
    );

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let owner = OwnerToken::new();
                let conn = pool.checkout(&owner, None).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                conn.release().await;
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(counters.created(), 1);
    let status = pool.status();
    assert_eq!(status.total, 1);
    assert_eq!(status.idle(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_status_invariants_under_load() {
    let (pool, _) = start(PoolConfig::new().max_pool_size(3));
    let done = Arc::new(AtomicBool::new(false));

    let sampler = {
        let pool = pool.clone();
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                let s = pool.status();
                assert_eq!(s.idle_new + s.idle_old + s.checked_out + s.creating, s.total);
                assert!(s.total <= 3, "tracked {} connections", s.total);
                tokio::task::yield_now().await;
            }
        })
    };

    let workers: Vec<_> = (0..12)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let owner = OwnerToken::new();
                for _ in 0..10 {
                    let conn = pool.checkout(&owner, soon(5_000)).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    conn.release().await;
                }
            })
        })
        .collect();
    for worker in workers {
        worker.await.unwrap();
    }
    done.store(true, Ordering::SeqCst);
    sampler.await.unwrap();

    let status = pool.status();
    assert_eq!(status.checked_out, 0);
    assert!(status.total <= 3);
}

#[tokio::test]
async fn test_checkout_times_out_at_capacity() {
    let (pool, _) = start(PoolConfig::new().max_pool_size(1));
    let held = pool.checkout(&OwnerToken::new(), None).await.unwrap();

    let started = Instant::now();
    let err = pool
        .checkout(&OwnerToken::new(), soon(50))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(50));
    drop(held);
}

#[tokio::test]
async fn test_handle_keeps_temporary_owner_alive() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(1));
    let held = pool.checkout(&OwnerToken::new(), None).await.unwrap();

    pool.run_cleanup_cycle().await;
    let err = pool
        .checkout(&OwnerToken::new(), soon(50))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(pool.status().checked_out, 1);
    assert_eq!(counters.created(), 1);

    held.release().await;
    assert_eq!(pool.status().idle(), 1);
}

#[tokio::test]
async fn test_waiter_gets_released_connection() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(1));
    let held = pool.checkout(&OwnerToken::new(), None).await.unwrap();
    let id = held.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let owner = OwnerToken::new();
            pool.checkout(&owner, soon(2_000)).await.map(|c| c.id())
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    held.release().await;

    assert_eq!(waiter.await.unwrap().unwrap(), id);
    assert_eq!(counters.created(), 1);
}

#[tokio::test]
async fn test_dead_idle_connection_is_replaced() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(2));
    let owner = OwnerToken::new();

    let conn = pool.checkout(&owner, None).await.unwrap();
    let first = conn.id();
    conn.alive.store(false, Ordering::SeqCst);
    conn.release().await;
    assert_eq!(pool.status().idle(), 1);

    let conn = pool.checkout(&owner, None).await.unwrap();
    assert_ne!(conn.id(), first);
    assert_eq!(counters.created(), 2);
    assert_eq!(counters.closed(), 1);
    assert_eq!(pool.status().total, 1);
}

// =============================================================================
// Dooming, clearing and shutdown
// =============================================================================

#[tokio::test]
async fn test_doomed_connection_is_destroyed_on_return() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(5));
    let conn = pool.checkout(&OwnerToken::new(), None).await.unwrap();
    assert_eq!(pool.status().total, 1);

    conn.doom();
    assert!(conn.is_doomed());
    conn.release().await;

    let status = pool.status();
    assert_eq!(status.total, 0);
    assert_eq!(status.idle(), 0);
    assert_eq!(counters.closed(), 1);
}

#[tokio::test]
async fn test_clear_destroys_idle_and_dooms_checked_out() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(5));
    let owner = OwnerToken::new();
    let kept = pool.checkout(&owner, None).await.unwrap();
    let idle = pool.checkout(&owner, None).await.unwrap();
    idle.release().await;
    assert_eq!(pool.status().idle(), 1);

    pool.clear().await;
    assert_eq!(counters.closed(), 1);
    assert!(kept.is_doomed());
    assert_eq!(pool.status().total, 1);

    kept.release().await;
    assert_eq!(counters.closed(), 2);
    assert_eq!(pool.status().total, 0);
}

#[tokio::test]
async fn test_shutdown_closes_idle_and_rejects_checkouts() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(5));
    let owner = OwnerToken::new();
    let out = pool.checkout(&owner, None).await.unwrap();
    let idle = pool.checkout(&owner, None).await.unwrap();
    idle.release().await;

    pool.shutdown().await;
    assert_eq!(pool.state(), PoolState::ShuttingDown);
    assert_eq!(counters.closed(), 1);

    let err = pool.checkout(&owner, None).await.unwrap_err();
    assert!(matches!(err, PoolError::PoolClosed));

    out.release().await;
    assert_eq!(counters.closed(), 2);
    assert_eq!(pool.status().total, 0);
}

#[tokio::test]
async fn test_shutdown_fails_pending_checkouts() {
    let (pool, _) = start(PoolConfig::new().max_pool_size(1));
    let owner = OwnerToken::new();
    let held = pool.checkout(&owner, None).await.unwrap();

    let Checkout::Pending(pending) = pool.try_checkout(&owner, soon(5_000)).await.unwrap() else {
        panic!("pool has no idle connection");
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    pool.shutdown().await;

    assert!(matches!(pending.await, Err(PoolError::PoolClosed)));
    drop(held);
}

// =============================================================================
// Creation failures and identity
// =============================================================================

#[tokio::test]
async fn test_factory_error_surfaces_and_releases_slot() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(1));
    counters.fail.store(true, Ordering::SeqCst);

    let err = pool.checkout(&OwnerToken::new(), soon(500)).await.unwrap_err();
    assert!(matches!(err, PoolError::Connection(ref e) if e.code == SniErrorCode::ConnOpenFailed));
    assert_eq!(pool.status().total, 0);

    counters.fail.store(false, Ordering::SeqCst);
    let conn = pool.checkout(&OwnerToken::new(), soon(500)).await.unwrap();
    assert_eq!(conn.serial, 1);
}

#[tokio::test]
async fn test_unpoolable_connection_is_internal_error() {
    init_tracing();
    let counters = Counters::default();
    let mut factory = MockFactory::new(&counters);
    factory.poolable = false;
    let pool = Pool::new(PoolConfig::new(), factory).unwrap();
    pool.startup();

    let err = pool.checkout(&OwnerToken::new(), soon(500)).await.unwrap_err();
    assert!(matches!(err, PoolError::Internal(_)));
    assert_eq!(counters.closed(), 1);
    assert_eq!(pool.status().total, 0);
}

#[derive(Debug, Default)]
struct SwitchableIdentity {
    other: AtomicBool,
}

impl IdentityProvider for SwitchableIdentity {
    fn current(&self) -> PoolIdentity {
        if self.other.load(Ordering::SeqCst) {
            PoolIdentity::user("S-1-5-21-200")
        } else {
            PoolIdentity::user("S-1-5-21-100")
        }
    }
}

#[derive(Debug)]
struct RestrictedIdentity;

impl IdentityProvider for RestrictedIdentity {
    fn current(&self) -> PoolIdentity {
        PoolIdentity::User {
            sid: "S-1-5-21-300".into(),
            restricted: true,
            network: false,
        }
    }
}

#[tokio::test]
async fn test_restricted_identity_cannot_be_pooled() {
    let counters = Counters::default();
    let config = PoolConfig::new().identity_provider(Arc::new(RestrictedIdentity));
    let err = Pool::new(config, MockFactory::new(&counters)).unwrap_err();
    assert!(matches!(err, PoolError::Internal(_)));
}

#[tokio::test]
async fn test_identity_change_stops_replenishment() {
    init_tracing();
    let identity = Arc::new(SwitchableIdentity::default());
    let counters = Counters::default();
    let config = PoolConfig::new()
        .min_pool_size(2)
        .max_pool_size(5)
        .identity_provider(Arc::clone(&identity) as Arc<dyn IdentityProvider>);
    let pool = Pool::new(config, MockFactory::new(&counters)).unwrap();
    assert_eq!(pool.identity(), &PoolIdentity::user("S-1-5-21-100"));

    identity.other.store(true, Ordering::SeqCst);
    pool.startup();
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.run_cleanup_cycle().await;
    assert_eq!(pool.status().total, 0);

    identity.other.store(false, Ordering::SeqCst);
    pool.run_cleanup_cycle().await;
    assert_eq!(pool.status().total, 2);
    assert_eq!(counters.created(), 2);
}

// =============================================================================
// Replenishment and emancipation
// =============================================================================

#[tokio::test]
async fn test_min_pool_size_after_replenishment_cycle() {
    let (pool, counters) = start(PoolConfig::new().min_pool_size(2).max_pool_size(5));
    wait_for(|| pool.status().idle() == 2).await;

    pool.run_cleanup_cycle().await;
    let status = pool.status();
    assert_eq!(status.idle(), 2);
    assert_eq!(status.idle_old, 2);
    assert_eq!(status.checked_out, 0);
    assert_eq!(status.total, 2);
    assert_eq!(counters.created(), 2);
}

#[tokio::test]
async fn test_cleanup_prunes_old_connections_above_minimum() {
    let (pool, counters) = start(PoolConfig::new().min_pool_size(1).max_pool_size(5));
    wait_for(|| pool.status().idle() == 1).await;
    let owner = OwnerToken::new();
    let conns = vec![
        pool.checkout(&owner, None).await.unwrap(),
        pool.checkout(&owner, None).await.unwrap(),
        pool.checkout(&owner, None).await.unwrap(),
    ];
    for conn in conns {
        conn.release().await;
    }
    assert_eq!(pool.status().idle_new, 3);

    // First cycle ages the new stack, the second prunes it.
    pool.run_cleanup_cycle().await;
    assert_eq!(pool.status().idle_old, 3);
    pool.run_cleanup_cycle().await;

    let status = pool.status();
    assert_eq!(status.total, 1);
    assert_eq!(status.idle(), 1);
    assert_eq!(counters.closed(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_connection_reclaimed_by_concurrent_checkout() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(1));

    let abandoned_owner = OwnerToken::new();
    let abandoned = pool.checkout(&abandoned_owner, None).await.unwrap();
    let id = abandoned.id();
    abandon(abandoned);
    assert_eq!(pool.status().checked_out, 1);
    drop(abandoned_owner);

    let owner = OwnerToken::new();
    let conn = pool.checkout(&owner, soon(2_000)).await.unwrap();
    assert_eq!(conn.id(), id);
    assert_eq!(counters.created(), 1);

    conn.release().await;
    assert_eq!(pool.status().idle(), 1);
}

#[tokio::test]
async fn test_cleanup_cycle_reclaims_abandoned_connection() {
    let (pool, _) = start(PoolConfig::new().max_pool_size(3));
    let owner = OwnerToken::new();
    let conn = pool.checkout(&owner, None).await.unwrap();
    abandon(conn);

    // Still owned while the caller keeps its token.
    pool.run_cleanup_cycle().await;
    assert_eq!(pool.status().checked_out, 1);

    drop(owner);
    pool.run_cleanup_cycle().await;
    let status = pool.status();
    assert_eq!(status.checked_out, 0);
    assert_eq!(status.idle(), 1);
}

// =============================================================================
// Asynchronous checkout
// =============================================================================

#[tokio::test]
async fn test_try_checkout_ready_and_pending() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(1));
    let owner = OwnerToken::new();

    let first = match pool.try_checkout(&owner, None).await.unwrap() {
        Checkout::Pending(pending) => pending.await.unwrap(),
        Checkout::Ready(_) => panic!("empty pool has nothing ready"),
    };
    let id = first.id();

    let pending = pool.try_checkout(&owner, soon(2_000)).await.unwrap();
    assert!(matches!(pending, Checkout::Pending(_)));
    first.release().await;
    let second = pending.wait().await.unwrap();
    assert_eq!(second.id(), id);
    second.release().await;

    let third = pool.try_checkout(&owner, None).await.unwrap();
    assert!(matches!(third, Checkout::Ready(ref c) if c.id() == id));
    assert_eq!(counters.created(), 1);
}

#[tokio::test]
async fn test_try_checkout_expires() {
    let (pool, _) = start(PoolConfig::new().max_pool_size(1));
    let owner = OwnerToken::new();
    let held = pool.checkout(&owner, None).await.unwrap();

    let pending = pool.try_checkout(&owner, soon(50)).await.unwrap();
    assert!(pending.wait().await.unwrap_err().is_timeout());
    drop(held);
}

#[tokio::test]
async fn test_dropped_pending_checkout_returns_connection() {
    let (pool, _) = start(PoolConfig::new().max_pool_size(1));
    let owner = OwnerToken::new();
    let held = pool.checkout(&owner, None).await.unwrap();

    let pending = pool.try_checkout(&owner, soon(2_000)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(pending);
    held.release().await;

    wait_for(|| {
        let status = pool.status();
        status.idle() == 1 && status.checked_out == 0
    })
    .await;
}

#[tokio::test]
async fn test_pending_checkouts_are_served_in_order() {
    let (pool, _) = start(PoolConfig::new().max_pool_size(1));
    let held = pool.checkout(&OwnerToken::new(), None).await.unwrap();

    let first_owner = OwnerToken::new();
    let second_owner = OwnerToken::new();
    let first = pool.try_checkout(&first_owner, soon(2_000)).await.unwrap();
    let second = pool.try_checkout(&second_owner, soon(2_000)).await.unwrap();
    held.release().await;

    let conn = first.wait().await.unwrap();
    let mut second = tokio_test::task::spawn(second.wait());
    tokio::time::sleep(Duration::from_millis(20)).await;
    tokio_test::assert_pending!(second.poll());

    conn.release().await;
    wait_for(|| second.is_woken()).await;
    tokio_test::assert_ready_ok!(second.poll()).release().await;
}

#[tokio::test]
async fn test_pending_checkout_replaces_dead_returned_connection() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(1));
    let owner = OwnerToken::new();
    let held = pool.checkout(&owner, None).await.unwrap();
    let dead = held.id();

    let pending = pool.try_checkout(&owner, soon(2_000)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    held.alive.store(false, Ordering::SeqCst);
    held.release().await;

    let conn = pending.wait().await.unwrap();
    assert_ne!(conn.id(), dead);
    assert!(conn.is_alive());
    assert_eq!(counters.created(), 2);
    assert_eq!(counters.closed(), 1);
}

// =============================================================================
// Replacement and groups
// =============================================================================

#[tokio::test]
async fn test_replace_connection_keeps_slot() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(1));
    let owner = OwnerToken::new();
    let old = pool.checkout(&owner, None).await.unwrap();
    let old_id = old.id();

    let new = pool.replace_connection(&owner, old).await.unwrap();
    assert_ne!(new.id(), old_id);
    assert_eq!(counters.created(), 2);
    assert_eq!(counters.closed(), 1);

    let status = pool.status();
    assert_eq!(status.total, 1);
    assert_eq!(status.checked_out, 1);
}

#[tokio::test]
async fn test_replace_failure_returns_old_connection() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(1));
    let owner = OwnerToken::new();
    let old = pool.checkout(&owner, None).await.unwrap();

    counters.fail.store(true, Ordering::SeqCst);
    let err = pool.replace_connection(&owner, old).await.unwrap_err();
    assert!(matches!(err, PoolError::Connection(_)));

    let status = pool.status();
    assert_eq!(status.total, 1);
    assert_eq!(status.idle(), 1);
}

#[tokio::test]
async fn test_unpoolable_replacement_returns_old_connection() {
    let (pool, counters) = start(PoolConfig::new().max_pool_size(1));
    let owner = OwnerToken::new();
    let old = pool.checkout(&owner, None).await.unwrap();
    let old_id = old.id();

    counters.unpoolable.store(true, Ordering::SeqCst);
    let err = pool.replace_connection(&owner, old).await.unwrap_err();
    assert!(matches!(err, PoolError::Internal(_)));
    assert_eq!(counters.closed(), 1);

    let status = pool.status();
    assert_eq!(status.total, 1);
    assert_eq!(status.idle(), 1);
    assert_eq!(status.checked_out, 0);

    counters.unpoolable.store(false, Ordering::SeqCst);
    let conn = pool.checkout(&owner, soon(500)).await.unwrap();
    assert_eq!(conn.id(), old_id);
}

#[tokio::test]
async fn test_pool_group_shares_pools_by_key() {
    init_tracing();
    let group = PoolGroup::new();
    let counters = Counters::default();
    let built = AtomicUsize::new(0);
    let config = PoolConfig::new().max_pool_size(2);
    let factory = || {
        built.fetch_add(1, Ordering::SeqCst);
        MockFactory::new(&counters)
    };

    let key = PoolKey::new("tcp:db,1433").with_user("app");
    let a = group.get_or_create(&key, &config, factory).unwrap();
    let b = group.get_or_create(&key, &config, factory).unwrap();
    assert!(a.is_running());
    assert_eq!(built.load(Ordering::SeqCst), 1);

    let conn = a.checkout(&OwnerToken::new(), None).await.unwrap();
    let id = conn.id();
    conn.release().await;
    assert_eq!(b.status().idle(), 1);
    assert_eq!(b.checkout(&OwnerToken::new(), None).await.unwrap().id(), id);

    let other = PoolKey::new("tcp:db,1433").with_user("report");
    group.get_or_create(&other, &config, factory).unwrap();
    assert_eq!(group.len(), 2);
    assert!(group.clear(&other).await);
    assert!(!group.clear(&PoolKey::new("tcp:nowhere")).await);

    group.shutdown_all().await;
    assert!(group.is_empty());
    assert_eq!(a.state(), PoolState::ShuttingDown);
}

#[tokio::test]
async fn test_pool_group_clear_all() {
    let group = PoolGroup::new();
    let counters = Counters::default();
    let config = PoolConfig::new();

    let pool = group
        .get_or_create(&PoolKey::new("db"), &config, || MockFactory::new(&counters))
        .unwrap();
    pool.checkout(&OwnerToken::new(), None)
        .await
        .unwrap()
        .release()
        .await;
    assert_eq!(pool.status().idle(), 1);

    group.clear_all().await;
    assert_eq!(pool.status().total, 0);
    assert_eq!(counters.closed(), 1);

    assert!(group.remove(&PoolKey::new("db")).await);
    assert!(group.get(&PoolKey::new("db")).is_none());
}
