//! Connection pool implementation.
//!
//! Idle connections live on two stacks. Returned connections go on the "new"
//! stack; every replenishment cycle moves the "new" stack onto the "old" one
//! and prunes "old" connections above the minimum size, so a connection that
//! sat idle through a whole cycle is closed first.
//!
//! A checkout races two semaphores: the idle inventory (one permit per idle
//! connection) and the single creation permit. Idle inventory wins when both
//! are ready.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{Semaphore, oneshot};
use tokio::time::{Instant, MissedTickBehavior, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::identity::PoolIdentity;
use crate::lifecycle::{
    ConnectionFactory, ConnectionMetadata, ConnectionState, OwnerToken, PooledObject,
};

type Conn<F> = <F as ConnectionFactory>::Connection;
type Object<F> = Arc<PoolObject<Conn<F>>>;
type Delivery<F> = oneshot::Sender<Result<PooledConnection<F>, PoolError>>;

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Created, not started.
    Initializing,
    /// Accepting checkouts and creating connections.
    Running,
    /// Stopped; returned connections are closed.
    ShuttingDown,
}

/// Status information about the pool.
///
/// `idle_new + idle_old + checked_out + creating == total` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Connections on the "new" idle stack.
    pub idle_new: usize,
    /// Connections on the "old" idle stack.
    pub idle_old: usize,
    /// Connections handed out (or on their way back).
    pub checked_out: usize,
    /// Connections being opened.
    pub creating: usize,
    /// Total number of tracked connections.
    pub total: usize,
    /// Maximum allowed connections (0 for unbounded).
    pub max: u32,
}

impl PoolStatus {
    /// Idle connections on either stack.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.idle_new + self.idle_old
    }
}

// =============================================================================
// Tracked objects
// =============================================================================

pub(crate) struct PoolObject<C> {
    id: u64,
    connection: C,
    meta: Mutex<ConnectionMetadata>,
}

struct ObjectList<C> {
    objects: Vec<Arc<PoolObject<C>>>,
    creating: usize,
}

impl<C> ObjectList<C> {
    fn tracked(&self) -> usize {
        self.objects.len() + self.creating
    }

    fn remove(&mut self, id: u64) -> bool {
        match self.objects.iter().position(|o| o.id == id) {
            Some(index) => {
                self.objects.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

/// A slot reserved for a connection being opened.
///
/// Dropping an uncommitted reservation releases the slot and puts back the
/// connection it was replacing.
struct Reservation<'a, C> {
    list: &'a Mutex<ObjectList<C>>,
    replaced: Option<Arc<PoolObject<C>>>,
    armed: bool,
}

impl<C> Reservation<'_, C> {
    fn commit(mut self, object: Arc<PoolObject<C>>) {
        let mut list = self.list.lock();
        list.creating -= 1;
        list.objects.push(object);
        self.armed = false;
    }
}

impl<C> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut list = self.list.lock();
        list.creating -= 1;
        if let Some(old) = self.replaced.take() {
            list.objects.push(old);
        }
    }
}

struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct PendingRequest<F: ConnectionFactory> {
    owner: OwnerToken,
    deadline: Option<Instant>,
    tx: Delivery<F>,
}

enum Acquired<'a> {
    Idle(tokio::sync::SemaphorePermit<'a>),
    Create(tokio::sync::SemaphorePermit<'a>),
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Pool
// =============================================================================

struct PoolInner<F: ConnectionFactory> {
    config: PoolConfig,
    factory: F,
    identity: PoolIdentity,
    state: Mutex<PoolState>,
    list: Mutex<ObjectList<Conn<F>>>,
    idle_new: Mutex<Vec<Object<F>>>,
    idle_old: Mutex<Vec<Object<F>>>,
    inventory: Semaphore,
    creation: Semaphore,
    pending: Mutex<VecDeque<PendingRequest<F>>>,
    draining: AtomicBool,
    waiting: AtomicUsize,
    next_id: AtomicU64,
    timer: CancellationToken,
}

impl<F: ConnectionFactory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        self.timer.cancel();
    }
}

/// A pool of physical connections created by a [`ConnectionFactory`].
///
/// Cloning is cheap; clones share the same pool.
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a pool bound to the identity current at this call.
    ///
    /// The pool starts in [`PoolState::Initializing`]; call
    /// [`startup`](Self::startup) before checking out connections.
    pub fn new(config: PoolConfig, factory: F) -> Result<Self, PoolError> {
        config.validate()?;
        let identity = config.identity_provider.current();
        identity.ensure_poolable()?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                identity,
                state: Mutex::new(PoolState::Initializing),
                list: Mutex::new(ObjectList {
                    objects: Vec::new(),
                    creating: 0,
                }),
                idle_new: Mutex::new(Vec::new()),
                idle_old: Mutex::new(Vec::new()),
                inventory: Semaphore::new(0),
                creation: Semaphore::new(1),
                pending: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                waiting: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                timer: CancellationToken::new(),
            }),
        })
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The identity the pool was created under.
    #[must_use]
    pub fn identity(&self) -> &PoolIdentity {
        &self.inner.identity
    }

    /// The factory that opens this pool's connections.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        *self.inner.state.lock()
    }

    /// Whether the pool accepts checkouts.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let list = self.inner.list.lock();
        let mut status = PoolStatus {
            creating: list.creating,
            total: list.tracked(),
            max: self.inner.config.max_pool_size,
            ..PoolStatus::default()
        };
        for object in &list.objects {
            match object.meta.lock().state {
                ConnectionState::Creating => status.creating += 1,
                ConnectionState::IdleNew => status.idle_new += 1,
                ConnectionState::IdleOld => status.idle_old += 1,
                ConnectionState::CheckedOut => status.checked_out += 1,
            }
        }
        status
    }

    /// Start the pool: accept checkouts, start the replenishment timer and
    /// open connections up to the minimum size in the background.
    ///
    /// Must be called within a tokio runtime. Starting twice does nothing.
    pub fn startup(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state != PoolState::Initializing {
                return;
            }
            *state = PoolState::Running;
        }

        let period = rand::thread_rng().gen_range(self.inner.config.cleanup_interval_range.clone());
        tokio::spawn(cleanup_timer(
            Arc::downgrade(&self.inner),
            period,
            self.inner.timer.clone(),
        ));
        tracing::debug!(
            min = self.inner.config.min_pool_size,
            max = self.inner.config.max_pool_size,
            ?period,
            "connection pool started"
        );

        if self.need_to_replenish() {
            self.queue_create_request();
        }
    }

    /// Stop the pool.
    ///
    /// Pending checkouts fail with [`PoolError::PoolClosed`], idle connections
    /// are closed, and checked-out connections are closed when returned.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == PoolState::ShuttingDown {
                return;
            }
            *state = PoolState::ShuttingDown;
        }
        self.inner.timer.cancel();
        self.inner.inventory.close();
        self.inner.creation.close();

        let pending: Vec<_> = self.inner.pending.lock().drain(..).collect();
        for request in pending {
            let _ = request.tx.send(Err(PoolError::PoolClosed));
        }

        let idle = self.drain_idle();
        for object in &idle {
            self.destroy(object).await;
        }
        tracing::info!(closed = idle.len(), "connection pool shut down");
    }

    /// Check out a connection, waiting until `deadline`.
    ///
    /// Without a deadline the configured creation timeout applies. The
    /// connection is bound to `owner` and the handle holds a clone of it. A
    /// handle that is dropped where it cannot return the connection leaves it
    /// abandoned; the pool reclaims it once every other clone of `owner` is
    /// gone too.
    pub async fn checkout(
        &self,
        owner: &OwnerToken,
        deadline: Option<Instant>,
    ) -> Result<PooledConnection<F>, PoolError> {
        let deadline = deadline.or_else(|| self.default_deadline());
        tracing::trace!(owner = owner.id(), "checking out connection");
        self.get_connection(owner, deadline, true, true).await
    }

    /// Check out an idle connection without waiting, or queue a request.
    ///
    /// When no idle connection is available right now, the returned
    /// [`PendingCheckout`] completes once a background task obtains one or
    /// `deadline` passes. Dropping it cancels delivery; a connection obtained
    /// for a dropped request goes back to the pool.
    pub async fn try_checkout(
        &self,
        owner: &OwnerToken,
        deadline: Option<Instant>,
    ) -> Result<Checkout<F>, PoolError> {
        match self
            .get_connection(owner, Some(Instant::now()), false, true)
            .await
        {
            Ok(connection) => return Ok(Checkout::Ready(connection)),
            Err(PoolError::Timeout) => {}
            Err(e) => return Err(e),
        }

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().push_back(PendingRequest {
            owner: owner.clone(),
            deadline: deadline.or_else(|| self.default_deadline()),
            tx,
        });
        tracing::trace!(owner = owner.id(), "checkout queued");
        self.start_drain();
        Ok(Checkout::Pending(PendingCheckout { rx }))
    }

    /// Open a new connection for `owner` in place of `old`.
    ///
    /// The old connection is closed and its slot goes to the new one, so this
    /// works at full capacity. If opening fails, `old` goes back to the pool.
    pub async fn replace_connection(
        &self,
        owner: &OwnerToken,
        old: PooledConnection<F>,
    ) -> Result<PooledConnection<F>, PoolError> {
        let (old, lease) = old.into_parts();
        if !self.is_running() {
            self.return_object(old, lease).await;
            return Err(PoolError::PoolClosed);
        }
        if old.meta.lock().lease != lease {
            return Err(PoolError::internal(
                "connection was reclaimed before it could be replaced",
            ));
        }

        let object = match self.create_object(Some(&old)).await {
            Ok(Some(object)) => object,
            Ok(None) => return Err(PoolError::internal("replacement slot unavailable")),
            Err(e) => {
                self.return_object(old, lease).await;
                return Err(e);
            }
        };

        old.meta.lock().mark_returning();
        old.connection.deactivate().await;
        old.connection.close().await;
        tracing::debug!(old = old.id, new = object.id, "connection replaced");

        self.prepare_connection(owner, object).await
    }

    /// Doom every connection, close idle ones and reclaim abandoned ones.
    ///
    /// Checked-out connections are closed when they come back.
    pub async fn clear(&self) {
        {
            let list = self.inner.list.lock();
            for object in &list.objects {
                object.meta.lock().doomed = true;
            }
        }
        let idle = self.drain_idle();
        for object in &idle {
            self.destroy(object).await;
        }
        self.reclaim_emancipated().await;
        tracing::debug!(closed = idle.len(), "connection pool cleared");
    }

    /// Run one replenishment cycle.
    ///
    /// Prunes "old" idle connections above the minimum size, ages the "new"
    /// stack into the "old" one, reclaims abandoned connections and tops the
    /// pool up to its minimum size. The background timer calls this
    /// periodically.
    pub async fn run_cleanup_cycle(&self) {
        let min = self.inner.config.min_pool_size as usize;
        while self.tracked() > min {
            let Ok(permit) = self.inner.inventory.try_acquire() else {
                break;
            };
            let popped = self.inner.idle_old.lock().pop();
            let Some(object) = popped else {
                break;
            };
            permit.forget();
            tracing::debug!(connection = object.id, "pruning idle connection");
            self.destroy(&object).await;
        }

        {
            let mut new = self.inner.idle_new.lock();
            let mut old = self.inner.idle_old.lock();
            for object in new.drain(..) {
                object.meta.lock().state = ConnectionState::IdleOld;
                old.push(object);
            }
        }

        self.pool_create_request().await;
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    fn default_deadline(&self) -> Option<Instant> {
        let timeout = self.inner.config.creation_timeout;
        (!timeout.is_zero()).then(|| Instant::now() + timeout)
    }

    fn tracked(&self) -> usize {
        self.inner.list.lock().tracked()
    }

    async fn get_connection(
        &self,
        owner: &OwnerToken,
        deadline: Option<Instant>,
        allow_create: bool,
        only_one_check: bool,
    ) -> Result<PooledConnection<F>, PoolError> {
        if !self.is_running() {
            return Err(PoolError::PoolClosed);
        }
        match self
            .acquire(deadline, allow_create, only_one_check)
            .await?
        {
            Some(object) => self.prepare_connection(owner, object).await,
            None => Err(PoolError::Timeout),
        }
    }

    /// Obtain an idle or freshly created connection. `None` means the
    /// deadline passed.
    async fn acquire(
        &self,
        deadline: Option<Instant>,
        allow_create: bool,
        only_one_check: bool,
    ) -> Result<Option<Object<F>>, PoolError> {
        let _waiting = WaitGuard::new(&self.inner.waiting);
        let inner = &*self.inner;

        loop {
            let mut can_create = false;
            if allow_create {
                can_create = inner.config.has_room(self.tracked());
                if !can_create {
                    // At capacity, abandoned connections go back to idle.
                    self.reclaim_emancipated().await;
                }
            }

            let acquired = tokio::select! {
                biased;
                permit = inner.inventory.acquire() => Acquired::Idle(permit.map_err(|_| PoolError::PoolClosed)?),
                permit = inner.creation.acquire(), if can_create => Acquired::Create(permit.map_err(|_| PoolError::PoolClosed)?),
                () = expire(deadline) => return Ok(None),
            };

            match acquired {
                Acquired::Idle(permit) => {
                    permit.forget();
                    let Some(object) = self.pop_idle() else {
                        continue;
                    };
                    if object.connection.is_alive() {
                        return Ok(Some(object));
                    }

                    tracing::debug!(connection = object.id, "idle connection is dead");
                    self.destroy(&object).await;
                    if only_one_check {
                        let _permit = tokio::select! {
                            biased;
                            permit = inner.creation.acquire() => permit.map_err(|_| PoolError::PoolClosed)?,
                            () = expire(deadline) => return Ok(None),
                        };
                        if let Some(object) = self.user_create_request().await? {
                            return Ok(Some(object));
                        }
                    }
                }
                Acquired::Create(permit) => {
                    let created = {
                        let _permit = permit;
                        self.user_create_request().await?
                    };
                    if created.is_some() {
                        return Ok(created);
                    }
                }
            }
        }
    }

    async fn user_create_request(&self) -> Result<Option<Object<F>>, PoolError> {
        let tracked = self.tracked();
        if !self.inner.config.has_room(tracked) {
            return Ok(None);
        }
        // Sweep only on even counts.
        if tracked % 2 == 1 || !self.reclaim_emancipated().await {
            return self.create_object(None).await;
        }
        Ok(None)
    }

    async fn prepare_connection(
        &self,
        owner: &OwnerToken,
        object: Object<F>,
    ) -> Result<PooledConnection<F>, PoolError> {
        let lease = object.meta.lock().mark_checkout(owner);
        let connection = PooledConnection {
            pool: self.clone(),
            object,
            owner: owner.clone(),
            lease,
            released: false,
        };
        if let Err(e) = connection.object.connection.activate().await {
            tracing::debug!(connection = connection.id(), error = %e, "activation failed");
            connection.release().await;
            return Err(e);
        }
        tracing::trace!(connection = connection.id(), owner = owner.id(), "connection checked out");
        Ok(connection)
    }

    fn pop_idle(&self) -> Option<Object<F>> {
        let popped = self.inner.idle_new.lock().pop();
        let object = match popped {
            Some(object) => object,
            None => self.inner.idle_old.lock().pop()?,
        };
        object.meta.lock().state = ConnectionState::CheckedOut;
        Some(object)
    }

    fn drain_idle(&self) -> Vec<Object<F>> {
        let mut idle = {
            let mut new = self.inner.idle_new.lock();
            let mut old = self.inner.idle_old.lock();
            let mut idle = std::mem::take(&mut *new);
            idle.append(&mut old);
            idle
        };
        for object in &idle {
            object.meta.lock().state = ConnectionState::CheckedOut;
        }
        self.inner.inventory.forget_permits(idle.len());
        idle
    }

    // =========================================================================
    // Pending checkouts
    // =========================================================================

    fn start_drain(&self) {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let pool = self.clone();
            tokio::spawn(async move { pool.drain_pending().await });
        }
    }

    async fn drain_pending(&self) {
        loop {
            loop {
                let next = self.inner.pending.lock().pop_front();
                let Some(request) = next else {
                    break;
                };
                if request.tx.is_closed() {
                    continue;
                }

                let result = self
                    .get_connection(&request.owner, request.deadline, true, false)
                    .await;
                if let Err(Ok(connection)) = request.tx.send(result) {
                    tracing::trace!(connection = connection.id(), "checkout abandoned by waiter");
                    connection.release().await;
                }
            }

            self.inner.draining.store(false, Ordering::Release);
            if self.inner.pending.lock().is_empty()
                || self
                    .inner
                    .draining
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                return;
            }
        }
    }

    // =========================================================================
    // Return and destruction
    // =========================================================================

    async fn return_object(&self, object: Object<F>, lease: u64) {
        {
            let mut meta = object.meta.lock();
            if meta.lease != lease || meta.state != ConnectionState::CheckedOut {
                tracing::trace!(connection = object.id, "ignoring stale return");
                return;
            }
            meta.mark_returning();
        }
        self.deactivate_object(object).await;
    }

    async fn deactivate_object(&self, object: Object<F>) {
        object.connection.deactivate().await;

        let doomed = object.meta.lock().doomed;
        if doomed || !object.connection.can_be_pooled() {
            self.destroy(&object).await;
            self.queue_create_request();
        } else if self.state() == PoolState::ShuttingDown {
            self.destroy(&object).await;
        } else {
            self.put_new(object);
        }
    }

    fn put_new(&self, object: Object<F>) {
        object.meta.lock().state = ConnectionState::IdleNew;
        self.inner.idle_new.lock().push(object);
        self.inner.inventory.add_permits(1);
    }

    async fn destroy(&self, object: &Object<F>) {
        let removed = self.inner.list.lock().remove(object.id);
        if removed {
            tracing::debug!(connection = object.id, "closing pooled connection");
            object.connection.close().await;
        }
    }

    /// Return every connection whose owner is gone. Returns whether any was
    /// found.
    async fn reclaim_emancipated(&self) -> bool {
        let reclaimed: Vec<_> = {
            let list = self.inner.list.lock();
            list.objects
                .iter()
                .filter(|object| match object.meta.try_lock() {
                    Some(mut meta) if meta.is_emancipated() => {
                        meta.mark_returning();
                        true
                    }
                    _ => false,
                })
                .cloned()
                .collect()
        };

        let found = !reclaimed.is_empty();
        for object in reclaimed {
            tracing::debug!(connection = object.id, "reclaiming abandoned connection");
            self.deactivate_object(object).await;
        }
        found
    }

    // =========================================================================
    // Creation and replenishment
    // =========================================================================

    async fn create_object(&self, replacing: Option<&Object<F>>) -> Result<Option<Object<F>>, PoolError> {
        let reservation = {
            let mut list = self.inner.list.lock();
            let replaced = match replacing {
                Some(old) => {
                    if !list.remove(old.id) {
                        return Err(PoolError::internal("replaced connection is not tracked"));
                    }
                    Some(Arc::clone(old))
                }
                None if !self.inner.config.has_room(list.tracked()) => return Ok(None),
                None => None,
            };
            list.creating += 1;
            Reservation {
                list: &self.inner.list,
                replaced,
                armed: true,
            }
        };

        let connection = match self.inner.factory.create().await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::debug!(error = %e, "connection creation failed");
                return Err(e);
            }
        };
        if !connection.can_be_pooled() {
            drop(reservation);
            connection.close().await;
            return Err(PoolError::internal(
                "factory produced a connection that cannot be pooled",
            ));
        }

        let object = Arc::new(PoolObject {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            connection,
            meta: Mutex::new(ConnectionMetadata::new()),
        });
        reservation.commit(Arc::clone(&object));
        tracing::debug!(connection = object.id, "connection created");
        Ok(Some(object))
    }

    fn need_to_replenish(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let total = self.tracked();
        if !self.inner.config.has_room(total) {
            return false;
        }
        if total < self.inner.config.min_pool_size as usize {
            return true;
        }
        let free = self.inner.idle_new.lock().len() + self.inner.idle_old.lock().len();
        let waiting = self.inner.waiting.load(Ordering::Acquire);
        free < waiting || (free == waiting && total > 1)
    }

    fn queue_create_request(&self) {
        if !self.is_running() {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move { pool.pool_create_request().await });
    }

    async fn pool_create_request(&self) {
        if !self.is_running() {
            return;
        }
        if !self.inner.pending.lock().is_empty() {
            self.start_drain();
        }
        self.reclaim_emancipated().await;
        if !self.need_to_replenish() {
            return;
        }

        let current = self.inner.config.identity_provider.current();
        if !self.inner.identity.matches(&current) {
            tracing::debug!("caller identity changed; skipping replenishment");
            return;
        }

        let deadline = self.default_deadline();
        let permit = tokio::select! {
            biased;
            permit = self.inner.creation.acquire() => permit.ok(),
            () = expire(deadline) => None,
        };
        let Some(_permit) = permit else {
            if self.is_running() {
                tracing::debug!("creation permit busy; requeueing replenishment");
                self.queue_create_request();
            }
            return;
        };

        while self.need_to_replenish() {
            match self.create_object(None).await {
                Ok(Some(object)) => self.put_new(object),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "replenishment failed");
                    break;
                }
            }
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("state", &self.state())
            .field("status", &self.status())
            .field("identity", &self.inner.identity)
            .finish_non_exhaustive()
    }
}

async fn cleanup_timer<F: ConnectionFactory>(
    pool: Weak<PoolInner<F>>,
    period: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = pool.upgrade() else {
            break;
        };
        Pool { inner }.run_cleanup_cycle().await;
    }
}

// =============================================================================
// Handles
// =============================================================================

/// A connection checked out of the pool.
///
/// Dropping the handle returns the connection in the background; prefer
/// [`release`](Self::release) inside async code. The handle keeps its owner
/// token alive, so the connection cannot be reclaimed while it exists.
pub struct PooledConnection<F: ConnectionFactory> {
    pool: Pool<F>,
    object: Object<F>,
    owner: OwnerToken,
    lease: u64,
    released: bool,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Pool-local identifier of the physical connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.object.id
    }

    /// Mark the connection so it is closed instead of pooled on return.
    pub fn doom(&self) {
        self.object.meta.lock().doomed = true;
    }

    /// Whether the connection will be closed on return.
    #[must_use]
    pub fn is_doomed(&self) -> bool {
        self.object.meta.lock().doomed
    }

    /// The owner this connection is checked out to.
    #[must_use]
    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }

    /// How many times this physical connection has been checked out.
    #[must_use]
    pub fn checkout_count(&self) -> u64 {
        self.object.meta.lock().checkout_count
    }

    /// Return the connection to the pool.
    pub async fn release(self) {
        let pool = self.pool.clone();
        let (object, lease) = self.into_parts();
        pool.return_object(object, lease).await;
    }

    fn into_parts(mut self) -> (Object<F>, u64) {
        self.released = true;
        (Arc::clone(&self.object), self.lease)
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        &self.object.connection
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let pool = self.pool.clone();
        let object = Arc::clone(&self.object);
        let lease = self.lease;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { pool.return_object(object, lease).await });
            }
            Err(_) => {
                tracing::warn!(
                    connection = object.id,
                    "connection dropped outside a runtime; it returns once its owner is gone"
                );
            }
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.object.id)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

/// Result of [`Pool::try_checkout`].
pub enum Checkout<F: ConnectionFactory> {
    /// An idle connection was available.
    Ready(PooledConnection<F>),
    /// The request was queued.
    Pending(PendingCheckout<F>),
}

impl<F: ConnectionFactory> Checkout<F> {
    /// Wait for the connection.
    pub async fn wait(self) -> Result<PooledConnection<F>, PoolError> {
        match self {
            Self::Ready(connection) => Ok(connection),
            Self::Pending(pending) => pending.await,
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for Checkout<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(connection) => f.debug_tuple("Ready").field(connection).finish(),
            Self::Pending(pending) => f.debug_tuple("Pending").field(pending).finish(),
        }
    }
}

/// A queued checkout.
pub struct PendingCheckout<F: ConnectionFactory> {
    rx: oneshot::Receiver<Result<PooledConnection<F>, PoolError>>,
}

impl<F: ConnectionFactory> Future for PendingCheckout<F> {
    type Output = Result<PooledConnection<F>, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|delivered| delivered.unwrap_or(Err(PoolError::PoolClosed)))
    }
}

impl<F: ConnectionFactory> fmt::Debug for PendingCheckout<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCheckout").finish_non_exhaustive()
    }
}
