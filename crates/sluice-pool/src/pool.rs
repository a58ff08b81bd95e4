//! Connection pool implementation.
//!
//! The pool bounds how many physical connections exist and queues checkouts
//! beyond that bound. Connections are opened lazily, reused while fresh, and
//! reaped once they have been idle for longer than the idle timeout.
//!
//! A pool moves through `Open -> Closing -> Closed`. Only the [`Pool`] value
//! can close it; the cloneable [`PoolHandle`] it dereferences to can check
//! out connections and read metrics but cannot shut the pool down.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sluice_config::{PoolConfiguration, SessionSettings};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;
use crate::events::{Observers, PoolEventHandler, TracingEvents};
use crate::lifecycle::{
    ConnectionFlags, ConnectionManager, ConnectionMetadata, IdleErrorSink, IdleEviction,
};
use crate::query::timed;

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting checkouts.
    Open,
    /// Rejecting checkouts, waiting for leased connections to come back.
    Closing,
    /// Fully shut down.
    Closed,
}

impl PoolState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Closing => 1,
            Self::Closed => 2,
        }
    }
}

/// A connection pool.
///
/// The value returned by [`Pool::new`] or [`PoolBuilder::build`] is the sole
/// owner of the pool and the only thing that can close it. Share access with
/// [`Pool::handle`].
///
/// # Example
///
/// ```rust,ignore
/// use sluice_config::PoolConfiguration;
/// use sluice_pool::Pool;
///
/// let pool = Pool::builder()
///     .config(PoolConfiguration::from_env())
///     .build(manager)?;
///
/// let mut conn = pool.get().await?;
/// // Use connection...
/// drop(conn);
///
/// println!("utilization: {:.1}%", pool.metrics().utilization_percent);
/// pool.close().await?;
/// ```
pub struct Pool<M: ConnectionManager> {
    handle: PoolHandle<M>,
}

/// Shared, non-owning access to a pool.
pub struct PoolHandle<M: ConnectionManager> {
    pub(crate) inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for PoolHandle<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct PoolInner<M: ConnectionManager> {
    manager: M,
    config: PoolConfiguration,
    settings: SessionSettings,

    /// One permit per connection that may be leased at once.
    semaphore: Arc<Semaphore>,

    slots: Mutex<Slots<M::Connection>>,

    /// Callers currently queued for a permit.
    waiting: AtomicUsize,

    state: AtomicU8,

    /// Signalled whenever the connection count drops while not open.
    drained: Notify,

    /// Stops background tasks owned by the pool.
    shutdown: CancellationToken,

    next_connection_id: AtomicU64,

    created_at: Instant,

    counters: Mutex<CountersInner>,

    observers: Arc<Observers>,
}

struct Slots<C> {
    /// Most recently returned at the back.
    idle: VecDeque<IdleConnection<C>>,
    /// Idle, leased and connecting connections.
    total: u32,
}

struct IdleConnection<C> {
    conn: C,
    meta: ConnectionMetadata,
    flags: Arc<ConnectionFlags>,
    idle_since: Instant,
}

#[derive(Debug, Default)]
struct CountersInner {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    health_checks_performed: u64,
    health_checks_failed: u64,
    session_setup_failures: u64,
}

/// Lifetime counters collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolCounters {
    /// Total connections opened since pool start.
    pub connections_created: u64,
    /// Total connections destroyed since pool start.
    pub connections_closed: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Failed checkouts (timeouts, pool closed, connect errors).
    pub checkouts_failed: u64,
    /// Health checks performed.
    pub health_checks_performed: u64,
    /// Health checks that reported unhealthy.
    pub health_checks_failed: u64,
    /// Errors raised by connections while idle.
    pub idle_errors: u64,
    /// New connections whose session settings could not be applied.
    pub session_setup_failures: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolCounters {
    /// Checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Health check success rate (0.0 to 1.0).
    #[must_use]
    pub fn health_check_success_rate(&self) -> f64 {
        if self.health_checks_performed == 0 {
            return 1.0;
        }
        let successful = self.health_checks_performed - self.health_checks_failed;
        successful as f64 / self.health_checks_performed as f64
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A reserved connection slot that is released unless disarmed.
struct SlotReservation<'a, M: ConnectionManager> {
    inner: &'a PoolInner<M>,
    armed: bool,
}

impl<M: ConnectionManager> SlotReservation<'_, M> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<M: ConnectionManager> Drop for SlotReservation<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.release_slot();
        }
    }
}

impl<M: ConnectionManager> Pool<M> {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder<M> {
        PoolBuilder::new()
    }

    /// Create a pool with the given manager and configuration.
    ///
    /// No connections are opened until the first checkout.
    pub fn new(manager: M, config: PoolConfiguration) -> Result<Self, PoolError> {
        Self::with_event_handler(manager, config, Arc::new(TracingEvents))
    }

    fn with_event_handler(
        manager: M,
        config: PoolConfiguration,
        handler: Arc<dyn PoolEventHandler>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let observers = Arc::new(Observers::new(handler, config.application_name.clone()));

        let inner = Arc::new(PoolInner {
            manager,
            settings: config.session_settings(),
            semaphore: Arc::new(Semaphore::new(config.max_connections as usize)),
            slots: Mutex::new(Slots {
                idle: VecDeque::new(),
                total: 0,
            }),
            waiting: AtomicUsize::new(0),
            state: AtomicU8::new(PoolState::Open.as_u8()),
            drained: Notify::new(),
            shutdown: CancellationToken::new(),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            counters: Mutex::new(CountersInner::default()),
            observers,
            config,
        });

        spawn_reaper(&inner);

        tracing::info!(
            min = inner.config.min_connections,
            max = inner.config.max_connections,
            application_name = %inner.config.application_name,
            "connection pool created"
        );

        Ok(Self {
            handle: PoolHandle { inner },
        })
    }

    /// A cloneable handle for sharing the pool.
    #[must_use]
    pub fn handle(&self) -> PoolHandle<M> {
        self.handle.clone()
    }

    /// Close the pool.
    ///
    /// New checkouts are rejected immediately and idle connections are
    /// destroyed. The call then waits for leased connections to be returned,
    /// up to the configured shutdown timeout. If they do not all come back,
    /// the pool is marked closed anyway and [`PoolError::Shutdown`] is
    /// returned so the caller can decide whether that is fatal.
    pub async fn close(self) -> Result<(), PoolError> {
        let inner = &self.handle.inner;
        inner.begin_close();

        let deadline = Instant::now() + inner.config.shutdown_timeout;
        loop {
            let notified = inner.drained.notified();
            let outstanding = inner.slots.lock().total;
            if outstanding == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let outstanding = inner.slots.lock().total;
                inner.set_state(PoolState::Closed);
                tracing::error!(
                    outstanding,
                    application_name = %inner.config.application_name,
                    "error closing database pool: leased connections not returned"
                );
                return Err(PoolError::Shutdown { outstanding });
            }
        }

        inner.set_state(PoolState::Closed);
        tracing::info!(
            application_name = %inner.config.application_name,
            "database pool closed successfully"
        );
        Ok(())
    }
}

impl<M: ConnectionManager> Deref for Pool<M> {
    type Target = PoolHandle<M>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<M: ConnectionManager> Drop for Pool<M> {
    fn drop(&mut self) {
        let inner = &self.handle.inner;
        if inner.state() == PoolState::Open {
            tracing::debug!(
                application_name = %inner.config.application_name,
                "pool dropped without close, shutting down"
            );
            inner.begin_close();
        }
        inner.shutdown.cancel();
    }
}

impl<M: ConnectionManager> PoolHandle<M> {
    /// Check out a connection.
    ///
    /// Reuses an idle connection when one is available, opens a new one when
    /// below capacity, and otherwise waits in FIFO order for a connection to
    /// be returned. Waiting is bounded by the connection timeout.
    pub async fn get(&self) -> Result<PooledConnection<M>, PoolError> {
        let inner = &self.inner;
        if inner.state() != PoolState::Open {
            inner.record_checkout(false);
            return Err(PoolError::Closed);
        }

        let timeout = inner.config.connection_timeout;
        let deadline = Instant::now() + timeout;

        let permit = {
            let _waiting = WaitingGuard::enter(&inner.waiting);
            match tokio::time::timeout_at(deadline, Arc::clone(&inner.semaphore).acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    inner.record_checkout(false);
                    return Err(PoolError::Closed);
                }
                Err(_) => {
                    inner.record_checkout(false);
                    tracing::warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        application_name = %inner.config.application_name,
                        "timed out waiting for a database connection"
                    );
                    return Err(PoolError::ConnectionTimeout { timeout });
                }
            }
        };

        if inner.state() != PoolState::Open {
            inner.record_checkout(false);
            return Err(PoolError::Closed);
        }

        // Reuse the freshest idle connection, discarding stale ones. When none
        // is left, reserve a slot for a new connection under the same lock.
        loop {
            let candidate = {
                let mut slots = inner.slots.lock();
                match slots.idle.pop_back() {
                    Some(idle) => {
                        idle.flags.set_idle(false);
                        Some(idle)
                    }
                    None => {
                        slots.total += 1;
                        None
                    }
                }
            };

            let Some(idle) = candidate else { break };

            let expired = idle.idle_since.elapsed() >= inner.config.idle_timeout;
            if expired || idle.flags.is_broken() || inner.manager.is_broken(&idle.conn) {
                let reason = if expired { "idle timeout" } else { "broken" };
                inner.discard(idle.conn, idle.meta.id, true, reason);
                continue;
            }

            return Ok(self.lease(idle.conn, idle.meta, idle.flags, permit));
        }

        // Gives the slot back if connecting fails or unwinds.
        let reservation = SlotReservation {
            inner: inner.as_ref(),
            armed: true,
        };

        let id = inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let flags = Arc::new(ConnectionFlags::default());
        let pool: Weak<dyn IdleEviction> = Arc::<PoolInner<M>>::downgrade(inner);
        let sink = IdleErrorSink::new(id, Arc::clone(&flags), Arc::clone(&inner.observers), pool);

        let mut conn = match tokio::time::timeout_at(deadline, inner.manager.connect(sink)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                inner.record_checkout(false);
                tracing::warn!(error = %e, "failed to open database connection");
                return Err(PoolError::Connect(Box::new(e)));
            }
            Err(_) => {
                inner.record_checkout(false);
                return Err(PoolError::ConnectionTimeout { timeout });
            }
        };

        inner.counters.lock().connections_created += 1;

        // Session settings are best effort; the connection stays usable.
        let apply = inner.manager.apply_session_settings(&mut conn, &inner.settings);
        if let Err(e) = timed(inner.config.query_timeout, apply).await {
            inner.counters.lock().session_setup_failures += 1;
            tracing::warn!(
                connection_id = id,
                error = %e,
                "failed to apply session settings to new connection"
            );
        }

        let event = inner.observers.event(id, false);
        inner.observers.notify(|h| h.on_connect(&event));

        reservation.disarm();

        // The pool may have started closing while this connection was opened.
        if inner.state() != PoolState::Open {
            inner.record_checkout(false);
            inner.discard(conn, id, false, "pool closing");
            return Err(PoolError::Closed);
        }

        Ok(self.lease(conn, ConnectionMetadata::new(id), flags, permit))
    }

    fn lease(
        &self,
        conn: M::Connection,
        mut meta: ConnectionMetadata,
        flags: Arc<ConnectionFlags>,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection<M> {
        meta.record_checkout();
        self.inner.record_checkout(true);

        let event = self.inner.observers.event(meta.id, false);
        self.inner.observers.notify(|h| h.on_acquire(&event));

        PooledConnection {
            conn: Some(conn),
            metadata: meta,
            flags,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.inner.state()
    }

    /// Whether the pool no longer accepts checkouts.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state() != PoolState::Open
    }

    /// The pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfiguration {
        &self.inner.config
    }

    /// The connection manager.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Lifetime counters.
    #[must_use]
    pub fn counters(&self) -> PoolCounters {
        let inner = self.inner.counters.lock();
        PoolCounters {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            health_checks_performed: inner.health_checks_performed,
            health_checks_failed: inner.health_checks_failed,
            idle_errors: self.inner.observers.idle_errors(),
            session_setup_failures: inner.session_setup_failures,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Destroy idle connections that exceeded the idle timeout, keeping at
    /// least `min_connections` open. Returns how many were destroyed.
    pub fn reap_idle(&self) -> usize {
        self.inner.reap_idle()
    }

    pub(crate) fn counts(&self) -> (u32, u32, usize) {
        let slots = self.inner.slots.lock();
        (
            slots.total,
            slots.idle.len() as u32,
            self.inner.waiting.load(Ordering::Acquire),
        )
    }

    pub(crate) fn record_health_check(&self, healthy: bool) {
        let mut counters = self.inner.counters.lock();
        counters.health_checks_performed += 1;
        if !healthy {
            counters.health_checks_failed += 1;
        }
    }
}

impl<M: ConnectionManager> IdleEviction for PoolInner<M> {
    fn evict_broken(&self, connection_id: u64) {
        let evicted = {
            let mut slots = self.slots.lock();
            let index = slots
                .idle
                .iter()
                .position(|conn| conn.meta.id == connection_id);
            index.and_then(|index| slots.idle.remove(index))
        };
        if let Some(conn) = evicted {
            self.discard(conn.conn, conn.meta.id, true, "idle error");
        }
    }
}

impl<M: ConnectionManager> PoolInner<M> {
    fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PoolState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn record_checkout(&self, success: bool) {
        let mut counters = self.counters.lock();
        if success {
            counters.checkouts_successful += 1;
        } else {
            counters.checkouts_failed += 1;
        }
    }

    /// Move to `Closing`, wake queued callers and destroy idle connections.
    fn begin_close(&self) {
        if self
            .state
            .compare_exchange(
                PoolState::Open.as_u8(),
                PoolState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        self.semaphore.close();
        self.shutdown.cancel();

        let idle: Vec<_> = self.slots.lock().idle.drain(..).collect();
        for conn in idle {
            self.discard(conn.conn, conn.meta.id, true, "pool closing");
        }

        if self.slots.lock().total == 0 {
            self.drained.notify_waiters();
        }
    }

    /// Take a connection back from a caller.
    fn check_in(&self, conn: M::Connection, meta: ConnectionMetadata, flags: Arc<ConnectionFlags>) {
        let event = self.observers.event(meta.id, false);
        self.observers.notify(|h| h.on_release(&event));

        let reusable = self.state() == PoolState::Open
            && !flags.is_broken()
            && !self.manager.is_broken(&conn);

        if !reusable {
            let reason = if flags.is_broken() { "broken" } else { "not reusable" };
            self.discard(conn, meta.id, false, reason);
            return;
        }

        // Error reports and closing both take this lock, so re-check here.
        let mut slots = self.slots.lock();
        flags.set_idle(true);
        if flags.is_broken() || self.state() != PoolState::Open {
            drop(slots);
            self.discard(conn, meta.id, false, "not reusable");
            return;
        }
        slots.idle.push_back(IdleConnection {
            conn,
            meta,
            flags,
            idle_since: Instant::now(),
        });
    }

    /// Destroy a connection that has already left the idle set.
    fn discard(&self, conn: M::Connection, id: u64, idle: bool, reason: &'static str) {
        drop(conn);
        self.counters.lock().connections_closed += 1;
        tracing::trace!(connection_id = id, reason, "destroying database connection");

        let event = self.observers.event(id, idle);
        self.observers.notify(|h| h.on_remove(&event));

        self.release_slot();
    }

    /// Give up one connection slot.
    fn release_slot(&self) {
        let remaining = {
            let mut slots = self.slots.lock();
            slots.total = slots.total.saturating_sub(1);
            slots.total
        };
        if remaining == 0 && self.state() != PoolState::Open {
            self.drained.notify_waiters();
        }
    }

    fn reap_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let min = self.config.min_connections;

        let (broken, expired) = {
            let mut slots = self.slots.lock();

            // Dead connections go regardless of the minimum.
            let (broken, alive): (VecDeque<_>, VecDeque<_>) =
                slots.idle.drain(..).partition(|conn| {
                    conn.flags.is_broken() || self.manager.is_broken(&conn.conn)
                });
            slots.idle = alive;

            let mut expired = Vec::new();
            let floor = min + broken.len() as u32;
            // Oldest idle connections sit at the front.
            while slots.total.saturating_sub(expired.len() as u32) > floor {
                match slots.idle.front() {
                    Some(conn) if conn.idle_since.elapsed() >= idle_timeout => {
                        if let Some(conn) = slots.idle.pop_front() {
                            expired.push(conn);
                        }
                    }
                    _ => break,
                }
            }
            (broken, expired)
        };

        let reaped = broken.len() + expired.len();
        for conn in broken {
            self.discard(conn.conn, conn.meta.id, true, "broken");
        }
        for conn in expired {
            self.discard(conn.conn, conn.meta.id, true, "idle timeout");
        }
        if reaped > 0 {
            tracing::debug!(reaped, "reaped idle database connections");
        }
        reaped
    }
}

/// Periodically reap idle connections until the pool shuts down.
fn spawn_reaper<M: ConnectionManager>(inner: &Arc<PoolInner<M>>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::debug!("no tokio runtime, idle connections are only reaped on checkout");
        return;
    };

    let period = (inner.config.idle_timeout / 2).max(Duration::from_millis(100));
    let shutdown = inner.shutdown.clone();
    let weak = Arc::downgrade(inner);

    let start = Instant::now() + period;

    runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = weak.upgrade() else { break };
                    inner.reap_idle();
                }
            }
        }
    });
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder()
///     .config(PoolConfiguration::from_env())
///     .event_handler(MyEvents)
///     .build(manager)?;
/// ```
pub struct PoolBuilder<M: ConnectionManager> {
    config: PoolConfiguration,
    handler: Arc<dyn PoolEventHandler>,
    _manager: PhantomData<fn() -> M>,
}

impl<M: ConnectionManager> PoolBuilder<M> {
    /// Create a new pool builder with default settings.
    pub fn new() -> Self {
        Self {
            config: PoolConfiguration::default(),
            handler: Arc::new(TracingEvents),
            _manager: PhantomData,
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfiguration) -> Self {
        self.config = config;
        self
    }

    /// Register the lifecycle event handler.
    #[must_use]
    pub fn event_handler(mut self, handler: impl PoolEventHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Register a shared lifecycle event handler.
    #[must_use]
    pub fn shared_event_handler(mut self, handler: Arc<dyn PoolEventHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.config.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Build the pool around a connection manager.
    pub fn build(self, manager: M) -> Result<Pool<M>, PoolError> {
        Pool::with_event_handler(manager, self.config, self.handler)
    }
}

impl<M: ConnectionManager> Default for PoolBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// A connection checked out from the pool.
///
/// Dropping it returns the connection to the pool. Use
/// [`release`](PooledConnection::release) to also run the manager's reset
/// hook, or [`detach`](PooledConnection::detach) to take the connection out
/// of the pool for good.
pub struct PooledConnection<M: ConnectionManager> {
    conn: Option<M::Connection>,
    metadata: ConnectionMetadata,
    flags: Arc<ConnectionFlags>,
    pool: Arc<PoolInner<M>>,
    // Dropped after the connection is checked back in.
    _permit: OwnedSemaphorePermit,
}

impl<M: ConnectionManager> PooledConnection<M> {
    /// Get the connection metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// The client-side query timeout of the owning pool.
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        self.pool.config.query_timeout
    }

    /// Mark the connection unusable so it is destroyed instead of reused.
    pub fn mark_broken(&self) {
        self.flags.mark_broken();
    }

    /// Return the connection after running the manager's reset hook.
    ///
    /// A connection that fails to reset is destroyed and the failure is
    /// returned.
    pub async fn release(mut self) -> Result<(), PoolError> {
        let limit = self.pool.config.query_timeout;
        let result = match self.conn.as_mut() {
            Some(conn) => timed(limit, self.pool.manager.reset(conn)).await,
            None => return Ok(()),
        };
        let result = match result {
            Ok(()) => Ok(()),
            Err(PoolError::Query(source)) => Err(PoolError::Reset(source)),
            Err(other) => Err(other),
        };
        if result.is_err() {
            self.flags.mark_broken();
        }

        // Checked in by drop.
        result
    }

    /// Take the connection out of the pool.
    ///
    /// The pool forgets the connection and frees its slot.
    pub fn detach(mut self) -> Option<M::Connection> {
        let conn = self.conn.take();
        if conn.is_some() {
            self.pool.release_slot();
        }
        conn
    }

    fn conn(&self) -> &M::Connection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is present until the guard is consumed"),
        }
    }

    fn conn_mut(&mut self) -> &mut M::Connection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is present until the guard is consumed"),
        }
    }
}

impl<M: ConnectionManager> std::fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("metadata", &self.metadata)
            .field("state", &self.flags.state())
            .finish_non_exhaustive()
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn()
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn_mut()
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool
                .check_in(conn, self.metadata.clone(), Arc::clone(&self.flags));
        }
    }
}
