//! Pool engine and facade
//!
//! All member bookkeeping (the idle set, the tracked count, the pending
//! checkout queue and the closed flag) lives in one [`PoolState`] behind a
//! single lock. The lock is never held across an await point: anything that
//! talks to the outside world (factory, health check, disposer) or hands a
//! lease to a waiting caller runs as a separate unit of work on the
//! configured [`Scheduler`].

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::PoolConfiguration;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::eviction::{EvictionPolicy, Freshness};
use crate::health::{HealthCheck, HealthStatus};
use crate::lease::{Checkout, Lease};
use crate::lifecycle::{ConnectionFactory, Disposer};
use crate::member::Member;
use crate::metrics::{MetricsExporter, MetricsTracker, PoolMetrics};
use crate::scheduler::{ScheduledTask, Scheduler, TokioScheduler};

/// A caller waiting for a lease
struct Waiter<T: Send + 'static> {
    id: u64,
    tx: oneshot::Sender<PoolResult<Lease<T>>>,
}

impl<T: Send + 'static> Waiter<T> {
    fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    fn fail(self, error: PoolError) {
        let _ = self.tx.send(Err(error));
    }
}

struct PoolState<T: Send + 'static> {
    /// Idle members, most recently released first
    idle: VecDeque<Member<T>>,

    /// Members counted against capacity: idle, leased, being created or
    /// health checked, and slots held back after a failed health check
    tracked: usize,

    leased: usize,
    waiters: VecDeque<Waiter<T>>,
    closed: bool,
    retry_scheduled: bool,
    next_member_id: u64,
    next_waiter_id: u64,
}

impl<T: Send + 'static> PoolState<T> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            tracked: 0,
            leased: 0,
            waiters: VecDeque::new(),
            closed: false,
            retry_scheduled: false,
            next_member_id: 1,
            next_waiter_id: 1,
        }
    }

    fn pending(&self) -> usize {
        self.waiters.iter().filter(|w| !w.is_abandoned()).count()
    }

    /// Pop the next usable idle member, moving expired ones into `expired`
    fn take_idle(
        &mut self,
        policy: &EvictionPolicy,
        now: Instant,
        expired: &mut Vec<Member<T>>,
    ) -> Option<(Member<T>, Freshness)> {
        while let Some(member) = self.idle.pop_front() {
            match member.freshness(policy, now) {
                Freshness::Expired => {
                    self.tracked -= 1;
                    expired.push(member);
                }
                freshness => return Some((member, freshness)),
            }
        }
        None
    }

    fn take_expired(&mut self, policy: &EvictionPolicy, now: Instant) -> VecDeque<Member<T>> {
        let (expired, fresh): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.idle)
            .into_iter()
            .partition(|m| m.freshness(policy, now) == Freshness::Expired);
        self.idle = fresh;
        self.tracked -= expired.len();
        expired
    }
}

/// What a drain pass decided to do with the head of the checkout queue
enum Step<T: Send + 'static> {
    Grant(Member<T>, Waiter<T>),
    HealthCheck(Member<T>, Waiter<T>),
    Create(Waiter<T>),
    Exhausted { schedule_retry: bool },
}

pub(crate) struct PoolInner<T: Send + 'static> {
    config: PoolConfiguration<T>,
    policy: EvictionPolicy,
    factory: Arc<dyn ConnectionFactory<T>>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<PoolState<T>>,
    timers: DashMap<u64, ScheduledTask>,
    next_timer_id: AtomicU64,
    metrics: MetricsTracker,
}

impl<T: Send + 'static> PoolInner<T> {
    fn checkout(self: &Arc<Self>) -> Checkout<T> {
        let mut state = self.state.lock();
        if state.closed {
            return Checkout::failed(PoolError::PoolClosed);
        }

        let (tx, rx) = oneshot::channel();
        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        state.waiters.push_back(Waiter { id, tx });
        drop(state);

        tracing::trace!(checkout_id = id, "checkout queued");
        self.schedule_drain();
        Checkout::pending(rx)
    }

    fn schedule_drain(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        self.scheduler.schedule(Box::pin(async move { pool.drain() }));
    }

    /// Serve waiting checkouts in FIFO order until the queue is empty or the
    /// pool is exhausted
    fn drain(self: &Arc<Self>) {
        let mut expired = Vec::new();

        loop {
            let mut state = self.state.lock();
            if state.closed {
                let waiters = std::mem::take(&mut state.waiters);
                drop(state);
                waiters.into_iter().for_each(|w| w.fail(PoolError::PoolClosed));
                break;
            }

            state.waiters.retain(|w| !w.is_abandoned());
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };

            let step = if let Some((mut member, freshness)) =
                state.take_idle(&self.policy, Instant::now(), &mut expired)
            {
                if freshness == Freshness::NeedsHealthCheck {
                    member.mark_health_checking();
                    Step::HealthCheck(member, waiter)
                } else {
                    member.mark_leased();
                    state.leased += 1;
                    Step::Grant(member, waiter)
                }
            } else if state.tracked < self.config.max_pool_size {
                state.tracked += 1;
                Step::Create(waiter)
            } else {
                state.waiters.push_front(waiter);
                let schedule_retry = !state.retry_scheduled;
                state.retry_scheduled = true;
                Step::Exhausted { schedule_retry }
            };
            drop(state);

            match step {
                Step::Grant(member, waiter) => self.grant(member, waiter),
                Step::HealthCheck(member, waiter) => self.spawn_health_check(member, waiter),
                Step::Create(waiter) => self.spawn_create(waiter),
                Step::Exhausted { schedule_retry } => {
                    if schedule_retry {
                        self.schedule_retry();
                    }
                    break;
                }
            }
        }

        for member in expired {
            MetricsTracker::increment(&self.metrics.idle_evictions);
            tracing::debug!(member_id = member.id(), "evicting member idle past max idle time");
            self.dispose(member);
        }
    }

    fn grant(self: &Arc<Self>, member: Member<T>, waiter: Waiter<T>) {
        let member_id = member.id();
        MetricsTracker::increment(&self.metrics.leases_granted);
        let lease = Lease::new(member, Arc::clone(self));

        // A failed send drops the lease, which returns the member to the pool
        if waiter.tx.send(Ok(lease)).is_err() {
            tracing::trace!(checkout_id = waiter.id, member_id, "checkout abandoned during grant");
        } else {
            tracing::trace!(checkout_id = waiter.id, member_id, "lease granted");
        }
    }

    fn spawn_create(self: &Arc<Self>, waiter: Waiter<T>) {
        let pool = Arc::clone(self);
        self.scheduler.schedule(Box::pin(async move {
            let slot = ReservedSlot::new(Arc::clone(&pool));
            let result = pool.factory.create().await;
            slot.disarm();
            pool.complete_create(result, waiter);
        }));
    }

    fn complete_create(self: &Arc<Self>, result: Result<T, BoxError>, waiter: Waiter<T>) {
        let mut state = self.state.lock();
        match result {
            Ok(connection) => {
                let member_id = state.next_member_id;
                state.next_member_id += 1;
                MetricsTracker::increment(&self.metrics.connections_created);

                let member = Member::new(member_id, connection);
                if state.closed {
                    state.tracked -= 1;
                    drop(state);
                    tracing::debug!(member_id, "pool closed while connecting; disposing");
                    self.dispose(member);
                    waiter.fail(PoolError::PoolClosed);
                    return;
                }

                state.leased += 1;
                drop(state);
                tracing::debug!(member_id, "connection created");
                self.grant(member, waiter);
            }
            Err(error) => {
                state.tracked -= 1;
                let has_waiters = !state.waiters.is_empty() && !state.closed;
                drop(state);

                MetricsTracker::increment(&self.metrics.creation_failures);
                tracing::warn!(checkout_id = waiter.id, error = %error, "connection creation failed");
                waiter.fail(PoolError::creation_failed(error));
                if has_waiters {
                    self.schedule_drain();
                }
            }
        }
    }

    fn spawn_health_check(self: &Arc<Self>, mut member: Member<T>, waiter: Waiter<T>) {
        let pool = Arc::clone(self);
        self.scheduler.schedule(Box::pin(async move {
            let slot = ReservedSlot::new(Arc::clone(&pool));
            let member_id = member.id();
            let checked = AssertUnwindSafe(pool.config.health_check.is_healthy(member.connection_mut()))
                .catch_unwind()
                .await;
            let healthy = match checked {
                Ok(Ok(healthy)) => healthy,
                Ok(Err(error)) => {
                    tracing::debug!(member_id, error = %error, "health check errored");
                    false
                }
                Err(_) => {
                    tracing::warn!(member_id, "health check panicked");
                    false
                }
            };
            slot.disarm();
            member.record_health_check(Instant::now());
            pool.complete_health_check(member, waiter, healthy);
        }));
    }

    fn complete_health_check(self: &Arc<Self>, mut member: Member<T>, waiter: Waiter<T>, healthy: bool) {
        MetricsTracker::increment(&self.metrics.health_checks_performed);

        let mut state = self.state.lock();
        if state.closed {
            state.tracked -= 1;
            drop(state);
            self.dispose(member);
            waiter.fail(PoolError::PoolClosed);
            return;
        }

        if healthy {
            member.mark_leased();
            state.leased += 1;
            drop(state);
            self.grant(member, waiter);
            return;
        }

        // The slot stays reserved until the delay elapses; the waiter keeps its
        // place at the head of the queue and may still be served by another
        // idle member.
        if !waiter.is_abandoned() {
            state.waiters.push_front(waiter);
        }
        let has_idle = !state.idle.is_empty();
        drop(state);

        MetricsTracker::increment(&self.metrics.health_checks_failed);
        tracing::debug!(member_id = member.id(), "health check failed; disposing member");
        self.dispose(member);
        if has_idle {
            self.schedule_drain();
        }

        let delay = self.config.return_to_pool_delay_after_health_check_failure;
        self.schedule_timer(delay, |pool| pool.release_slot());
    }

    /// Give a reserved slot back and let waiters use it
    fn release_slot(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.tracked -= 1;
        let has_waiters = !state.waiters.is_empty();
        drop(state);

        if has_waiters {
            self.schedule_drain();
        }
    }

    fn schedule_retry(self: &Arc<Self>) {
        MetricsTracker::increment(&self.metrics.checkout_retries);
        let interval = self.config.checkout_retry_interval;
        tracing::trace!(?interval, "pool exhausted; checkout retry scheduled");

        self.schedule_timer(interval, |pool| {
            pool.state.lock().retry_scheduled = false;
            pool.drain();
        });
    }

    fn schedule_sweep(self: &Arc<Self>) {
        self.schedule_timer(self.config.idle_sweep_interval, |pool| {
            pool.evict_expired();
            if !pool.state.lock().closed {
                pool.schedule_sweep();
            }
        });
    }

    fn evict_expired(&self) {
        let expired = {
            let mut state = self.state.lock();
            state.take_expired(&self.policy, Instant::now())
        };

        for member in expired {
            MetricsTracker::increment(&self.metrics.idle_evictions);
            tracing::debug!(member_id = member.id(), "idle sweep evicting member");
            self.dispose(member);
        }
    }

    /// Run `action` after `delay`. Timers hold only a weak reference to the
    /// pool and are cancelled by [`close`](Self::close).
    fn schedule_timer<F>(self: &Arc<Self>, delay: Duration, action: F)
    where
        F: FnOnce(&Arc<Self>) + Send + 'static,
    {
        let id = self.next_timer_id.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(self);
        let task = self.scheduler.schedule_after(
            delay,
            Box::pin(async move {
                if let Some(pool) = weak.upgrade() {
                    pool.timers.remove(&id);
                    action(&pool);
                }
            }),
        );

        self.timers.retain(|_, timer| !timer.is_finished());
        self.timers.insert(id, task);

        if self.state.lock().closed {
            self.cancel_timers();
        }
    }

    fn cancel_timers(&self) {
        for timer in self.timers.iter() {
            timer.cancel();
        }
        self.timers.clear();
    }

    fn dispose(&self, member: Member<T>) {
        let member_id = member.id();
        let connection = member.into_disposed();
        MetricsTracker::increment(&self.metrics.connections_disposed);

        let disposer = Arc::clone(&self.config.disposer);
        self.scheduler.schedule(Box::pin(async move {
            if let Err(error) = disposer.dispose(connection).await {
                tracing::debug!(member_id, error = %error, "disposer failed; ignoring");
            }
        }));
    }

    pub(crate) fn checkin(self: &Arc<Self>, mut member: Member<T>) {
        MetricsTracker::increment(&self.metrics.leases_released);

        let mut state = self.state.lock();
        state.leased -= 1;
        if state.closed {
            state.tracked -= 1;
            drop(state);
            tracing::trace!(member_id = member.id(), "lease released after close; disposing");
            self.dispose(member);
            return;
        }

        member.mark_idle(Instant::now());
        tracing::trace!(member_id = member.id(), "lease released");
        state.idle.push_front(member);
        let has_waiters = !state.waiters.is_empty();
        drop(state);

        if has_waiters {
            self.schedule_drain();
        }
    }

    pub(crate) fn discard(self: &Arc<Self>, member: Member<T>) {
        MetricsTracker::increment(&self.metrics.leases_discarded);

        let mut state = self.state.lock();
        state.leased -= 1;
        state.tracked -= 1;
        let has_waiters = !state.waiters.is_empty() && !state.closed;
        drop(state);

        tracing::debug!(member_id = member.id(), "lease discarded");
        self.dispose(member);
        if has_waiters {
            self.schedule_drain();
        }
    }

    fn close(&self) {
        let (idle, waiters) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle_count = state.idle.len();
            state.tracked -= idle_count;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };

        self.cancel_timers();
        tracing::info!(
            idle = idle.len(),
            pending = waiters.len(),
            "connection pool closed"
        );

        for member in idle {
            self.dispose(member);
        }
        for waiter in waiters {
            waiter.fail(PoolError::PoolClosed);
        }
    }

    fn counts(&self) -> (usize, usize, usize) {
        let state = self.state.lock();
        (state.idle.len(), state.leased, state.pending())
    }
}

/// Capacity held by an in-flight factory call or health check. If the task
/// is aborted or the factory panics, the slot is handed back to the pool.
struct ReservedSlot<T: Send + 'static> {
    pool: Option<Arc<PoolInner<T>>>,
}

impl<T: Send + 'static> ReservedSlot<T> {
    fn new(pool: Arc<PoolInner<T>>) -> Self {
        Self { pool: Some(pool) }
    }

    fn disarm(mut self) {
        self.pool = None;
    }
}

impl<T: Send + 'static> Drop for ReservedSlot<T> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            tracing::warn!("pool task ended early; releasing its slot");
            pool.release_slot();
        }
    }
}

/// Non-blocking connection pool
///
/// Cloning the pool is cheap; clones share the same members.
///
/// # Examples
///
/// ```
/// use esox_connpool::{ConnectionPool, PoolConfiguration};
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = ConnectionPool::new(
///     || async { Ok::<_, std::io::Error>(String::from("connection")) },
///     PoolConfiguration::new().with_max_pool_size(2),
/// )
/// .unwrap();
///
/// let lease = pool.member().await.unwrap();
/// assert_eq!(*lease, "connection");
/// lease.release();
///
/// pool.close();
/// assert!(pool.member().await.is_err());
/// # }
/// ```
pub struct ConnectionPool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> ConnectionPool<T> {
    /// Create a pool that opens connections with `factory`
    ///
    /// Fails if the configuration is invalid or the default scheduler cannot
    /// be started.
    pub fn new<F>(factory: F, config: PoolConfiguration<T>) -> PoolResult<Self>
    where
        F: ConnectionFactory<T>,
    {
        config.validate()?;

        let scheduler: Arc<dyn Scheduler> = match &config.scheduler {
            Some(scheduler) => Arc::clone(scheduler),
            None => Arc::new(TokioScheduler::with_worker_threads(config.max_pool_size)?),
        };

        tracing::info!(
            max_pool_size = config.max_pool_size,
            idle_time_before_health_check = ?config.idle_time_before_health_check,
            max_idle_time = ?config.max_idle_time,
            checkout_retry_interval = ?config.checkout_retry_interval,
            "connection pool created"
        );

        let inner = Arc::new(PoolInner {
            policy: config.eviction_policy(),
            config,
            factory: Arc::new(factory),
            scheduler,
            state: Mutex::new(PoolState::new()),
            timers: DashMap::new(),
            next_timer_id: AtomicU64::new(1),
            metrics: MetricsTracker::new(),
        });
        inner.schedule_sweep();

        Ok(Self { inner })
    }

    /// Request a connection
    ///
    /// Never blocks. The returned [`Checkout`] resolves once a member is
    /// leased; dropping it abandons the request. On a closed pool it resolves
    /// immediately with [`PoolError::PoolClosed`].
    pub fn member(&self) -> Checkout<T> {
        self.inner.checkout()
    }

    /// Request a connection, giving up after `timeout`
    pub async fn member_with_timeout(&self, timeout: Duration) -> PoolResult<Lease<T>> {
        tokio::time::timeout(timeout, self.member())
            .await
            .map_err(|_| PoolError::Timeout(timeout))?
    }

    /// Begin shutdown. Idempotent.
    ///
    /// Idle connections are disposed, pending checkouts fail with
    /// [`PoolError::PoolClosed`] and scheduled retries are cancelled. Leased
    /// connections are disposed when they are released.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get health status
    pub fn health_status(&self) -> HealthStatus {
        let (idle, leased, pending) = self.inner.counts();
        HealthStatus::new(idle, leased, pending, self.inner.config.max_pool_size)
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        let (idle, leased, pending) = self.inner.counts();
        self.inner
            .metrics
            .get_metrics(idle, leased, pending, self.inner.config.max_pool_size)
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.metrics().export()
    }

    /// Export metrics in Prometheus format
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        MetricsExporter::export_prometheus(&self.metrics(), pool_name, tags)
    }

    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn leased_count(&self) -> usize {
        self.inner.state.lock().leased
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending()
    }

    pub fn config(&self) -> &PoolConfiguration<T> {
        &self.inner.config
    }
}

impl<T: Send + 'static> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for ConnectionPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (idle, leased, pending) = self.inner.counts();
        f.debug_struct("ConnectionPool")
            .field("idle", &idle)
            .field("leased", &leased)
            .field("pending", &pending)
            .field("config", &self.inner.config)
            .finish()
    }
}
