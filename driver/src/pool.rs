//! Bounded connection pool with validation, eviction, and min-size
//! enforcement.
//!
//! The idle store is a deque (LIFO or FIFO per config) behind a mutex,
//! paired with a `Notify` for blocked borrowers. Counters are atomics; at
//! any quiescent moment `idle + active == total <= max_size`. Background
//! tasks run eviction and min-size maintenance until shutdown.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dynosql_client::AwsTransport;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::DriverError;
use crate::error::Result;

/// Min-size enforcement cadence.
const MIN_SIZE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub initial_size: usize,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub validation_timeout: Duration,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
    pub test_while_idle: bool,
    pub lifo: bool,
    pub block_when_exhausted: bool,
    pub num_tests_per_eviction_run: usize,
    pub time_between_eviction_runs: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            initial_size: 0,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1_800),
            validation_timeout: Duration::from_secs(5),
            test_on_borrow: true,
            test_on_return: false,
            test_while_idle: true,
            lifo: true,
            block_when_exhausted: true,
            num_tests_per_eviction_run: 3,
            time_between_eviction_runs: Duration::from_secs(60),
        }
    }
}

/// Builds one pooled connection per call.
pub type ConnectionFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Connection>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub active: usize,
    pub idle: usize,
    pub total: usize,
    pub max_size: usize,
    pub created: u64,
    pub destroyed: u64,
    pub wait_timeouts: u64,
}

struct PoolSlot {
    id: u64,
    conn: Connection,
    created_at: Instant,
    idle_since: Instant,
    last_borrow_at: Instant,
    last_validate_at: Option<Instant>,
}

struct PoolInner {
    config: PoolConfig,
    factory: ConnectionFactory,
    idle: Mutex<VecDeque<PoolSlot>>,
    notify: Notify,
    active: AtomicUsize,
    total: AtomicUsize,
    created: AtomicU64,
    destroyed: AtomicU64,
    wait_timeouts: AtomicU64,
    next_id: AtomicU64,
    closed: AtomicBool,
    cancel: CancellationToken,
}

/// A borrowed connection. Return it with [`ConnectionPool::give_back`];
/// dropping it instead returns it on a best-effort background task
/// without return-validation.
pub struct PooledConnection {
    slot: Option<PoolSlot>,
    pool: Arc<PoolInner>,
    broken: bool,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .field("broken", &self.broken)
            .finish()
    }
}

impl PooledConnection {
    pub fn id(&self) -> u64 {
        self.slot.as_ref().map(|slot| slot.id).unwrap_or(0)
    }

    /// Mark the connection unusable; it will be destroyed on return
    /// instead of going back to the idle deque.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match &self.slot {
            Some(slot) => &slot.conn,
            None => unreachable!("pooled connection used after return"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let pool = Arc::clone(&self.pool);
        let broken = self.broken;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                pool.check_in(slot, broken).await;
            });
        } else {
            pool.forget(slot);
        }
    }
}

pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Pool over the standard AWS transport, one independent connection
    /// per slot.
    pub async fn open(config: ConnectionConfig) -> Result<Self> {
        let pool_config = config.pool.clone();
        let factory: ConnectionFactory = Arc::new(move || {
            let config = config.clone();
            async move {
                let transport = AwsTransport::connect(&config.aws_options())
                    .await
                    .map_err(|source| DriverError::Remote { source })?;
                Ok(Connection::with_transport(config, Arc::new(transport)))
            }
            .boxed()
        });
        Self::with_factory(pool_config, factory).await
    }

    /// Pool over a caller-supplied factory; used by every test and by
    /// embedders that share a transport.
    pub async fn with_factory(config: PoolConfig, factory: ConnectionFactory) -> Result<Self> {
        let inner = Arc::new(PoolInner {
            config,
            factory,
            idle: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            active: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            wait_timeouts: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let warm = inner.config.initial_size.min(inner.config.max_size);
        for _ in 0..warm {
            if !inner.create_idle().await {
                break;
            }
        }

        let evictor = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(evictor.config.time_between_eviction_runs);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticks.tick().await;
            loop {
                tokio::select! {
                    _ = evictor.cancel.cancelled() => return,
                    _ = ticks.tick() => evictor.evict_once().await,
                }
            }
        });

        let filler = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(MIN_SIZE_INTERVAL);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticks.tick().await;
            loop {
                tokio::select! {
                    _ = filler.cancel.cancelled() => return,
                    _ = ticks.tick() => filler.ensure_min_size().await,
                }
            }
        });

        Ok(Self { inner })
    }

    /// Borrow a connection, blocking (bounded) when the pool is exhausted
    /// and `block_when_exhausted` is set.
    pub async fn borrow(&self) -> Result<PooledConnection> {
        self.inner.borrow().await
    }

    /// Return a borrowed connection, honoring `test_on_return`.
    pub async fn give_back(&self, mut conn: PooledConnection) {
        if let Some(slot) = conn.slot.take() {
            self.inner.check_in(slot, conn.broken).await;
        }
    }

    pub fn status(&self) -> PoolStatus {
        let idle = self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0);
        PoolStatus {
            active: self.inner.active.load(Ordering::Acquire),
            idle,
            total: self.inner.total.load(Ordering::Acquire),
            max_size: self.inner.config.max_size,
            created: self.inner.created.load(Ordering::Relaxed),
            destroyed: self.inner.destroyed.load(Ordering::Relaxed),
            wait_timeouts: self.inner.wait_timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop maintenance and destroy every idle connection. Borrowed
    /// connections are destroyed when they come back.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();
        self.inner.notify.notify_waiters();
        let drained: Vec<PoolSlot> = match self.inner.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for slot in drained {
            self.inner.destroy(slot).await;
        }
        debug!("connection pool closed");
    }
}

impl PoolInner {
    async fn borrow(self: &Arc<Self>) -> Result<PooledConnection> {
        let deadline = Instant::now() + self.config.connection_timeout;
        loop {
            if self.is_closed() {
                return Err(DriverError::PoolClosed);
            }

            if let Some(mut slot) = self.pop_idle() {
                if slot.created_at.elapsed() >= self.config.max_lifetime {
                    debug!(id = slot.id, "destroying connection past max lifetime");
                    self.destroy(slot).await;
                    continue;
                }
                if self.config.test_on_borrow && !self.validate(&mut slot).await {
                    debug!(id = slot.id, "borrow validation failed");
                    self.destroy(slot).await;
                    continue;
                }
                slot.last_borrow_at = Instant::now();
                self.active.fetch_add(1, Ordering::AcqRel);
                return Ok(self.guard(slot));
            }

            if self.try_reserve() {
                match (self.factory)().await {
                    Ok(conn) => {
                        self.created.fetch_add(1, Ordering::Relaxed);
                        self.active.fetch_add(1, Ordering::AcqRel);
                        let slot = self.new_slot(conn);
                        debug!(id = slot.id, "created pooled connection");
                        return Ok(self.guard(slot));
                    }
                    Err(error) => {
                        self.total.fetch_sub(1, Ordering::AcqRel);
                        self.notify.notify_one();
                        return Err(error);
                    }
                }
            }

            if !self.config.block_when_exhausted {
                return Err(self.exhausted());
            }
            let now = Instant::now();
            if now >= deadline {
                self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(self.exhausted());
            }
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn check_in(&self, mut slot: PoolSlot, broken: bool) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        if self.is_closed() || broken || slot.created_at.elapsed() >= self.config.max_lifetime {
            self.destroy(slot).await;
            return;
        }
        if self.config.test_on_return && !self.validate(&mut slot).await {
            debug!(id = slot.id, "return validation failed");
            self.destroy(slot).await;
            return;
        }
        slot.idle_since = Instant::now();
        if let Ok(mut idle) = self.idle.lock() {
            if self.config.lifo {
                idle.push_front(slot);
            } else {
                idle.push_back(slot);
            }
        }
        self.notify.notify_one();
    }

    /// Test up to `num_tests_per_eviction_run` idle connections from the
    /// cold end; destroy the idle-too-long, over-age, and invalid ones.
    async fn evict_once(&self) {
        let mut candidates = Vec::new();
        if let Ok(mut idle) = self.idle.lock() {
            for _ in 0..self.config.num_tests_per_eviction_run {
                match idle.pop_back() {
                    Some(slot) => candidates.push(slot),
                    None => break,
                }
            }
        }

        let mut keep = Vec::new();
        for mut slot in candidates {
            if slot.idle_since.elapsed() >= self.config.idle_timeout
                || slot.created_at.elapsed() >= self.config.max_lifetime
            {
                debug!(id = slot.id, "evicting idle connection");
                self.destroy(slot).await;
                continue;
            }
            if self.config.test_while_idle && !self.validate(&mut slot).await {
                debug!(id = slot.id, "idle validation failed");
                self.destroy(slot).await;
                continue;
            }
            keep.push(slot);
        }
        if let Ok(mut idle) = self.idle.lock() {
            for slot in keep {
                idle.push_back(slot);
            }
        }
    }

    async fn ensure_min_size(&self) {
        while !self.is_closed() && self.total.load(Ordering::Acquire) < self.config.min_size {
            if !self.create_idle().await {
                break;
            }
        }
    }

    /// Create one idle connection; false when at capacity or on failure.
    async fn create_idle(&self) -> bool {
        if !self.try_reserve() {
            return false;
        }
        match (self.factory)().await {
            Ok(conn) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                let slot = self.new_slot(conn);
                if let Ok(mut idle) = self.idle.lock() {
                    idle.push_back(slot);
                }
                self.notify.notify_one();
                true
            }
            Err(error) => {
                self.total.fetch_sub(1, Ordering::AcqRel);
                warn!(error = %error, "failed to create pooled connection");
                false
            }
        }
    }

    fn pop_idle(&self) -> Option<PoolSlot> {
        self.idle.lock().ok()?.pop_front()
    }

    fn try_reserve(&self) -> bool {
        self.total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| {
                (total < self.config.max_size).then_some(total + 1)
            })
            .is_ok()
    }

    fn new_slot(&self, conn: Connection) -> PoolSlot {
        let now = Instant::now();
        PoolSlot {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            conn,
            created_at: now,
            idle_since: now,
            last_borrow_at: now,
            last_validate_at: None,
        }
    }

    fn guard(self: &Arc<Self>, slot: PoolSlot) -> PooledConnection {
        PooledConnection {
            slot: Some(slot),
            pool: Arc::clone(self),
            broken: false,
        }
    }

    async fn validate(&self, slot: &mut PoolSlot) -> bool {
        let valid = slot.conn.validate().await;
        slot.last_validate_at = Some(Instant::now());
        valid
    }

    async fn destroy(&self, slot: PoolSlot) {
        slot.conn.close().await;
        self.total.fetch_sub(1, Ordering::AcqRel);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Counter-only cleanup for guards dropped outside a runtime, where
    /// the async destroy path cannot run.
    fn forget(&self, _slot: PoolSlot) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.total.fetch_sub(1, Ordering::AcqRel);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    fn exhausted(&self) -> DriverError {
        DriverError::PoolExhausted {
            active: self.active.load(Ordering::Acquire),
            total: self.total.load(Ordering::Acquire),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
