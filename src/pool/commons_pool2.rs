//! Default `XAConnectionPoolProvider`: a generic object pool configured by
//! reflective-style property setters (`spec.md` §4.3).
//!
//! Grounded on the teacher's `pool/connection_pool.rs` ("Enterprise
//! Connection Pooling Engine" — elastic sizing, wait-queue semantics, leak
//! detection, idle eviction, max-lifetime enforcement), generalized here
//! from a pool of generic "Connections" to a pool specifically of
//! `BackendSession`s, and from the teacher's ad hoc partitioning/fair-queue
//! knobs down to exactly the surface `spec.md` §4.3 asks for: borrow, return,
//! invalidate, validate, max-lifetime, leak detection, idle eviction, and
//! live resize. The real backend is injected through `BackendSessionFactory`
//! since "reflective property setters for vendor XA data sources" collapse,
//! in Rust, to "the caller supplies a constructor closure" — there is no
//! compile-time dependency on any one backend either way.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{OjpError, Result};
use crate::pool::backend_session::{pool_exhausted, BackendSession};
use crate::pool::housekeeping::HousekeepingExecutor;
use crate::pool::spi::{ManagedPool, PoolConfig, PoolStatistics, XaConnectionPoolProvider};

/// Creates fresh `BackendSession`s on demand. Stands in for the teacher's
/// reflective vendor-datasource configurator — here, simply an injected
/// async factory.
#[async_trait::async_trait]
pub trait BackendSessionFactory: Send + Sync {
    async fn create(&self, id: u64) -> Result<BackendSession>;
}

struct LeakRecord {
    borrowed_at: Instant,
}

struct PoolInner {
    idle: Mutex<VecDeque<BackendSession>>,
    leak_tracking: Mutex<std::collections::HashMap<u64, LeakRecord>>,
    permits: Semaphore,
    config: parking_lot::RwLock<PoolConfig>,
    factory: Arc<dyn BackendSessionFactory>,
    next_id: AtomicU64,
    active: AtomicUsize,
    closed: std::sync::atomic::AtomicBool,
}

/// A live pool instance. Housekeeping runs on one dedicated task
/// (`spec.md` §4.3/§9: "one single-threaded periodic scheduler per pool
/// instance").
pub struct CommonsPool2Pool {
    inner: Arc<PoolInner>,
    housekeeping: HousekeepingExecutor,
}

impl CommonsPool2Pool {
    pub async fn new(config: PoolConfig, factory: Arc<dyn BackendSessionFactory>) -> Result<Arc<Self>> {
        let inner = Arc::new(PoolInner {
            idle: Mutex::new(VecDeque::new()),
            leak_tracking: Mutex::new(std::collections::HashMap::new()),
            permits: Semaphore::new(config.max_pool_size),
            config: parking_lot::RwLock::new(config.clone()),
            factory,
            next_id: AtomicU64::new(1),
            active: AtomicUsize::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
        });

        for _ in 0..config.min_idle {
            let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
            let session = inner.factory.create(id).await?;
            inner.idle.lock().push_back(session);
        }

        let hk_inner = inner.clone();
        let period = config.time_between_eviction_runs;
        let housekeeping = HousekeepingExecutor::spawn("xa-pool-housekeeping", period, move || {
            let inner = hk_inner.clone();
            async move {
                run_housekeeping_pass(&inner).await;
            }
        });

        Ok(Arc::new(Self { inner, housekeeping }))
    }
}

async fn run_housekeeping_pass(inner: &Arc<PoolInner>) {
    let config = inner.config.read().clone();

    // Idle eviction / max-lifetime enforcement: sample up to
    // `num_tests_per_eviction_run` from the front of the idle queue.
    let mut evicted = 0usize;
    for _ in 0..config.num_tests_per_eviction_run {
        let candidate = {
            let mut idle = inner.idle.lock();
            idle.pop_front()
        };
        let Some(session) = candidate else { break };

        let too_old = session.age() > config.max_lifetime;
        let idle_too_long = session.idle_duration() > config.soft_min_evictable_idle_time;

        if too_old || idle_too_long {
            evicted += 1;
            session.close().await;
        } else {
            inner.idle.lock().push_back(session);
            break;
        }
    }
    if evicted > 0 {
        debug!(evicted, "xa pool evicted idle/expired sessions");
    }

    // Leak detection: anything borrowed longer than the threshold is logged
    // loudly; it is not forcibly reclaimed (an XA session may legitimately
    // be held across a long 2PC window).
    if let Some(threshold) = config.leak_detection_threshold {
        let now = Instant::now();
        for (id, record) in inner.leak_tracking.lock().iter() {
            if now.duration_since(record.borrowed_at) > threshold {
                warn!(session_id = id, "possible backend session leak detected");
            }
        }
    }
}

#[async_trait::async_trait]
impl ManagedPool for CommonsPool2Pool {
    async fn borrow(&self) -> Result<BackendSession> {
        let config = self.inner.config.read().clone();
        let permit = timeout(config.connection_timeout, self.inner.permits.acquire())
            .await
            .map_err(|_| pool_exhausted(config.connection_timeout))?
            .map_err(|_| OjpError::TransientInfra("pool closed".into()))?;
        permit.forget();

        let mut session = {
            let popped = self.inner.idle.lock().pop_front();
            match popped {
                Some(s) => s,
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    self.inner.factory.create(id).await?
                }
            }
        };

        if session.connection_mut().is_valid().await {
            self.inner.active.fetch_add(1, Ordering::Relaxed);
            self.inner
                .leak_tracking
                .lock()
                .insert(session.id, LeakRecord { borrowed_at: Instant::now() });
            Ok(session)
        } else {
            session.invalidate();
            self.inner.permits.add_permits(1);
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let fresh = self.inner.factory.create(id).await?;
            self.inner.active.fetch_add(1, Ordering::Relaxed);
            self.inner
                .leak_tracking
                .lock()
                .insert(fresh.id, LeakRecord { borrowed_at: Instant::now() });
            Ok(fresh)
        }
    }

    async fn return_session(&self, mut session: BackendSession) {
        self.inner.leak_tracking.lock().remove(&session.id);
        self.inner.active.fetch_sub(1, Ordering::Relaxed);

        // "A session returned via returnSession must be reset before handing
        // out to another caller; if reset fails, the session is invalidated"
        // (spec.md §4.3).
        if session.reset().await.is_err() || session.is_invalidated() {
            session.close().await;
            self.inner.permits.add_permits(1);
            return;
        }

        self.inner.idle.lock().push_back(session);
        self.inner.permits.add_permits(1);
    }

    async fn invalidate_session(&self, session: BackendSession) {
        self.inner.leak_tracking.lock().remove(&session.id);
        self.inner.active.fetch_sub(1, Ordering::Relaxed);
        session.close().await;
        self.inner.permits.add_permits(1);
    }

    fn statistics(&self) -> PoolStatistics {
        let config = self.inner.config.read();
        PoolStatistics {
            max_pool_size: config.max_pool_size,
            min_idle: config.min_idle,
            active: self.inner.active.load(Ordering::Relaxed),
            idle: self.inner.idle.lock().len(),
        }
    }

    async fn resize(&self, max_pool_size: usize, min_idle: usize) {
        let mut config = self.inner.config.write();
        let delta = max_pool_size as isize - config.max_pool_size as isize;
        config.max_pool_size = max_pool_size;
        config.min_idle = min_idle;
        drop(config);

        if delta > 0 {
            self.inner.permits.add_permits(delta as usize);
        } else if delta < 0 {
            // Shrinking only narrows future capacity; in-use sessions are not
            // disrupted (spec.md §4.3).
            let to_forget = (-delta) as usize;
            if let Ok(permits) = self.inner.permits.try_acquire_many(to_forget as u32) {
                permits.forget();
            }
        }
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.housekeeping.stop().await;
        let drained: Vec<_> = self.inner.idle.lock().drain(..).collect();
        for session in drained {
            session.close().await;
        }
    }
}

/// The default SPI implementation (`spec.md` §4.3: "works across backends
/// without compile-time coupling" via an injected factory rather than
/// reflection, which Rust has no equivalent of at this layer).
pub struct CommonsPool2Provider {
    factory: Arc<dyn BackendSessionFactory>,
    supported_drivers: Vec<String>,
}

impl CommonsPool2Provider {
    pub fn new(factory: Arc<dyn BackendSessionFactory>, supported_drivers: Vec<String>) -> Self {
        Self {
            factory,
            supported_drivers,
        }
    }
}

#[async_trait::async_trait]
impl XaConnectionPoolProvider for CommonsPool2Provider {
    fn id(&self) -> &'static str {
        "commons-pool2-default"
    }

    fn supports_database(&self, _url: &str, driver: &str) -> bool {
        self.supported_drivers.is_empty()
            || self.supported_drivers.iter().any(|d| d == driver)
    }

    fn priority(&self) -> i32 {
        0 // lowest priority: the fallback default
    }

    async fn create_xa_data_source(&self, config: PoolConfig) -> Result<Arc<dyn ManagedPool>> {
        let pool = CommonsPool2Pool::new(config, self.factory.clone()).await?;
        Ok(pool as Arc<dyn ManagedPool>)
    }
}
