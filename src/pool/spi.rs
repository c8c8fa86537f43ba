//! XA connection pool provider SPI (`spec.md` §4.3).
//!
//! The contract a backend-specific pool implementation must satisfy. OJP
//! ships one reference implementation (`commons_pool2::CommonsPool2Provider`)
//! but the registry/selection machinery here is the actual deliverable —
//! `spec.md` §1: "replaceable through an SPI; the core specifies the SPI
//! contract, not a particular pool library."

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::pool::BackendSession;

/// Statistics a provider must expose for monitoring and for the end-to-end
/// "cluster-health resize" test in `spec.md` §8 scenario 4.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PoolStatistics {
    pub max_pool_size: usize,
    pub min_idle: usize,
    pub active: usize,
    pub idle: usize,
}

/// Live configuration a provider is constructed from, and later resized
/// with. Mirrors the enumerated `spec.md` §3 Datasource/XA configuration
/// fields relevant to pool sizing and housekeeping.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_pool_size: usize,
    pub min_idle: usize,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub time_between_eviction_runs: Duration,
    pub num_tests_per_eviction_run: usize,
    pub soft_min_evictable_idle_time: Duration,
    pub leak_detection_threshold: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 22,
            min_idle: 20,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            time_between_eviction_runs: Duration::from_secs(60),
            num_tests_per_eviction_run: 3,
            soft_min_evictable_idle_time: Duration::from_secs(300),
            leak_detection_threshold: None,
        }
    }
}

/// A handle to one live pool instance. Opaque to callers beyond the
/// operations exposed on `XaConnectionPoolProvider`.
pub type PoolHandle = Arc<dyn ManagedPool>;

/// The operations a live pool instance exposes, independent of provider.
#[async_trait::async_trait]
pub trait ManagedPool: Send + Sync {
    async fn borrow(&self) -> Result<BackendSession>;
    async fn return_session(&self, session: BackendSession);
    async fn invalidate_session(&self, session: BackendSession);
    fn statistics(&self) -> PoolStatistics;
    /// Live-resizes the pool. Must not disrupt in-use sessions
    /// (`spec.md` §4.3).
    async fn resize(&self, max_pool_size: usize, min_idle: usize);
    async fn close(&self);
}

/// `spec.md` §4.3: `id()`, `createXADataSource`, `borrowSession`,
/// `returnSession`, `invalidateSession`, `getStatistics`,
/// `closeXADataSource`, `supportsDatabase`, `getPriority`.
#[async_trait::async_trait]
pub trait XaConnectionPoolProvider: Send + Sync {
    fn id(&self) -> &'static str;

    /// Selection filter: whether this provider can serve the given backend.
    fn supports_database(&self, url: &str, driver: &str) -> bool;

    /// Providers are ranked by priority; higher wins among those that
    /// `supports_database`.
    fn priority(&self) -> i32;

    async fn create_xa_data_source(&self, config: PoolConfig) -> Result<PoolHandle>;
}

/// Discovers and ranks registered providers, selecting by `supports_database`
/// then by `priority` (`spec.md` §4.3). Populated once at startup and read
/// thereafter — `spec.md` §9: "No process-wide mutable singletons beyond the
/// pool-provider registry (which is initialized at startup and then
/// read-only)."
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn XaConnectionPoolProvider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn XaConnectionPoolProvider>>) -> Self {
        Self { providers }
    }

    pub fn select(&self, url: &str, driver: &str) -> Option<Arc<dyn XaConnectionPoolProvider>> {
        self.providers
            .iter()
            .filter(|p| p.supports_database(url, driver))
            .max_by_key(|p| p.priority())
            .cloned()
    }
}
