//! Datasource/XA configuration (`spec.md` §3, §6).

use std::time::Duration;

use crate::common::IsolationLevel;

/// Non-XA datasource/pool configuration, `spec.md` §3 defaults: `maxPoolSize`
/// 20, `minIdle` 5.
#[derive(Debug, Clone)]
pub struct DatasourceConfig {
    pub max_pool_size: usize,
    pub min_idle: usize,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub connection_timeout: Duration,
    pub pool_enabled: bool,
    pub default_transaction_isolation: IsolationLevel,
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 20,
            min_idle: 5,
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            connection_timeout: Duration::from_secs(30),
            pool_enabled: true,
            default_transaction_isolation: IsolationLevel::ReadCommitted,
        }
    }
}

/// XA datasource/pool configuration, `spec.md` §3 defaults: `maxPoolSize`
/// 22, `minIdle` 20, plus the evictor knobs.
#[derive(Debug, Clone)]
pub struct XaDatasourceConfig {
    pub max_pool_size: usize,
    pub min_idle: usize,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub connection_timeout: Duration,
    pub pool_enabled: bool,
    pub default_transaction_isolation: IsolationLevel,
    pub time_between_eviction_runs: Duration,
    pub num_tests_per_eviction_run: usize,
    pub soft_min_evictable_idle_time: Duration,
    pub xa_start_timeout: Duration,
}

impl Default for XaDatasourceConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 22,
            min_idle: 20,
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            connection_timeout: Duration::from_secs(30),
            pool_enabled: true,
            default_transaction_isolation: IsolationLevel::ReadCommitted,
            time_between_eviction_runs: Duration::from_secs(60),
            num_tests_per_eviction_run: 3,
            soft_min_evictable_idle_time: Duration::from_secs(300),
            xa_start_timeout: Duration::from_millis(10_000),
        }
    }
}

impl From<&XaDatasourceConfig> for crate::pool::PoolConfig {
    fn from(cfg: &XaDatasourceConfig) -> Self {
        crate::pool::PoolConfig {
            max_pool_size: cfg.max_pool_size,
            min_idle: cfg.min_idle,
            connection_timeout: cfg.connection_timeout,
            idle_timeout: cfg.idle_timeout,
            max_lifetime: cfg.max_lifetime,
            time_between_eviction_runs: cfg.time_between_eviction_runs,
            num_tests_per_eviction_run: cfg.num_tests_per_eviction_run,
            soft_min_evictable_idle_time: cfg.soft_min_evictable_idle_time,
            leak_detection_threshold: None,
        }
    }
}

/// Parses `spec.md` §3's `defaultTransactionIsolation`: invalid values are
/// rejected with a warning and fall back to `READ_COMMITTED`.
pub fn parse_isolation_or_default(raw: &str) -> IsolationLevel {
    raw.parse().unwrap_or_else(|_| {
        tracing::warn!(value = raw, "invalid defaultTransactionIsolation, falling back to READ_COMMITTED");
        IsolationLevel::ReadCommitted
    })
}
