//! `Server`: the per-process bundle of shared state, and the per-operation
//! action handlers the RPC layer dispatches into (`spec.md` §4.4, §4.5, §9).
//!
//! `spec.md` §9: "bundle them in a single Server struct passed by borrowed
//! reference to every handler. No process-wide mutable singletons beyond the
//! pool-provider registry." Every handler here takes `&self`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::cluster::{CircuitBreakerRegistry, ClusterHealth, ClusterHealthTracker, MultinodePoolCoordinator, MultinodeXaCoordinator};
use crate::common::{ClientUuid, ConnHash};
use crate::config::{compute_conn_hash, parse_isolation_or_default, ConnIdentity};
use crate::error::{OjpError, Result};
use crate::pool::{
    BackendConnection, BackendSession, BackendSessionFactory, CommonsPool2Provider, ManagedPool,
    PoolConfig, PoolHandle, PoolStatistics, ProviderRegistry, XaResourceHandle,
};
use crate::session::{affinity, Session, SessionManager, TransactionStatus};
use crate::streaming::{stream_result_blocks, BlockingPolicy, ColumnDescriptor, RawRow, ResultBlock};
use crate::xa::{RegisterOutcome, XaStartTimeout, XaTransactionRegistry};

use super::wire::{
    ConnectionDetails, OpResult, ResultSetFetchRequest, SessionInfo, SessionTerminationStatus, StatementRequest,
    TransactionInfo, XaRecoverRequest, XaRequest,
};

/// Opens a concrete backend connection. Stands in for the real JDBC-like
/// driver `spec.md` §1 scopes out as a collaborator — the crate depends only
/// on this trait, never on a specific database client.
#[async_trait::async_trait]
pub trait BackendDriver: Send + Sync {
    fn driver_name(&self) -> &'static str;
    async fn open(
        &self,
        details: &ConnectionDetails,
    ) -> Result<(Box<dyn BackendConnection>, Box<dyn XaResourceHandle>)>;
}

struct DriverSessionFactory {
    driver: Arc<dyn BackendDriver>,
    details: ConnectionDetails,
}

#[async_trait::async_trait]
impl BackendSessionFactory for DriverSessionFactory {
    async fn create(&self, id: u64) -> Result<BackendSession> {
        let (connection, xa_resource) = self.driver.open(&self.details).await?;
        Ok(BackendSession::new(id, connection, xa_resource))
    }
}

/// Shape of an already-provisioned XA pool for a `ConnHash`, kept alongside
/// the pool itself so `connect` can tell a size-only change (live-resize)
/// from an endpoint-set change (recreate) — `spec.md` §9's resolved Open
/// Question.
#[derive(Clone, PartialEq, Eq)]
struct XaPoolShape {
    server_endpoints: Vec<String>,
    max_pool_size: usize,
    min_idle: usize,
}

/// Per-statement-hash fast/slow lane segregation (`spec.md` §4.5: "the
/// handler runs through a per-connection slow-query segregation manager...
/// if the overall manager is disabled it degrades to a pass-through slot
/// manager with all slots fast"). A statement is classified slow once its
/// observed latency exceeds `slow_latency` on a prior call; new statements
/// start fast.
pub struct SlotManagerConfig {
    pub enabled: bool,
    pub slow_fraction: f64,
    pub slow_latency: Duration,
}

impl Default for SlotManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slow_fraction: 0.2,
            slow_latency: Duration::from_millis(500),
        }
    }
}

struct SlotManager {
    config: SlotManagerConfig,
    fast: Semaphore,
    slow: Semaphore,
    observed_slow: DashMap<u64, ()>,
}

enum Lane {
    Fast,
    Slow,
}

impl SlotManager {
    fn new(capacity: usize, config: SlotManagerConfig) -> Self {
        let capacity = capacity.max(1);
        let slow_permits = if config.enabled {
            ((capacity as f64) * config.slow_fraction).floor().max(1.0) as usize
        } else {
            0
        };
        let slow_permits = slow_permits.min(capacity - 1).max(if config.enabled { 1 } else { 0 });
        let fast_permits = capacity - slow_permits;
        Self {
            config,
            fast: Semaphore::new(fast_permits.max(1)),
            slow: Semaphore::new(slow_permits),
            observed_slow: DashMap::new(),
        }
    }

    async fn acquire(&self, statement_hash: u64) -> (tokio::sync::SemaphorePermit<'_>, Lane) {
        if self.config.enabled && self.observed_slow.contains_key(&statement_hash) {
            if let Ok(permit) = self.slow.try_acquire() {
                return (permit, Lane::Slow);
            }
        }
        let permit = self.fast.acquire().await.expect("fast semaphore never closes");
        (permit, Lane::Fast)
    }

    fn record_latency(&self, statement_hash: u64, elapsed: Duration) {
        if self.config.enabled && elapsed >= self.config.slow_latency {
            self.observed_slow.insert(statement_hash, ());
        }
    }
}

fn statement_hash(sql: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    sql.hash(&mut hasher);
    hasher.finish()
}

fn prop_or<T: std::str::FromStr>(details: &ConnectionDetails, key: &str, default: T) -> T {
    details.properties.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// The per-process shared state every handler is a method on
/// (`spec.md` §9).
pub struct Server {
    driver: Arc<dyn BackendDriver>,
    providers: ProviderRegistry,
    sessions: SessionManager,

    non_xa_pools: DashMap<ConnHash, PoolHandle>,
    non_xa_unpooled: DashMap<ConnHash, ConnectionDetails>,

    xa_pools: DashMap<ConnHash, PoolHandle>,
    xa_registries: DashMap<ConnHash, Arc<XaTransactionRegistry>>,
    xa_pool_shapes: DashMap<ConnHash, XaPoolShape>,
    xa_unpooled: DashMap<ConnHash, ConnectionDetails>,
    xa_txn_timeouts: DashMap<ConnHash, u32>,

    /// The `maxPoolSize`/`minIdle` the client declared at `connect` time for
    /// each `ConnHash`, kept so a later cluster-health-driven resize
    /// (`spec.md` §4.5 step 1, §8 scenario 4) recomputes `ceil(declared / M)`
    /// from the session's own declared sizes rather than a fixed default.
    declared_pool_sizes: DashMap<ConnHash, (usize, usize)>,

    cluster_health: ClusterHealthTracker,
    pool_coordinator: MultinodePoolCoordinator,
    xa_coordinator: MultinodeXaCoordinator,
    circuit_breakers: CircuitBreakerRegistry,
    slot_manager: SlotManager,
}

impl Server {
    pub fn new(driver: Arc<dyn BackendDriver>, providers: ProviderRegistry) -> Self {
        Self {
            driver,
            providers,
            sessions: SessionManager::new(),
            non_xa_pools: DashMap::new(),
            non_xa_unpooled: DashMap::new(),
            xa_pools: DashMap::new(),
            xa_registries: DashMap::new(),
            xa_pool_shapes: DashMap::new(),
            xa_unpooled: DashMap::new(),
            xa_txn_timeouts: DashMap::new(),
            declared_pool_sizes: DashMap::new(),
            cluster_health: ClusterHealthTracker::new(),
            pool_coordinator: MultinodePoolCoordinator::new(),
            xa_coordinator: MultinodeXaCoordinator::new(),
            circuit_breakers: CircuitBreakerRegistry::new(),
            slot_manager: SlotManager::new(32, SlotManagerConfig::default()),
        }
    }

    fn healthy_peers(details: &ConnectionDetails) -> usize {
        ClusterHealth(details.cluster_health.clone()).healthy_peer_count().max(1)
    }

    /// The `maxPoolSize`/`minIdle` the client declared for `conn_hash` at
    /// `connect` time, falling back to the non-XA defaults only if somehow
    /// queried before any `connect` for this `ConnHash` landed.
    fn declared_sizes_for(&self, conn_hash: &ConnHash) -> (usize, usize) {
        self.declared_pool_sizes.get(conn_hash).map(|e| *e.value()).unwrap_or((20, 5))
    }

    async fn create_pool_for(&self, conn_hash: &ConnHash, details: &ConnectionDetails, config: PoolConfig) -> Result<PoolHandle> {
        let factory = Arc::new(DriverSessionFactory {
            driver: self.driver.clone(),
            details: details.clone(),
        });
        let provider = self
            .providers
            .select(&details.url, self.driver.driver_name())
            .unwrap_or_else(|| Arc::new(CommonsPool2Provider::new(factory.clone(), vec![])));
        let pool = provider.create_xa_data_source(config).await?;
        let _ = conn_hash;
        Ok(pool)
    }

    /// `spec.md` §4.4 `connect`.
    #[instrument(skip(self, details))]
    pub async fn connect(&self, details: ConnectionDetails, client_uuid: ClientUuid) -> Result<SessionInfo> {
        let pool_enabled = prop_or(&details, "poolEnabled", true);
        let max_pool_size = prop_or(&details, "maxPoolSize", if details.is_xa { 22 } else { 20 });
        let min_idle = prop_or(&details, "minIdle", if details.is_xa { 20 } else { 5 });
        let isolation = details
            .properties
            .get("defaultTransactionIsolation")
            .map(|raw| parse_isolation_or_default(raw))
            .unwrap_or_default();

        let conn_hash = compute_conn_hash(&ConnIdentity {
            url: &details.url,
            user: &details.user,
            password: &details.password,
            max_pool_size,
            min_idle,
            default_isolation: isolation,
        });
        self.sessions.register_client(conn_hash.clone(), client_uuid.clone());
        self.declared_pool_sizes.insert(conn_hash.clone(), (max_pool_size, min_idle));

        let healthy_peers = Self::healthy_peers(&details);

        let internal_info = if !details.is_xa {
            if pool_enabled {
                if !self.non_xa_pools.contains_key(&conn_hash) {
                    let sizes = self
                        .pool_coordinator
                        .calculate_pool_sizes(conn_hash.clone(), max_pool_size, min_idle, healthy_peers);
                    let config = PoolConfig {
                        max_pool_size: sizes.max_pool_size,
                        min_idle: sizes.min_idle,
                        ..PoolConfig::default()
                    };
                    let pool = self.create_pool_for(&conn_hash, &details, config).await?;
                    self.non_xa_pools.entry(conn_hash.clone()).or_insert(pool);
                }
            } else {
                self.non_xa_unpooled.entry(conn_hash.clone()).or_insert_with(|| details.clone());
            }
            self.sessions.create_session(client_uuid.clone(), conn_hash.clone())
        } else if pool_enabled {
            let sizes = self
                .pool_coordinator
                .calculate_pool_sizes(conn_hash.clone(), max_pool_size, min_idle, healthy_peers);
            let xa_max = self.xa_coordinator.calculate_xa_limits(conn_hash.clone(), max_pool_size, healthy_peers);
            let desired_shape = XaPoolShape {
                server_endpoints: details.server_endpoints.clone(),
                max_pool_size: xa_max,
                min_idle: sizes.min_idle,
            };

            let existing_shape = self.xa_pool_shapes.get(&conn_hash).map(|s| s.clone());
            match existing_shape {
                Some(shape) if shape.server_endpoints == desired_shape.server_endpoints => {
                    if shape.max_pool_size != desired_shape.max_pool_size || shape.min_idle != desired_shape.min_idle {
                        let registry = self.xa_registries.get(&conn_hash).map(|e| e.clone());
                        if let Some(registry) = registry {
                            registry.resize_backend_pool(desired_shape.max_pool_size, desired_shape.min_idle).await;
                        }
                        self.xa_pool_shapes.insert(conn_hash.clone(), desired_shape);
                    }
                }
                Some(_) => {
                    // Endpoint set changed: recreate (spec.md §9's resolved Open Question).
                    if let Some((_, old_pool)) = self.xa_pools.remove(&conn_hash) {
                        old_pool.close().await;
                    }
                    self.xa_registries.remove(&conn_hash);
                    let config = PoolConfig {
                        max_pool_size: desired_shape.max_pool_size,
                        min_idle: desired_shape.min_idle,
                        ..PoolConfig::default()
                    };
                    let pool = self.create_pool_for(&conn_hash, &details, config).await?;
                    let registry = Arc::new(XaTransactionRegistry::new(pool.clone(), XaStartTimeout::default()));
                    self.xa_pools.insert(conn_hash.clone(), pool);
                    self.xa_registries.insert(conn_hash.clone(), registry);
                    self.xa_pool_shapes.insert(conn_hash.clone(), desired_shape);
                }
                None => {
                    let config = PoolConfig {
                        max_pool_size: desired_shape.max_pool_size,
                        min_idle: desired_shape.min_idle,
                        ..PoolConfig::default()
                    };
                    let pool = self.create_pool_for(&conn_hash, &details, config).await?;
                    let registry = Arc::new(XaTransactionRegistry::new(pool.clone(), XaStartTimeout::default()));
                    self.xa_pools.insert(conn_hash.clone(), pool);
                    self.xa_registries.insert(conn_hash.clone(), registry);
                    self.xa_pool_shapes.insert(conn_hash.clone(), desired_shape);
                }
            }

            // Eagerly borrow one BackendSession for this Session (spec.md §4.4:
            // "XA pooled ... eagerly borrow one BackendSession and create the
            // OJP XA Session bound to it. On failure, the borrowed session MUST
            // be returned (or invalidated) before signaling error.")
            let pool = self.xa_pools.get(&conn_hash).expect("just created above").clone();
            let session = pool.borrow().await?;
            self.sessions.create_xa_session(client_uuid.clone(), conn_hash.clone(), session)
        } else {
            self.xa_unpooled.entry(conn_hash.clone()).or_insert_with(|| details.clone());
            self.sessions.create_deferred_xa_session(client_uuid.clone(), conn_hash.clone())
        };

        Ok(SessionInfo {
            session_uuid: internal_info.session_uuid,
            client_uuid: internal_info.client_uuid,
            conn_hash: internal_info.conn_hash,
            is_xa: internal_info.is_xa,
            cluster_health: details.cluster_health,
            target_server: String::new(),
            transaction_info: TransactionInfo::default(),
        })
    }

    /// `spec.md` §4.5 step 1, hoisted into every handler that follows.
    async fn process_cluster_health(&self, conn_hash: &ConnHash, cluster_health: &str, max_pool_size: usize, min_idle: usize) {
        let health = ClusterHealth(cluster_health.to_string());
        // Clone the handles out and drop the DashMap guards before awaiting
        // — holding a shard guard across an `.await` is the one thing this
        // codebase's DashMap usage never does.
        let pool = self.non_xa_pools.get(conn_hash).map(|e| e.clone());
        let xa_registry = self.xa_registries.get(conn_hash).map(|e| e.clone());
        self.cluster_health
            .process_cluster_health(
                conn_hash,
                health,
                max_pool_size,
                min_idle,
                &self.pool_coordinator,
                pool.as_ref(),
                &self.xa_coordinator,
                xa_registry.as_deref(),
            )
            .await;
    }

    /// Ensures `session` owns a live non-XA `BackendSession`, lazily
    /// borrowing from the pool on first use (`spec.md` §3).
    async fn ensure_non_xa_connection<'a>(&self, session: &'a mut Session) -> Result<&'a mut BackendSession> {
        if session.non_xa_backend_session_mut().is_none() {
            let pool = self.non_xa_pools.get(&session.conn_hash).map(|e| e.clone());
            let unpooled_details = self.non_xa_unpooled.get(&session.conn_hash).map(|e| e.clone());
            let backend = if let Some(pool) = pool {
                pool.borrow().await?
            } else if let Some(details) = unpooled_details {
                let (connection, xa_resource) = self.driver.open(&details).await?;
                BackendSession::new(0, connection, xa_resource)
            } else {
                return Err(OjpError::Configuration(format!(
                    "no datasource registered for connHash {}",
                    session.conn_hash
                )));
            };
            session.bind_non_xa_connection(backend);
        }
        Ok(session.non_xa_backend_session_mut().expect("just bound"))
    }

    /// Runs the pre-execution pipeline common to every statement
    /// (`spec.md` §4.5: cluster-health, circuit breaker, affinity detection,
    /// slot manager) and hands back the breaker and the started-at instant
    /// so the caller can record the outcome once it has run the statement.
    async fn begin_statement(&self, request: &StatementRequest) -> Result<(Arc<crate::cluster::CircuitBreaker>, u64, Instant, tokio::sync::SemaphorePermit<'_>)> {
        let (max_pool_size, min_idle) = self.declared_sizes_for(&request.session.conn_hash);
        self.process_cluster_health(&request.session.conn_hash, &request.session.cluster_health, max_pool_size, min_idle)
            .await;

        let hash = statement_hash(&request.sql);
        let breaker = self.circuit_breakers.breaker_for(hash);
        if !breaker.can_attempt() {
            return Err(OjpError::TransientInfra(format!("circuit open for statement hash {hash}")));
        }

        if affinity::requires_session_affinity(&request.sql) {
            tracing::debug!(sql = %request.sql, "statement requires session affinity");
        }

        let (permit, _lane) = self.slot_manager.acquire(hash).await;
        Ok((breaker, hash, Instant::now(), permit))
    }

    fn finish_statement(&self, breaker: &crate::cluster::CircuitBreaker, hash: u64, started: Instant, ok: bool) {
        self.slot_manager.record_latency(hash, started.elapsed());
        if ok {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
    }

    /// `spec.md` §6 `executeUpdate`.
    pub async fn execute_update(&self, request: StatementRequest) -> Result<OpResult> {
        let (breaker, hash, started, _permit) = self.begin_statement(&request).await?;

        let mut session = self
            .sessions
            .get_mut(&request.session.session_uuid)
            .ok_or_else(|| OjpError::session_not_found(request.session.session_uuid.as_str()))?;
        let backend = if session.is_xa() {
            session
                .xa_backend_session_mut()
                .ok_or_else(|| OjpError::Protocol("xa session has no bound connection".into()))?
        } else {
            self.ensure_non_xa_connection(&mut *session).await?
        };

        let result = backend.connection_mut().execute_update(&request.sql).await;
        self.finish_statement(&breaker, hash, started, result.is_ok());
        Ok(OpResult::UpdateCount(result?))
    }

    /// `spec.md` §6 `executeQuery`: materializes through the backend driver
    /// (a collaborator per `spec.md` §1) then re-chunks into blocks, columns
    /// described once in the first block (`spec.md` §4.5).
    pub async fn execute_query(&self, request: StatementRequest) -> Result<Vec<OpResult>> {
        let (breaker, hash, started, _permit) = self.begin_statement(&request).await?;

        let (columns, rows) = {
            let mut session = self
                .sessions
                .get_mut(&request.session.session_uuid)
                .ok_or_else(|| OjpError::session_not_found(request.session.session_uuid.as_str()))?;
            let backend = if session.is_xa() {
                session
                    .xa_backend_session_mut()
                    .ok_or_else(|| OjpError::Protocol("xa session has no bound connection".into()))?
            } else {
                self.ensure_non_xa_connection(&mut *session).await?
            };
            let result = backend.connection_mut().execute_query(&request.sql).await;
            self.finish_statement(&breaker, hash, started, result.is_ok());
            result?
        };

        let session_uuid = request.session.session_uuid.clone();
        let session = self
            .sessions
            .get_mut(&session_uuid)
            .ok_or_else(|| OjpError::session_not_found(session_uuid.as_str()))?;

        let policy = BlockingPolicy {
            rows_per_block: 100,
            lob_streamed_row_by_row: false,
        };
        let mut blocks = materialize_blocks(rows, columns, policy, &session.registry).await;
        if let Some(last) = blocks.last_mut() {
            last.is_final = true;
        }
        Ok(blocks.into_iter().map(OpResult::RowBlock).collect())
    }

    /// `spec.md` §6 `fetchNextRows`. Concrete cursoring is a collaborator
    /// simplification here: rows beyond what `executeQuery` already streamed
    /// are not buffered, so this always reports the stream exhausted.
    pub async fn fetch_next_rows(&self, request: ResultSetFetchRequest) -> Result<OpResult> {
        let (max_pool_size, min_idle) = self.declared_sizes_for(&request.session.conn_hash);
        self.process_cluster_health(&request.session.conn_hash, &request.session.cluster_health, max_pool_size, min_idle)
            .await;
        if self.sessions.get(&request.session.session_uuid).is_none() {
            return Err(OjpError::session_not_found(request.session.session_uuid.as_str()));
        }
        Ok(OpResult::RowBlock(ResultBlock {
            columns: None,
            rows: Vec::new(),
            is_final: true,
        }))
    }

    /// `spec.md` §6 `startTransaction`.
    pub async fn start_transaction(&self, session_info: &SessionInfo) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(&session_info.session_uuid)
            .ok_or_else(|| OjpError::session_not_found(session_info.session_uuid.as_str()))?;
        let backend = self.ensure_non_xa_connection(&mut *session).await?;
        backend.connection_mut().begin().await?;
        session.transaction_status = TransactionStatus::TrxActive;
        Ok(())
    }

    /// `spec.md` §6 `commitTransaction`.
    pub async fn commit_transaction(&self, session_info: &SessionInfo) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(&session_info.session_uuid)
            .ok_or_else(|| OjpError::session_not_found(session_info.session_uuid.as_str()))?;
        let backend = self.ensure_non_xa_connection(&mut *session).await?;
        backend.connection_mut().commit().await?;
        session.transaction_status = TransactionStatus::TrxNone;
        Ok(())
    }

    /// `spec.md` §6 `rollbackTransaction`.
    pub async fn rollback_transaction(&self, session_info: &SessionInfo) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(&session_info.session_uuid)
            .ok_or_else(|| OjpError::session_not_found(session_info.session_uuid.as_str()))?;
        let backend = self.ensure_non_xa_connection(&mut *session).await?;
        backend.connection_mut().rollback().await?;
        session.transaction_status = TransactionStatus::TrxNone;
        Ok(())
    }

    fn xa_registry_for(&self, conn_hash: &ConnHash) -> Result<Arc<XaTransactionRegistry>> {
        self.xa_registries
            .get(conn_hash)
            .map(|e| e.clone())
            .ok_or_else(|| OjpError::Configuration(format!("no XA registry for connHash {conn_hash}")))
    }

    /// `spec.md` §6 `xaStart`.
    pub async fn xa_start(&self, request: XaRequest) -> Result<RegisterOutcome> {
        let registry = self.xa_registry_for(&request.session.conn_hash)?;
        let xid = crate::xa::XidKey::from_wire(&request.xid);
        let owner = request.session.session_uuid.clone();

        if request.flags & (crate::xa::flags::TMJOIN | crate::xa::flags::TMRESUME) == 0 {
            let eager_session = self
                .sessions
                .get_mut(&owner)
                .and_then(|mut session| session.take_xa_backend_session());
            if let Some(backend) = eager_session {
                registry.register_existing_session(xid.clone(), owner.clone(), backend).await?;
                return Ok(RegisterOutcome::Started);
            }
        }
        registry.xa_start(xid, request.flags, owner).await
    }

    /// `spec.md` §6 `xaEnd`.
    pub async fn xa_end(&self, request: XaRequest) -> Result<()> {
        let registry = self.xa_registry_for(&request.session.conn_hash)?;
        let xid = crate::xa::XidKey::from_wire(&request.xid);
        registry.xa_end(&xid, request.flags).await
    }

    /// `spec.md` §6 `xaPrepare`.
    pub async fn xa_prepare(&self, request: XaRequest) -> Result<bool> {
        let registry = self.xa_registry_for(&request.session.conn_hash)?;
        let xid = crate::xa::XidKey::from_wire(&request.xid);
        registry.xa_prepare(&xid).await
    }

    /// `spec.md` §6 `xaCommit`.
    pub async fn xa_commit(&self, request: XaRequest) -> Result<()> {
        let registry = self.xa_registry_for(&request.session.conn_hash)?;
        let xid = crate::xa::XidKey::from_wire(&request.xid);
        registry.xa_commit(&xid, request.one_phase).await
    }

    /// `spec.md` §6 `xaRollback`.
    pub async fn xa_rollback(&self, request: XaRequest) -> Result<()> {
        let registry = self.xa_registry_for(&request.session.conn_hash)?;
        let xid = crate::xa::XidKey::from_wire(&request.xid);
        registry.xa_rollback(&xid).await
    }

    /// `spec.md` §6 `xaRecover`.
    pub async fn xa_recover(&self, request: XaRecoverRequest) -> Result<Vec<crate::xa::WireXid>> {
        let registry = self.xa_registry_for(&request.session.conn_hash)?;
        let xids = registry.xa_recover(request.flags).await?;
        Ok(xids.iter().map(|x| x.to_wire()).collect())
    }

    /// `spec.md` §6 `xaIsSameRM`: two branches share a resource manager when
    /// they route through the same `connHash` — there is exactly one backend
    /// XA resource manager per connection configuration.
    pub fn xa_is_same_rm(&self, a: &ConnHash, b: &ConnHash) -> bool {
        a == b
    }

    /// `spec.md` §6 `xaSetTransactionTimeout`.
    pub fn xa_set_transaction_timeout(&self, conn_hash: &ConnHash, seconds: u32) {
        self.xa_txn_timeouts.insert(conn_hash.clone(), seconds);
    }

    /// `spec.md` §6 `xaGetTransactionTimeout`. `0` means no timeout set, per
    /// XA convention.
    pub fn xa_get_transaction_timeout(&self, conn_hash: &ConnHash) -> u32 {
        self.xa_txn_timeouts.get(conn_hash).map(|v| *v).unwrap_or(0)
    }

    /// `spec.md` §4.1 `terminateSession`.
    #[instrument(skip(self))]
    pub async fn terminate_session(&self, session_uuid: &crate::common::SessionUuid) -> SessionTerminationStatus {
        let conn_hash = self.sessions.get(session_uuid).map(|s| s.conn_hash.clone());
        let Some(conn_hash) = conn_hash else {
            return SessionTerminationStatus::default();
        };

        let xa_registry = self.xa_registries.get(&conn_hash).map(|e| e.clone());
        let non_xa_pool = self.non_xa_pools.get(&conn_hash).map(|e| e.clone());

        let report = self
            .sessions
            .terminate_session(session_uuid, xa_registry.as_deref(), non_xa_pool.as_ref())
            .await;

        if !report.close_errors.is_empty() {
            warn!(session = %session_uuid, errors = ?report.close_errors, "errors while terminating session");
        } else {
            info!(session = %session_uuid, "session terminated cleanly");
        }
        report.into()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.session_count()
    }

    /// Exposed for monitoring and for the cluster-health-resize end-to-end
    /// test (`spec.md` §8 scenario 4); not part of the §6 wire protocol.
    pub fn non_xa_pool_statistics(&self, conn_hash: &ConnHash) -> Option<PoolStatistics> {
        self.non_xa_pools.get(conn_hash).map(|p| p.statistics())
    }

    pub fn xa_pool_statistics(&self, conn_hash: &ConnHash) -> Option<PoolStatistics> {
        self.xa_pools.get(conn_hash).map(|p| p.statistics())
    }
}

async fn materialize_blocks(
    rows: Vec<RawRow>,
    columns: Vec<ColumnDescriptor>,
    policy: BlockingPolicy,
    registry: &crate::session::SessionObjectRegistry,
) -> Vec<ResultBlock> {
    use futures::StreamExt;
    stream_result_blocks(futures::stream::iter(rows), columns, policy, registry)
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::IsolationLevel;

    struct FakeConnection {
        isolation: IsolationLevel,
    }

    #[async_trait::async_trait]
    impl BackendConnection for FakeConnection {
        async fn reset(&mut self) -> Result<()> {
            Ok(())
        }
        async fn is_valid(&mut self) -> bool {
            true
        }
        async fn set_isolation(&mut self, level: IsolationLevel) -> Result<()> {
            self.isolation = level;
            Ok(())
        }
        fn isolation(&self) -> IsolationLevel {
            self.isolation
        }
        async fn begin(&mut self) -> Result<()> {
            Ok(())
        }
        async fn commit(&mut self) -> Result<()> {
            Ok(())
        }
        async fn rollback(&mut self) -> Result<()> {
            Ok(())
        }
        async fn execute_update(&mut self, _sql: &str) -> Result<u64> {
            Ok(1)
        }
        async fn execute_query(&mut self, _sql: &str) -> Result<(Vec<ColumnDescriptor>, Vec<RawRow>)> {
            Ok((
                vec![ColumnDescriptor {
                    name: "id".into(),
                    type_name: "INT".into(),
                }],
                vec![vec![crate::streaming::RawCellValue::Int(1)]],
            ))
        }
        async fn close(&mut self) {}
    }

    struct FakeXaResource;

    #[async_trait::async_trait]
    impl XaResourceHandle for FakeXaResource {
        async fn start(&mut self, _xid: &crate::xa::XidKey, _flags: u32) -> Result<()> {
            Ok(())
        }
        async fn end(&mut self, _xid: &crate::xa::XidKey, _flags: u32) -> Result<()> {
            Ok(())
        }
        async fn prepare(&mut self, _xid: &crate::xa::XidKey) -> Result<bool> {
            Ok(false)
        }
        async fn commit(&mut self, _xid: &crate::xa::XidKey, _one_phase: bool) -> Result<()> {
            Ok(())
        }
        async fn rollback(&mut self, _xid: &crate::xa::XidKey) -> Result<()> {
            Ok(())
        }
        async fn recover(&mut self) -> Result<Vec<crate::xa::XidKey>> {
            Ok(vec![])
        }
    }

    struct FakeDriver;

    #[async_trait::async_trait]
    impl BackendDriver for FakeDriver {
        fn driver_name(&self) -> &'static str {
            "fake"
        }
        async fn open(
            &self,
            _details: &ConnectionDetails,
        ) -> Result<(Box<dyn BackendConnection>, Box<dyn XaResourceHandle>)> {
            Ok((
                Box::new(FakeConnection {
                    isolation: IsolationLevel::ReadCommitted,
                }),
                Box::new(FakeXaResource),
            ))
        }
    }

    fn test_server() -> Server {
        Server::new(Arc::new(FakeDriver), ProviderRegistry::new(vec![]))
    }

    fn connection_details(is_xa: bool) -> ConnectionDetails {
        ConnectionDetails {
            url: "jdbc:fake://db".into(),
            user: "scott".into(),
            password: "tiger".into(),
            is_xa,
            server_endpoints: vec!["a".into()],
            cluster_health: "a=UP".into(),
            properties: Default::default(),
        }
    }

    #[tokio::test]
    async fn connect_non_xa_is_lazy_and_execute_update_allocates_on_first_use() {
        let server = test_server();
        let session = server.connect(connection_details(false), ClientUuid::new("c1")).await.unwrap();
        assert!(!session.is_xa);

        let request = StatementRequest {
            session: session.clone(),
            sql: "UPDATE t SET x = 1".into(),
            params: vec![],
        };
        let result = server.execute_update(request).await.unwrap();
        assert!(matches!(result, OpResult::UpdateCount(1)));
    }

    #[tokio::test]
    async fn connect_xa_eagerly_allocates_and_two_phase_commit_round_trips() {
        let server = test_server();
        let session = server.connect(connection_details(true), ClientUuid::new("c1")).await.unwrap();
        assert!(session.is_xa);

        let xid = crate::xa::WireXid {
            format_id: 1,
            global_transaction_id: vec![1],
            branch_qualifier: vec![1],
        };
        let start_request = XaRequest {
            session: session.clone(),
            xid: xid.clone(),
            flags: crate::xa::flags::TMNOFLAGS,
            one_phase: false,
        };
        server.xa_start(start_request).await.unwrap();

        let end_request = XaRequest {
            session: session.clone(),
            xid: xid.clone(),
            flags: crate::xa::flags::TMSUCCESS,
            one_phase: false,
        };
        server.xa_end(end_request).await.unwrap();

        let prepare_request = XaRequest {
            session: session.clone(),
            xid: xid.clone(),
            flags: 0,
            one_phase: false,
        };
        let read_only = server.xa_prepare(prepare_request).await.unwrap();
        assert!(!read_only);

        let commit_request = XaRequest {
            session: session.clone(),
            xid,
            flags: 0,
            one_phase: false,
        };
        server.xa_commit(commit_request).await.unwrap();

        let report = server.terminate_session(&session.session_uuid).await;
        assert!(report.found);
        assert_eq!(report.backend_sessions_returned, 1);
    }

    #[tokio::test]
    async fn terminate_unknown_session_is_idempotent() {
        let server = test_server();
        let report = server.terminate_session(&crate::common::SessionUuid::new("missing")).await;
        assert!(!report.found);
    }
}
