//! Multinode client-side connection manager (`spec.md` §4.7): sticky XA
//! routing, health-based failover, load-aware selection, and connection
//! invalidation on server recovery.
//!
//! Grounded on `networking/health/checker.rs` (time-gated health polling
//! with a single in-flight check) and `networking/health/recovery.rs` (the
//! recovery-triggered rebalance), and on
//! `networking/loadbalancer/{mod,retry}.rs` for the fewest-connections
//! selection style.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::common::SessionUuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerEndpoint(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Healthy,
    Unhealthy { since: Instant },
}

struct EndpointState {
    health: Health,
    session_count: usize,
}

/// Abstraction over "open a validation connection and run the health
/// query" so the manager is testable without a real backend. Grounded on
/// the teacher's health checker's pluggable probe function.
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &ServerEndpoint, timeout: Duration) -> bool;
}

pub struct ConnectionManagerConfig {
    pub health_check_threshold: Duration,
    pub health_check_timeout: Duration,
    pub loadaware_selection_enabled: bool,
    pub connection_unified_enabled: bool,
}

pub struct ClosurePlan {
    pub stale_bindings_removed: Vec<SessionUuid>,
    pub force_invalidated: Vec<SessionUuid>,
}

pub struct ConnectionManager {
    config: ConnectionManagerConfig,
    endpoints: DashMap<ServerEndpoint, EndpointState>,
    /// Sticky XA routing: sessionUUID → the endpoint it is bound to.
    session_tracker: DashMap<SessionUuid, ServerEndpoint>,
    force_invalid: DashSet<SessionUuid>,
    round_robin_cursor: AtomicU64,
    /// Single-in-flight gate for the periodic health check, implemented as
    /// a compare-and-set on "is a check currently running", matching
    /// `spec.md` §4.7's "one in-flight at a time via a compare-and-set."
    health_check_in_flight: AtomicBool,
    last_check_at: Mutex<Option<Instant>>,
}

impl ConnectionManager {
    pub fn new(endpoints: Vec<ServerEndpoint>, config: ConnectionManagerConfig) -> Self {
        let map = DashMap::new();
        for endpoint in endpoints {
            map.insert(
                endpoint,
                EndpointState {
                    health: Health::Healthy,
                    session_count: 0,
                },
            );
        }
        Self {
            config,
            endpoints: map,
            session_tracker: DashMap::new(),
            force_invalid: DashSet::new(),
            round_robin_cursor: AtomicU64::new(0),
            health_check_in_flight: AtomicBool::new(false),
            last_check_at: Mutex::new(None),
        }
    }

    pub fn healthy_endpoints(&self) -> Vec<ServerEndpoint> {
        self.endpoints
            .iter()
            .filter(|e| e.value().health == Health::Healthy)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Selects the endpoint for a new XA connection: fewest-sessions among
    /// healthy endpoints when load-aware selection is enabled, else
    /// round-robin over the healthy set.
    pub fn select_xa_endpoint(&self) -> Option<ServerEndpoint> {
        let healthy = self.healthy_endpoints();
        if healthy.is_empty() {
            return None;
        }
        if self.config.loadaware_selection_enabled {
            healthy
                .into_iter()
                .min_by_key(|e| self.endpoints.get(e).map(|s| s.session_count).unwrap_or(usize::MAX))
        } else {
            let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) as usize % healthy.len();
            Some(healthy[idx].clone())
        }
    }

    pub fn bind_session(&self, session_uuid: SessionUuid, endpoint: ServerEndpoint) {
        if let Some(mut state) = self.endpoints.get_mut(&endpoint) {
            state.session_count += 1;
        }
        self.session_tracker.insert(session_uuid, endpoint);
    }

    pub fn unbind_session(&self, session_uuid: &SessionUuid) {
        if let Some((_, endpoint)) = self.session_tracker.remove(session_uuid) {
            if let Some(mut state) = self.endpoints.get_mut(&endpoint) {
                state.session_count = state.session_count.saturating_sub(1);
            }
        }
        self.force_invalid.remove(session_uuid);
    }

    pub fn is_force_invalid(&self, session_uuid: &SessionUuid) -> bool {
        self.force_invalid.contains(session_uuid)
    }

    /// Time-gated, single-in-flight periodic check (`spec.md` §4.7). Returns
    /// `None` if a check is already running or no unhealthy endpoint has
    /// aged past `health_check_threshold` yet.
    pub async fn run_health_check(&self, probe: &dyn HealthProbe, cancelled: impl Fn() -> bool) -> Option<Vec<ClosurePlan>> {
        if self
            .health_check_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let _guard = scopeguard(&self.health_check_in_flight);

        *self.last_check_at.lock() = Some(Instant::now());

        let stale: Vec<ServerEndpoint> = self
            .endpoints
            .iter()
            .filter_map(|e| match e.value().health {
                Health::Unhealthy { since } if since.elapsed() >= self.config.health_check_threshold => {
                    Some(e.key().clone())
                }
                _ => None,
            })
            .collect();

        let mut plans = Vec::new();
        for endpoint in stale {
            if cancelled() {
                break;
            }
            if probe.probe(&endpoint, self.config.health_check_timeout).await {
                plans.push(self.on_endpoint_recovered(&endpoint));
            }
        }
        Some(plans)
    }

    pub fn mark_unhealthy(&self, endpoint: &ServerEndpoint) {
        if let Some(mut state) = self.endpoints.get_mut(endpoint) {
            if state.health == Health::Healthy {
                warn!(endpoint = %endpoint.0, "endpoint marked unhealthy");
            }
            state.health = Health::Unhealthy { since: Instant::now() };
        }
    }

    /// `spec.md` §8 scenario 5: on recovery, (a) remove every session
    /// binding to the recovered endpoint from the tracker, (b) mark a
    /// balanced subset of sessions on other endpoints as force-invalid so
    /// future acquisitions rebalance onto the recovered endpoint.
    fn on_endpoint_recovered(&self, endpoint: &ServerEndpoint) -> ClosurePlan {
        if let Some(mut state) = self.endpoints.get_mut(endpoint) {
            state.health = Health::Healthy;
        }
        info!(endpoint = %endpoint.0, "endpoint recovered");

        let stale_bindings_removed: Vec<SessionUuid> = self
            .session_tracker
            .iter()
            .filter(|e| e.value() == endpoint)
            .map(|e| e.key().clone())
            .collect();
        for session_uuid in &stale_bindings_removed {
            self.session_tracker.remove(session_uuid);
        }
        if let Some(mut state) = self.endpoints.get_mut(endpoint) {
            state.session_count = 0;
        }

        let force_invalidated = self.compute_balanced_closure_plan();
        ClosurePlan {
            stale_bindings_removed,
            force_invalidated,
        }
    }

    fn compute_balanced_closure_plan(&self) -> Vec<SessionUuid> {
        let healthy = self.healthy_endpoints();
        if healthy.is_empty() {
            return Vec::new();
        }
        let total: usize = healthy
            .iter()
            .map(|e| self.endpoints.get(e).map(|s| s.session_count).unwrap_or(0))
            .sum();
        let target = total.div_ceil(healthy.len());

        let mut to_invalidate = Vec::new();
        let mut per_endpoint_excess: HashMap<ServerEndpoint, usize> = HashMap::new();
        for endpoint in &healthy {
            let count = self.endpoints.get(endpoint).map(|s| s.session_count).unwrap_or(0);
            if count > target {
                per_endpoint_excess.insert(endpoint.clone(), count - target);
            }
        }

        for entry in self.session_tracker.iter() {
            let endpoint = entry.value().clone();
            if let Some(remaining) = per_endpoint_excess.get_mut(&endpoint) {
                if *remaining > 0 {
                    to_invalidate.push(entry.key().clone());
                    *remaining -= 1;
                }
            }
        }

        for session_uuid in &to_invalidate {
            self.force_invalid.insert(session_uuid.clone());
        }
        to_invalidate
    }
}

struct ResetFlagOnDrop<'a>(&'a AtomicBool);

impl Drop for ResetFlagOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn scopeguard(flag: &AtomicBool) -> ResetFlagOnDrop<'_> {
    ResetFlagOnDrop(flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysUp;

    #[async_trait::async_trait]
    impl HealthProbe for AlwaysUp {
        async fn probe(&self, _endpoint: &ServerEndpoint, _timeout: Duration) -> bool {
            true
        }
    }

    fn config() -> ConnectionManagerConfig {
        ConnectionManagerConfig {
            health_check_threshold: Duration::from_millis(0),
            health_check_timeout: Duration::from_millis(100),
            loadaware_selection_enabled: true,
            connection_unified_enabled: true,
        }
    }

    #[test]
    fn load_aware_picks_fewest_sessions_endpoint() {
        let manager = ConnectionManager::new(
            vec![ServerEndpoint("a".into()), ServerEndpoint("b".into())],
            config(),
        );
        manager.bind_session(SessionUuid::new("s1"), ServerEndpoint("a".into()));
        let chosen = manager.select_xa_endpoint().unwrap();
        assert_eq!(chosen, ServerEndpoint("b".into()));
    }

    #[tokio::test]
    async fn recovery_clears_stale_bindings_and_rebalances() {
        let manager = ConnectionManager::new(
            vec![ServerEndpoint("a".into()), ServerEndpoint("b".into()), ServerEndpoint("c".into())],
            config(),
        );
        manager.bind_session(SessionUuid::new("s1"), ServerEndpoint("b".into()));
        manager.bind_session(SessionUuid::new("s2"), ServerEndpoint("b".into()));
        manager.bind_session(SessionUuid::new("s3"), ServerEndpoint("c".into()));
        manager.mark_unhealthy(&ServerEndpoint("a".into()));

        let plans = manager.run_health_check(&AlwaysUp, || false).await.unwrap();
        assert_eq!(plans.len(), 1);
        assert!(!plans[0].force_invalidated.is_empty());
        assert!(manager.is_force_invalid(&plans[0].force_invalidated[0]));
    }

    #[tokio::test]
    async fn concurrent_check_does_not_run_twice() {
        let manager = ConnectionManager::new(vec![ServerEndpoint("a".into())], config());
        manager.mark_unhealthy(&ServerEndpoint("a".into()));
        manager.health_check_in_flight.store(true, Ordering::SeqCst);
        let result = manager.run_health_check(&AlwaysUp, || false).await;
        assert!(result.is_none());
    }
}
