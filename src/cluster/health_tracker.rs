//! `ClusterHealthTracker` (`spec.md` §4.6): interprets the per-request
//! cluster-health string and detects changes that must trigger a local pool
//! resize.
//!
//! The wire format of the cluster-health string is left unspecified by
//! `spec.md` ("opaque to server except for change detection"); this
//! implementation adopts `endpoint=UP|DOWN` comma-separated pairs, the
//! simplest encoding that still lets the server derive a healthy-peer count
//! without needing to agree on a peer list out of band — recorded as an
//! Open-Question resolution in DESIGN.md, not guessed silently.

use dashmap::DashMap;

use crate::cluster::pool_coordinator::MultinodePoolCoordinator;
use crate::cluster::xa_coordinator::MultinodeXaCoordinator;
use crate::common::ConnHash;
use crate::pool::PoolHandle;
use crate::xa::XaTransactionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHealth(pub String);

impl ClusterHealth {
    /// Number of peers marked `UP`. A malformed or empty string counts as
    /// zero peers known, which the coordinators floor to an allocation of 1.
    pub fn healthy_peer_count(&self) -> usize {
        self.0
            .split(',')
            .filter(|entry| entry.trim().to_ascii_uppercase().ends_with("=UP"))
            .count()
    }
}

#[derive(Default)]
pub struct ClusterHealthTracker {
    last_seen: DashMap<ConnHash, ClusterHealth>,
}

pub struct ResizeOutcome {
    pub resized: bool,
    pub max_pool_size: usize,
    pub min_idle: usize,
}

impl ClusterHealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `processClusterHealth`: no-op if `health` is unchanged since the last
    /// call for `conn_hash`; otherwise recomputes the allocation via
    /// `pool_coordinator` and applies it to `pool` (if a non-XA pool exists
    /// for this `connHash`) and to `xa_coordinator`/`xa_registry` (if an XA
    /// registry exists). Resizing is idempotent, matching `spec.md` §4.6.
    pub async fn process_cluster_health(
        &self,
        conn_hash: &ConnHash,
        health: ClusterHealth,
        declared_max: usize,
        declared_min: usize,
        pool_coordinator: &MultinodePoolCoordinator,
        pool: Option<&PoolHandle>,
        xa_coordinator: &MultinodeXaCoordinator,
        xa_registry: Option<&XaTransactionRegistry>,
    ) -> ResizeOutcome {
        let unchanged = self
            .last_seen
            .get(conn_hash)
            .map(|seen| *seen == health)
            .unwrap_or(false);

        if unchanged {
            return ResizeOutcome {
                resized: false,
                max_pool_size: declared_max,
                min_idle: declared_min,
            };
        }

        let healthy_peers = health.healthy_peer_count().max(1);
        self.last_seen.insert(conn_hash.clone(), health);

        let sizes = pool_coordinator.calculate_pool_sizes(conn_hash.clone(), declared_max, declared_min, healthy_peers);
        if let Some(pool) = pool {
            pool.resize(sizes.max_pool_size, sizes.min_idle).await;
        }

        let xa_max = xa_coordinator.calculate_xa_limits(conn_hash.clone(), declared_max, healthy_peers);
        if let Some(xa_registry) = xa_registry {
            xa_registry.resize_backend_pool(xa_max, sizes.min_idle).await;
        }

        ResizeOutcome {
            resized: true,
            max_pool_size: sizes.max_pool_size,
            min_idle: sizes.min_idle,
        }
    }
}
