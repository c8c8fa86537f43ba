//! `MultinodePoolCoordinator` (`spec.md` §4.6): on each server, divides
//! declared pool sizes evenly by the count of healthy peer endpoints.

use dashmap::DashMap;

use crate::common::ConnHash;

#[derive(Debug, Clone, Copy)]
pub struct PoolSizes {
    pub max_pool_size: usize,
    pub min_idle: usize,
}

fn ceil_div_floor_one(declared: usize, healthy_peers: usize) -> usize {
    if healthy_peers == 0 {
        return declared.max(1);
    }
    declared.div_ceil(healthy_peers).max(1)
}

#[derive(Default)]
pub struct MultinodePoolCoordinator {
    allocations: DashMap<ConnHash, PoolSizes>,
}

impl MultinodePoolCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current allocation = `ceil(declared / healthyPeers)` with floor 1.
    /// Records per-`connHash` state so a later call (after a further health
    /// change) can recompute from the same declared sizes.
    pub fn calculate_pool_sizes(
        &self,
        conn_hash: ConnHash,
        declared_max: usize,
        declared_min: usize,
        healthy_peers: usize,
    ) -> PoolSizes {
        let sizes = PoolSizes {
            max_pool_size: ceil_div_floor_one(declared_max, healthy_peers),
            min_idle: ceil_div_floor_one(declared_min, healthy_peers),
        };
        self.allocations.insert(conn_hash, sizes);
        sizes
    }

    pub fn current_allocation(&self, conn_hash: &ConnHash) -> Option<PoolSizes> {
        self.allocations.get(conn_hash).map(|v| *v.value())
    }
}
