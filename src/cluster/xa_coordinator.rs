//! `MultinodeXaCoordinator` (`spec.md` §4.6): analogous to
//! `MultinodePoolCoordinator` for XA transaction limits.

use dashmap::DashMap;

use crate::common::ConnHash;

fn ceil_div_floor_one(declared: usize, healthy_peers: usize) -> usize {
    if healthy_peers == 0 {
        return declared.max(1);
    }
    declared.div_ceil(healthy_peers).max(1)
}

#[derive(Default)]
pub struct MultinodeXaCoordinator {
    allocations: DashMap<ConnHash, usize>,
}

impl MultinodeXaCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calculate_xa_limits(&self, conn_hash: ConnHash, declared_max: usize, healthy_peers: usize) -> usize {
        let limit = ceil_div_floor_one(declared_max, healthy_peers);
        self.allocations.insert(conn_hash, limit);
        limit
    }

    pub fn current_limit(&self, conn_hash: &ConnHash) -> Option<usize> {
        self.allocations.get(conn_hash).map(|v| *v.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recomputes_limit_on_healthy_peer_change() {
        let coordinator = MultinodeXaCoordinator::new();
        let hash = ConnHash::new("h1");
        assert_eq!(coordinator.calculate_xa_limits(hash.clone(), 22, 2), 11);
        assert_eq!(coordinator.calculate_xa_limits(hash, 22, 1), 22);
    }
}
