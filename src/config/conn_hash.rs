//! `ConnHash`: deterministic hash of normalized connection configuration
//! (`spec.md` §3). Two clients with identical effective configuration share
//! the same server-side pool.
//!
//! Grounded on the teacher's content-addressing helpers (stable hashing of a
//! normalized key before using it as a map key) — here built on
//! `std::collections::hash_map::DefaultHasher` over an explicit field list
//! rather than deriving `Hash` on a struct, so the set of fields that
//! participate in the hash is a single visible list instead of "whatever
//! fields the struct happens to have."

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::common::ConnHash;

/// The fields that determine whether two `connect` calls may share a
/// server-side pool. `password` participates because the pool's backend
/// connections are opened with it; two callers with different credentials
/// must not share connections even if every other field matches.
pub struct ConnIdentity<'a> {
    pub url: &'a str,
    pub user: &'a str,
    pub password: &'a str,
    pub max_pool_size: usize,
    pub min_idle: usize,
    pub default_isolation: crate::common::IsolationLevel,
}

fn normalize_url(url: &str) -> String {
    url.trim().to_ascii_lowercase()
}

pub fn compute_conn_hash(identity: &ConnIdentity<'_>) -> ConnHash {
    let mut hasher = DefaultHasher::new();
    normalize_url(identity.url).hash(&mut hasher);
    identity.user.hash(&mut hasher);
    identity.password.hash(&mut hasher);
    identity.max_pool_size.hash(&mut hasher);
    identity.min_idle.hash(&mut hasher);
    identity.default_isolation.hash(&mut hasher);
    ConnHash::new(format!("{:016x}", hasher.finish()))
}
