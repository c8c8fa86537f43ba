//! `SessionObjectRegistry`: per-session tables of opened statements, result
//! sets, LOBs, and free-form attributes (`spec.md` §3, §4.1).
//!
//! Grounded on the teacher's catalog-style registries (freshly generated
//! numeric/string handles mapped to owned objects in a concurrent map) —
//! here scoped down to one instance per `Session` rather than one shared
//! instance per server, since every item here shares exactly one session's
//! lifetime (`spec.md` §3: "All items share the session's lifetime and are
//! closed on termination").

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// A generated handle for an item registered in a `SessionObjectRegistry`.
/// Distinct handle types per item kind so a `StatementHandle` can never be
/// confused with a `ResultSetHandle` at compile time.
macro_rules! handle_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle_type!(StatementHandle);
handle_type!(ResultSetHandle);
handle_type!(LobHandle);

/// A statement, prepared statement, or callable statement. Distinguished by
/// `kind` rather than three separate tables, since all three close the same
/// way and the RPC layer never needs to iterate "just the prepared ones."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Plain,
    Prepared,
    Callable,
}

pub struct OpenStatement {
    pub kind: StatementKind,
    pub sql: String,
}

/// A LOB (BLOB/CLOB/binary stream) externalized to the client as a handle
/// (`spec.md` §4.5).
pub struct OpenLob {
    pub backend_locator: Vec<u8>,
    /// Set once an upload stream has signaled end-of-data; the
    /// producer/consumer race described in `spec.md` §5 is resolved by
    /// polling this flag from `SessionManager::wait_lob_streams_consumption`.
    pub fully_consumed: bool,
}

#[derive(Default)]
pub struct SessionObjectRegistry {
    next_handle: AtomicU64,
    statements: DashMap<StatementHandle, OpenStatement>,
    result_sets: DashMap<ResultSetHandle, ()>,
    lobs: DashMap<LobHandle, OpenLob>,
    attributes: DashMap<String, String>,
}

impl SessionObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_statement(&self, kind: StatementKind, sql: impl Into<String>) -> StatementHandle {
        let handle = StatementHandle(self.fresh_handle());
        self.statements.insert(handle, OpenStatement { kind, sql: sql.into() });
        handle
    }

    pub fn register_result_set(&self) -> ResultSetHandle {
        let handle = ResultSetHandle(self.fresh_handle());
        self.result_sets.insert(handle, ());
        handle
    }

    pub fn register_lob(&self, backend_locator: Vec<u8>) -> LobHandle {
        let handle = LobHandle(self.fresh_handle());
        self.lobs.insert(
            handle,
            OpenLob {
                backend_locator,
                fully_consumed: false,
            },
        );
        handle
    }

    pub fn mark_lob_consumed(&self, handle: LobHandle) {
        if let Some(mut lob) = self.lobs.get_mut(&handle) {
            lob.fully_consumed = true;
        }
    }

    pub fn has_unconsumed_lob_streams(&self) -> bool {
        self.lobs.iter().any(|e| !e.value().fully_consumed)
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn get_attribute(&self, key: &str) -> Option<String> {
        self.attributes.get(key).map(|v| v.value().clone())
    }

    pub fn statement(&self, handle: StatementHandle) -> Option<dashmap::mapref::one::Ref<'_, StatementHandle, OpenStatement>> {
        self.statements.get(&handle)
    }

    /// Closes every statement, result set, and LOB, in that order, matching
    /// `spec.md` §4.1 `terminateSession`'s close ordering. Errors from
    /// individual closes are collected, not propagated — the caller logs
    /// them but must continue closing the rest.
    pub fn close_all(&self) -> Vec<String> {
        let mut errors = Vec::new();
        self.result_sets.clear();
        self.statements.clear();
        for entry in self.lobs.iter() {
            if !entry.value().fully_consumed {
                errors.push(format!("lob {} closed before consumption completed", entry.key()));
            }
        }
        self.lobs.clear();
        errors
    }

    #[cfg(test)]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_distinct_and_monotonic() {
        let registry = SessionObjectRegistry::new();
        let s1 = registry.register_statement(StatementKind::Plain, "select 1");
        let s2 = registry.register_statement(StatementKind::Prepared, "select ?");
        assert_ne!(s1, s2);
        assert!(registry.statement(s1).is_some());
    }

    #[test]
    fn lob_consumption_gate() {
        let registry = SessionObjectRegistry::new();
        let lob = registry.register_lob(vec![1, 2, 3]);
        assert!(registry.has_unconsumed_lob_streams());
        registry.mark_lob_consumed(lob);
        assert!(!registry.has_unconsumed_lob_streams());
    }

    #[test]
    fn attributes_round_trip() {
        let registry = SessionObjectRegistry::new();
        registry.set_attribute("k", "v");
        assert_eq!(registry.get_attribute("k"), Some("v".to_string()));
        assert_eq!(registry.attribute_count(), 1);
    }
}
