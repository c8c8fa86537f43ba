//! `XATransactionRegistry` (`spec.md` §4.2): maps `XidKey` → `TxContext`,
//! enforces the XA state machine, binds/unbinds `BackendSession`s to
//! branches, and resizes the backend pool.
//!
//! Grounded on the teacher's `TwoPhaseCommitCoordinator` in
//! `transaction/distributed.rs` for the overall shape (a concurrent map of
//! in-flight transactions plus a stats block), but the locking strategy is
//! new: the teacher takes one `RwLock` over the whole `active_txns` map for
//! every mutation, which would serialize unrelated `XidKey`s against each
//! other. `spec.md` §5/§8 requires "concurrent mutations on different
//! XidKeys run in parallel," so here each `TxContext` gets its own
//! `tokio::sync::Mutex` behind a `DashMap`, and the map itself is only
//! touched (briefly, synchronously) to insert/remove entries.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::common::SessionUuid;
use crate::error::{OjpError, Result, XaErrorCode};
use crate::pool::{BackendSession, PoolHandle};
use crate::xa::flags::{TMJOIN, TMRESUME};
use crate::xa::state::{TxContext, TxState};
use crate::xa::xid::XidKey;

/// Outcome of a register/start call that a caller (the `connect` action, in
/// particular) needs to distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Started,
    Joined,
    Resumed,
}

/// Configuration knob for `xaStart` pool-borrow waits (`spec.md` §4.2).
#[derive(Debug, Clone, Copy)]
pub struct XaStartTimeout(pub Duration);

impl Default for XaStartTimeout {
    fn default() -> Self {
        Self(Duration::from_secs(10))
    }
}

pub struct XaTransactionRegistry {
    pool: PoolHandle,
    contexts: DashMap<XidKey, Arc<Mutex<TxContext>>>,
    /// Backend sessions whose owning OJP Session still holds them after
    /// their XA branch went terminal — released only by
    /// `return_completed_sessions` (`spec.md` §4.2's dual-condition rule).
    owned_sessions: DashMap<SessionUuid, BackendSession>,
    xa_start_timeout: XaStartTimeout,
}

impl XaTransactionRegistry {
    pub fn new(pool: PoolHandle, xa_start_timeout: XaStartTimeout) -> Self {
        Self {
            pool,
            contexts: DashMap::new(),
            owned_sessions: DashMap::new(),
            xa_start_timeout,
        }
    }

    /// Registers a `BackendSession` the caller already holds (the eager
    /// allocation done by the `connect` action) as the backing session for
    /// a fresh branch, instead of borrowing a new one from the pool
    /// (`spec.md` §4.2 `registerExistingSession`). Mutually exclusive with
    /// `xa_start(NOFLAGS)` for the same `XidKey` — the second caller gets
    /// `XAER_DUPID`.
    pub async fn register_existing_session(
        &self,
        xid: XidKey,
        owner_session_uuid: SessionUuid,
        mut session: BackendSession,
    ) -> Result<()> {
        if self.contexts.contains_key(&xid) {
            self.pool.invalidate_session(session).await;
            return Err(OjpError::xa_with(XaErrorCode::XaerDupId, "xid already registered"));
        }

        if let Err(e) = session
            .xa_resource_mut()
            .start(&xid, crate::xa::flags::TMNOFLAGS)
            .await
        {
            self.pool.invalidate_session(session).await;
            return Err(e);
        }

        let ctx = Arc::new(Mutex::new(TxContext::new(xid.clone(), session, owner_session_uuid)));
        self.contexts.insert(xid, ctx);
        Ok(())
    }

    /// `spec.md` §4.2 `xaStart`.
    pub async fn xa_start(
        &self,
        xid: XidKey,
        flags: u32,
        owner_session_uuid: SessionUuid,
    ) -> Result<RegisterOutcome> {
        if flags & (TMJOIN | TMRESUME) != 0 {
            let Some(ctx) = self.contexts.get(&xid).map(|e| e.value().clone()) else {
                return Err(OjpError::xa(XaErrorCode::XaerProto));
            };
            let mut guard = ctx.lock().await;
            let required = if flags & TMRESUME != 0 { TxState::Ended } else { TxState::Active };
            if guard.state != required || !guard.state.can_transition(TxState::Active) {
                return Err(OjpError::xa(XaErrorCode::XaerProto));
            }
            let session = guard
                .session
                .as_mut()
                .expect("ACTIVE/ENDED TxContext must hold a session");
            session.xa_resource_mut().start(&xid, flags).await?;
            guard.set_state(TxState::Active);
            return Ok(if flags & TMRESUME != 0 {
                RegisterOutcome::Resumed
            } else {
                RegisterOutcome::Joined
            });
        }

        // NOFLAGS: require NONEXISTENT (no live TxContext for this xid).
        if self.contexts.contains_key(&xid) {
            return Err(OjpError::xa(XaErrorCode::XaerDupId));
        }

        let mut session = if let Some((_, reused)) = self.owned_sessions.remove(&owner_session_uuid) {
            reused
        } else {
            let borrowed = tokio::time::timeout(self.xa_start_timeout.0, self.pool.borrow())
                .await
                .map_err(|_| OjpError::xa(XaErrorCode::XaerRmFail))?;
            borrowed.map_err(|_| OjpError::xa(XaErrorCode::XaerRmFail))?
        };

        if let Err(e) = session.xa_resource_mut().start(&xid, flags).await {
            self.pool.invalidate_session(session).await;
            return Err(e);
        }

        let ctx = Arc::new(Mutex::new(TxContext::new(xid.clone(), session, owner_session_uuid)));
        self.contexts.insert(xid, ctx);
        Ok(RegisterOutcome::Started)
    }

    /// `spec.md` §4.2 `xaEnd`.
    pub async fn xa_end(&self, xid: &XidKey, flags: u32) -> Result<()> {
        let ctx = self.context_or_proto(xid)?;
        let mut guard = ctx.lock().await;
        if guard.state != TxState::Active || !guard.state.can_transition(TxState::Ended) {
            return Err(OjpError::xa(XaErrorCode::XaerProto));
        }
        guard
            .session
            .as_mut()
            .expect("ACTIVE TxContext must hold a session")
            .xa_resource_mut()
            .end(xid, flags)
            .await?;
        guard.set_state(TxState::Ended);
        Ok(())
    }

    /// `spec.md` §4.2 `xaPrepare`. Returns `true` for `XA_RDONLY`.
    pub async fn xa_prepare(&self, xid: &XidKey) -> Result<bool> {
        let ctx = self.context_or_proto(xid)?;
        let mut guard = ctx.lock().await;
        if guard.state != TxState::Ended || !guard.state.can_transition(TxState::Prepared) {
            return Err(OjpError::xa(XaErrorCode::XaerProto));
        }
        let read_only = guard
            .session
            .as_mut()
            .expect("ENDED TxContext must hold a session")
            .xa_resource_mut()
            .prepare(xid)
            .await?;

        if read_only {
            let owner = guard.owner_session_uuid.clone();
            let released = guard.set_state(TxState::Committed);
            drop(guard);
            self.contexts.remove(xid);
            if let Some(session) = released {
                self.stash_for_owner(owner, session);
            }
        } else {
            guard.set_state(TxState::Prepared);
        }
        Ok(read_only)
    }

    /// `spec.md` §4.2 `xaCommit`.
    pub async fn xa_commit(&self, xid: &XidKey, one_phase: bool) -> Result<()> {
        let ctx = self.context_or_proto(xid)?;
        let mut guard = ctx.lock().await;
        let legal_from = if one_phase {
            matches!(guard.state, TxState::Active | TxState::Ended)
        } else {
            guard.state == TxState::Prepared
        };
        if !legal_from || !guard.state.can_transition(TxState::Committed) {
            return Err(OjpError::xa(XaErrorCode::XaerProto));
        }
        guard
            .session
            .as_mut()
            .expect("pinned TxContext must hold a session")
            .xa_resource_mut()
            .commit(xid, one_phase)
            .await?;
        let owner = guard.owner_session_uuid.clone();
        let released = guard.set_state(TxState::Committed);
        drop(guard);
        self.contexts.remove(xid);
        if let Some(session) = released {
            self.stash_for_owner(owner, session);
        }
        Ok(())
    }

    /// `spec.md` §4.2 `xaRollback`.
    pub async fn xa_rollback(&self, xid: &XidKey) -> Result<()> {
        let ctx = self.context_or_proto(xid)?;
        let mut guard = ctx.lock().await;
        let legal_from = matches!(guard.state, TxState::Active | TxState::Ended | TxState::Prepared);
        if !legal_from || !guard.state.can_transition(TxState::RolledBack) {
            return Err(OjpError::xa(XaErrorCode::XaerProto));
        }
        guard
            .session
            .as_mut()
            .expect("pinned TxContext must hold a session")
            .xa_resource_mut()
            .rollback(xid)
            .await?;
        let owner = guard.owner_session_uuid.clone();
        let released = guard.set_state(TxState::RolledBack);
        drop(guard);
        self.contexts.remove(xid);
        if let Some(session) = released {
            self.stash_for_owner(owner, session);
        }
        Ok(())
    }

    /// `spec.md` §4.2 `xaRecover`: delegates to any bound session, or
    /// borrows a scratch session if none is bound.
    pub async fn xa_recover(&self, _flags: u32) -> Result<Vec<XidKey>> {
        if let Some(entry) = self.contexts.iter().next() {
            let ctx = entry.value().clone();
            drop(entry);
            let mut guard = ctx.lock().await;
            if let Some(session) = guard.session.as_mut() {
                return session.xa_resource_mut().recover().await;
            }
        }

        let mut scratch = self.pool.borrow().await?;
        let result = scratch.xa_resource_mut().recover().await;
        self.pool.return_session(scratch).await;
        result
    }

    /// `spec.md` §4.2 `resizeBackendPool`.
    pub async fn resize_backend_pool(&self, new_max: usize, new_min: usize) {
        self.pool.resize(new_max, new_min).await;
    }

    /// `spec.md` §4.2 `returnCompletedSessions`: called on OJP Session
    /// termination. Returns the count of `BackendSession`s returned.
    pub async fn return_completed_sessions(&self, owner_session_uuid: &SessionUuid) -> usize {
        // Any TxContext still live (not yet terminal) for this owner keeps
        // its session pinned — dual-condition rule (spec.md §4.2).
        let still_pinned = self
            .contexts
            .iter()
            .any(|e| e.value().try_lock().map(|g| &g.owner_session_uuid == owner_session_uuid).unwrap_or(true));

        if still_pinned {
            warn!(owner = %owner_session_uuid, "session terminated with an open XA branch still pinning a backend session");
        }

        if let Some((_, session)) = self.owned_sessions.remove(owner_session_uuid) {
            if session.is_invalidated() {
                self.pool.invalidate_session(session).await;
            } else {
                self.pool.return_session(session).await;
            }
            info!(owner = %owner_session_uuid, "returned completed XA backend session to pool");
            1
        } else {
            0
        }
    }

    fn context_or_proto(&self, xid: &XidKey) -> Result<Arc<Mutex<TxContext>>> {
        self.contexts
            .get(xid)
            .map(|e| e.value().clone())
            .ok_or_else(|| OjpError::xa(XaErrorCode::XaerProto))
    }

    /// Parks a just-terminated branch's `BackendSession` under its owning
    /// Session until `return_completed_sessions` hands it back to the pool
    /// (`spec.md` §4.2 dual-condition release rule).
    fn stash_for_owner(&self, owner_session_uuid: SessionUuid, session: BackendSession) {
        self.owned_sessions.insert(owner_session_uuid, session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::IsolationLevel;
    use crate::pool::{BackendConnection, BackendSession, PoolStatistics, XaResourceHandle};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    struct FakeConnection;

    #[async_trait::async_trait]
    impl BackendConnection for FakeConnection {
        async fn reset(&mut self) -> Result<()> {
            Ok(())
        }
        async fn is_valid(&mut self) -> bool {
            true
        }
        async fn set_isolation(&mut self, _level: IsolationLevel) -> Result<()> {
            Ok(())
        }
        fn isolation(&self) -> IsolationLevel {
            IsolationLevel::ReadCommitted
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
            Ok(0)
        }
        async fn execute_query(
            &mut self,
            _sql: &str,
        ) -> Result<(Vec<crate::streaming::ColumnDescriptor>, Vec<crate::streaming::RawRow>)> {
            Ok((vec![], vec![]))
        }
        async fn close(&mut self) {}
    }

    struct FakeXaResource;

    #[async_trait::async_trait]
    impl XaResourceHandle for FakeXaResource {
        async fn start(&mut self, _xid: &XidKey, _flags: u32) -> Result<()> {
            Ok(())
        }
        async fn end(&mut self, _xid: &XidKey, _flags: u32) -> Result<()> {
            Ok(())
        }
        async fn prepare(&mut self, _xid: &XidKey) -> Result<bool> {
            Ok(false)
        }
        async fn commit(&mut self, _xid: &XidKey, _one_phase: bool) -> Result<()> {
            Ok(())
        }
        async fn rollback(&mut self, _xid: &XidKey) -> Result<()> {
            Ok(())
        }
        async fn recover(&mut self) -> Result<Vec<XidKey>> {
            Ok(vec![])
        }
    }

    /// Minimal `ManagedPool` fake with a fixed capacity, for exercising the
    /// registry's own state-machine and dual-condition-release logic in
    /// isolation from any real pooling implementation.
    struct FakePool {
        capacity: usize,
        borrowed: AtomicUsize,
        next_id: AtomicU64,
    }

    #[async_trait::async_trait]
    impl crate::pool::ManagedPool for FakePool {
        async fn borrow(&self) -> Result<BackendSession> {
            if self.borrowed.fetch_add(1, Ordering::SeqCst) >= self.capacity {
                self.borrowed.fetch_sub(1, Ordering::SeqCst);
                return Err(crate::pool::pool_exhausted(Duration::from_millis(0)));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(BackendSession::new(id, Box::new(FakeConnection), Box::new(FakeXaResource)))
        }
        async fn return_session(&self, _session: BackendSession) {
            self.borrowed.fetch_sub(1, Ordering::SeqCst);
        }
        async fn invalidate_session(&self, _session: BackendSession) {
            self.borrowed.fetch_sub(1, Ordering::SeqCst);
        }
        fn statistics(&self) -> PoolStatistics {
            PoolStatistics::default()
        }
        async fn resize(&self, _max_pool_size: usize, _min_idle: usize) {}
        async fn close(&self) {}
    }

    fn test_registry(capacity: usize) -> XaTransactionRegistry {
        let pool: PoolHandle = Arc::new(FakePool {
            capacity,
            borrowed: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
        });
        XaTransactionRegistry::new(pool, XaStartTimeout(Duration::from_millis(50)))
    }

    #[tokio::test]
    async fn illegal_transition_is_proto_and_no_backend_call() {
        let registry = test_registry(1);
        let xid = XidKey::new(1, vec![1], vec![1]);
        let owner = SessionUuid::new("s1");

        registry
            .xa_start(xid.clone(), crate::xa::flags::TMNOFLAGS, owner.clone())
            .await
            .unwrap();

        // Skipping xaEnd and calling prepare directly must fail with PROTO
        // and must not advance state.
        let err = registry.xa_prepare(&xid).await.unwrap_err();
        assert_eq!(err.xa_code(), Some(XaErrorCode::XaerProto));

        let ctx = registry.context_or_proto(&xid).unwrap();
        assert_eq!(ctx.lock().await.state, TxState::Active);
    }

    #[tokio::test]
    async fn duplicate_start_is_dupid() {
        let registry = test_registry(2);
        let xid = XidKey::new(1, vec![1], vec![1]);
        let owner = SessionUuid::new("s1");
        registry
            .xa_start(xid.clone(), crate::xa::flags::TMNOFLAGS, owner.clone())
            .await
            .unwrap();
        let err = registry
            .xa_start(xid, crate::xa::flags::TMNOFLAGS, owner)
            .await
            .unwrap_err();
        assert_eq!(err.xa_code(), Some(XaErrorCode::XaerDupId));
    }

    #[tokio::test]
    async fn pool_exhaustion_at_start_yields_rmfail() {
        let registry = test_registry(1);
        let owner = SessionUuid::new("s1");
        let xid1 = XidKey::new(1, vec![1], vec![1]);
        registry
            .xa_start(xid1, crate::xa::flags::TMNOFLAGS, owner)
            .await
            .unwrap();

        let xid2 = XidKey::new(1, vec![2], vec![2]);
        let err = registry
            .xa_start(xid2, crate::xa::flags::TMNOFLAGS, SessionUuid::new("s2"))
            .await
            .unwrap_err();
        assert_eq!(err.xa_code(), Some(XaErrorCode::XaerRmFail));
    }

    #[tokio::test]
    async fn full_two_phase_commit_releases_session_only_after_owner_returns_it() {
        let registry = test_registry(1);
        let owner = SessionUuid::new("s1");
        let xid = XidKey::new(1, vec![1], vec![1]);

        registry
            .xa_start(xid.clone(), crate::xa::flags::TMNOFLAGS, owner.clone())
            .await
            .unwrap();
        registry.xa_end(&xid, crate::xa::flags::TMSUCCESS).await.unwrap();
        let read_only = registry.xa_prepare(&xid).await.unwrap();
        assert!(!read_only);
        registry.xa_commit(&xid, false).await.unwrap();

        // The single-capacity pool is still exhausted: the session is held
        // by `owned_sessions`, not yet returned to the pool.
        let xid2 = XidKey::new(1, vec![2], vec![2]);
        let err = registry
            .xa_start(xid2.clone(), crate::xa::flags::TMNOFLAGS, SessionUuid::new("s2"))
            .await
            .unwrap_err();
        assert_eq!(err.xa_code(), Some(XaErrorCode::XaerRmFail));

        let returned = registry.return_completed_sessions(&owner).await;
        assert_eq!(returned, 1);

        // Now a fresh start succeeds for a different owner.
        registry
            .xa_start(xid2, crate::xa::flags::TMNOFLAGS, SessionUuid::new("s2"))
            .await
            .unwrap();
    }
}
