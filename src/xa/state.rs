//! `TxState`/`TxContext`: the per-`XidKey` XA state machine (`spec.md` §3, §4.2).
//!
//! Grounded on the teacher's `TwoPhaseCommitState` / `DistributedTransaction`
//! in `transaction/distributed.rs`, generalized from the teacher's internal
//! coordinator-driven 2PC (where the coordinator itself originates prepare
//! and commit) to a resource-manager adapter, where an *external* transaction
//! manager drives the calls and OJP only enforces that the calls arrive in a
//! legal order (`spec.md` §1 Non-goals: "not a distributed transaction
//! coordinator").

use crate::pool::BackendSession;

/// `spec.md` §3: `NONEXISTENT | ACTIVE | ENDED | PREPARED | COMMITTED |
/// ROLLEDBACK`. `NONEXISTENT` is represented by the absence of a `TxContext`
/// in the registry rather than as a variant here, matching the invariant
/// "session != null iff state ∈ {ACTIVE, ENDED, PREPARED}" — there is nothing
/// for a `NONEXISTENT` `TxContext` to own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TxState {
    Active,
    Ended,
    Prepared,
    Committed,
    RolledBack,
}

impl TxState {
    /// Whether a `TxContext` in this state still pins a `BackendSession`.
    pub fn pins_session(self) -> bool {
        matches!(self, TxState::Active | TxState::Ended | TxState::Prepared)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Committed | TxState::RolledBack)
    }

    /// Pure legality check, consulted *before* any backend call so an
    /// illegal transition never reaches the backend (`spec.md` §4.2, §8).
    pub fn can_transition(self, to: TxState) -> bool {
        matches!(
            (self, to),
            (TxState::Active, TxState::Ended)
                | (TxState::Ended, TxState::Active) // RESUME
                | (TxState::Active, TxState::Active) // JOIN
                | (TxState::Ended, TxState::Prepared)
                | (TxState::Ended, TxState::Committed) // one-phase
                | (TxState::Active, TxState::Committed) // one-phase
                | (TxState::Prepared, TxState::Committed)
                | (TxState::Active, TxState::RolledBack)
                | (TxState::Ended, TxState::RolledBack)
                | (TxState::Prepared, TxState::RolledBack)
        )
    }
}

/// Per-`XidKey` state object. Invariant: `session.is_some()` iff
/// `state.pins_session()`. `actual_xid` (here, simply `xid` itself, since
/// there is no separate backend-native Xid type to cache an identity for
/// once the wire type and the backend type coincide) is reused across
/// `start`/`end`/`prepare`/`commit` calls on the same backend XA resource.
pub struct TxContext {
    pub xid: crate::xa::XidKey,
    pub state: TxState,
    pub session: Option<BackendSession>,
    pub owner_session_uuid: crate::common::SessionUuid,
}

impl TxContext {
    pub fn new(
        xid: crate::xa::XidKey,
        session: BackendSession,
        owner_session_uuid: crate::common::SessionUuid,
    ) -> Self {
        Self {
            xid,
            state: TxState::Active,
            session: Some(session),
            owner_session_uuid,
        }
    }

    /// Unconditionally applies a transition already validated by the caller
    /// via `TxState::can_transition` and confirmed by a successful backend
    /// call. Moves `session` out once the new state no longer pins it.
    pub fn set_state(&mut self, to: TxState) -> Option<BackendSession> {
        self.state = to;
        if !to.pins_session() {
            self.session.take()
        } else {
            None
        }
    }
}
