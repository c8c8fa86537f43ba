//! `Session`: a server-side session pinning one backend connection (or, for
//! XA, one `BackendSession`) for its duration (`spec.md` §3).

use std::time::Instant;

use crate::common::{ClientUuid, ConnHash, SessionUuid};
use crate::pool::BackendSession;
use crate::session::registry::SessionObjectRegistry;

/// The connection backing a Session. Both variants hold a `BackendSession`
/// (connection plus XA resource handle side by side, per the composition
/// note in `spec.md` §9) — a non-XA session simply never touches the XA
/// resource half. `None` until lazily allocated on first use, per
/// `spec.md` §3: "created at first connection operation (non-XA: lazy on
/// first method; XA: eager at connect)".
pub enum Backing {
    NonXa(Option<BackendSession>),
    Xa(Option<BackendSession>),
}

/// Transaction status surfaced in the `SessionInfo` envelope (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransactionStatus {
    TrxNone,
    TrxActive,
}

pub struct Session {
    pub session_uuid: SessionUuid,
    pub client_uuid: ClientUuid,
    pub conn_hash: ConnHash,
    pub backing: Backing,
    pub registry: SessionObjectRegistry,
    pub last_activity: Instant,
    pub transaction_status: TransactionStatus,
    /// Latched true once the underlying connection is confirmed broken —
    /// `spec.md` §7: "the Session is marked unusable and a subsequent
    /// operation fails fast."
    pub poisoned: bool,
}

impl Session {
    pub fn new_non_xa(session_uuid: SessionUuid, client_uuid: ClientUuid, conn_hash: ConnHash) -> Self {
        Self {
            session_uuid,
            client_uuid,
            conn_hash,
            backing: Backing::NonXa(None),
            registry: SessionObjectRegistry::new(),
            last_activity: Instant::now(),
            transaction_status: TransactionStatus::TrxNone,
            poisoned: false,
        }
    }

    pub fn new_xa(
        session_uuid: SessionUuid,
        client_uuid: ClientUuid,
        conn_hash: ConnHash,
        backend_session: BackendSession,
    ) -> Self {
        Self {
            session_uuid,
            client_uuid,
            conn_hash,
            backing: Backing::Xa(Some(backend_session)),
            registry: SessionObjectRegistry::new(),
            last_activity: Instant::now(),
            transaction_status: TransactionStatus::TrxNone,
            poisoned: false,
        }
    }

    /// A deferred XA session, created with no backing connection yet
    /// (`spec.md` §4.1 `createDeferredXASession`), later filled in by
    /// `bind_xa_connection`.
    pub fn new_deferred_xa(session_uuid: SessionUuid, client_uuid: ClientUuid, conn_hash: ConnHash) -> Self {
        Self {
            session_uuid,
            client_uuid,
            conn_hash,
            backing: Backing::Xa(None),
            registry: SessionObjectRegistry::new(),
            last_activity: Instant::now(),
            transaction_status: TransactionStatus::TrxNone,
            poisoned: false,
        }
    }

    pub fn bind_xa_connection(&mut self, backend_session: BackendSession) {
        self.backing = Backing::Xa(Some(backend_session));
    }

    pub fn is_xa(&self) -> bool {
        matches!(self.backing, Backing::Xa(_))
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn xa_backend_session_mut(&mut self) -> Option<&mut BackendSession> {
        match &mut self.backing {
            Backing::Xa(session) => session.as_mut(),
            Backing::NonXa(_) => None,
        }
    }

    /// Takes ownership of the bound `BackendSession`, e.g. for handoff to
    /// `XATransactionRegistry::register_existing_session`.
    pub fn take_xa_backend_session(&mut self) -> Option<BackendSession> {
        match &mut self.backing {
            Backing::Xa(session) => session.take(),
            Backing::NonXa(_) => None,
        }
    }

    pub fn non_xa_backend_session_mut(&mut self) -> Option<&mut BackendSession> {
        match &mut self.backing {
            Backing::NonXa(session) => session.as_mut(),
            Backing::Xa(_) => None,
        }
    }

    pub fn bind_non_xa_connection(&mut self, backend_session: BackendSession) {
        self.backing = Backing::NonXa(Some(backend_session));
    }

    /// Takes ownership of whichever `BackendSession` is bound, regardless of
    /// XA-ness — used by `terminateSession` when closing the connection.
    pub fn take_any_backend_session(&mut self) -> Option<BackendSession> {
        match &mut self.backing {
            Backing::NonXa(session) | Backing::Xa(session) => session.take(),
        }
    }
}
