//! `SessionManager`: name resolution from session identifier to `Session`;
//! creation, lookup, termination (`spec.md` §4.1).
//!
//! Grounded on the teacher's catalog/registry pattern (a `DashMap` keyed by
//! generated identifier, single-writer creation via `entry`/`insert`) and on
//! its emphasis on correctness-under-failure during teardown (see
//! `pool/connection_pool.rs`'s close path, which keeps closing remaining
//! resources after one fails) — `spec.md` §4.1's `terminateSession` requires
//! exactly that: errors closing one resource must not abort closing the
//! rest.

use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, instrument, warn};

use crate::common::{ClientUuid, ConnHash, SessionUuid};
use crate::error::{OjpError, Result};
use crate::pool::{BackendSession, PoolHandle};
use crate::session::core::{Backing, Session, TransactionStatus};
use crate::xa::XaTransactionRegistry;

/// `spec.md` §6 `connect` → `SessionInfo` response shape (the subset owned
/// by session creation; `clusterHealth`/`targetServer` are populated by the
/// caller, not by `SessionManager`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionInfo {
    pub session_uuid: SessionUuid,
    pub client_uuid: ClientUuid,
    pub conn_hash: ConnHash,
    pub is_xa: bool,
}

/// Outcome of `terminate_session`, surfaced to the caller for logging and
/// for the wire-level `SessionTerminationStatus` response (`spec.md` §6).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TerminationReport {
    pub found: bool,
    pub rolled_back_open_transaction: bool,
    pub close_errors: Vec<String>,
    pub backend_sessions_returned: usize,
}

#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<SessionUuid, Session>,
    clients: DashMap<ClientUuid, ConnHash>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `spec.md` §4.1 `registerClient`: records association, no allocation.
    pub fn register_client(&self, conn_hash: ConnHash, client_uuid: ClientUuid) {
        self.clients.insert(client_uuid, conn_hash);
    }

    pub fn create_session(&self, client_uuid: ClientUuid, conn_hash: ConnHash) -> SessionInfo {
        let session_uuid = SessionUuid::generate();
        let info = SessionInfo {
            session_uuid: session_uuid.clone(),
            client_uuid: client_uuid.clone(),
            conn_hash: conn_hash.clone(),
            is_xa: false,
        };
        self.sessions
            .insert(session_uuid.clone(), Session::new_non_xa(session_uuid, client_uuid, conn_hash));
        info
    }

    pub fn create_xa_session(
        &self,
        client_uuid: ClientUuid,
        conn_hash: ConnHash,
        backend_session: BackendSession,
    ) -> SessionInfo {
        let session_uuid = SessionUuid::generate();
        let info = SessionInfo {
            session_uuid: session_uuid.clone(),
            client_uuid: client_uuid.clone(),
            conn_hash: conn_hash.clone(),
            is_xa: true,
        };
        self.sessions.insert(
            session_uuid.clone(),
            Session::new_xa(session_uuid, client_uuid, conn_hash, backend_session),
        );
        info
    }

    /// `spec.md` §4.1 `createDeferredXASession`: no backing connection yet.
    pub fn create_deferred_xa_session(&self, client_uuid: ClientUuid, conn_hash: ConnHash) -> SessionInfo {
        let session_uuid = SessionUuid::generate();
        let info = SessionInfo {
            session_uuid: session_uuid.clone(),
            client_uuid: client_uuid.clone(),
            conn_hash: conn_hash.clone(),
            is_xa: true,
        };
        self.sessions.insert(
            session_uuid.clone(),
            Session::new_deferred_xa(session_uuid, client_uuid, conn_hash),
        );
        info
    }

    pub fn bind_xa_connection(&self, session_uuid: &SessionUuid, backend_session: BackendSession) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_uuid)
            .ok_or_else(|| OjpError::session_not_found(session_uuid.as_str()))?;
        session.bind_xa_connection(backend_session);
        Ok(())
    }

    pub fn get(&self, session_uuid: &SessionUuid) -> Option<dashmap::mapref::one::Ref<'_, SessionUuid, Session>> {
        self.sessions.get(session_uuid)
    }

    pub fn get_mut(&self, session_uuid: &SessionUuid) -> Option<dashmap::mapref::one::RefMut<'_, SessionUuid, Session>> {
        self.sessions.get_mut(session_uuid)
    }

    pub fn mark_poisoned(&self, session_uuid: &SessionUuid) {
        if let Some(mut session) = self.sessions.get_mut(session_uuid) {
            session.poisoned = true;
        }
    }

    /// `spec.md` §4.1 `terminateSession`: idempotent. If no session found,
    /// returns quietly. Otherwise: roll back any open non-XA transaction;
    /// close result sets, statements, LOBs, and the connection in that
    /// order; return any XA backend sessions whose transactions are all
    /// terminal; errors encountered while closing are logged but do not
    /// abort the sequence.
    #[instrument(skip(self, xa_registry, non_xa_pool))]
    pub async fn terminate_session(
        &self,
        session_uuid: &SessionUuid,
        xa_registry: Option<&XaTransactionRegistry>,
        non_xa_pool: Option<&PoolHandle>,
    ) -> TerminationReport {
        let Some((_, mut session)) = self.sessions.remove(session_uuid) else {
            return TerminationReport::default();
        };

        let mut report = TerminationReport {
            found: true,
            ..Default::default()
        };

        if session.transaction_status == TransactionStatus::TrxActive {
            if let Some(backend) = session.non_xa_backend_session_mut() {
                if let Err(e) = backend.connection_mut().rollback().await {
                    report.close_errors.push(format!("rollback on termination failed: {e}"));
                } else {
                    report.rolled_back_open_transaction = true;
                }
            }
        }

        for err in session.registry.close_all() {
            report.close_errors.push(err);
        }

        match &mut session.backing {
            Backing::NonXa(slot) => {
                if let Some(mut backend) = slot.take() {
                    if let Some(pool) = non_xa_pool {
                        match backend.reset().await {
                            Ok(()) => pool.return_session(backend).await,
                            Err(_) => pool.invalidate_session(backend).await,
                        }
                    } else {
                        backend.close().await;
                    }
                }
            }
            Backing::Xa(_) => {
                if let Some(registry) = xa_registry {
                    report.backend_sessions_returned = registry.return_completed_sessions(session_uuid).await;
                }
            }
        }

        info!(session = %session_uuid, errors = report.close_errors.len(), "session terminated");
        report
    }

    /// `spec.md` §4.1 `waitLobStreamsConsumption`: blocks termination until
    /// all in-flight binary-stream LOBs signal fully-consumed, with a small
    /// settle delay afterward for the statement binding race described
    /// there. Bounded by `timeout` so a stuck producer cannot hang
    /// termination forever.
    pub async fn wait_lob_streams_consumption(&self, session_uuid: &SessionUuid, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let still_pending = self
                .sessions
                .get(session_uuid)
                .map(|s| s.registry.has_unconsumed_lob_streams())
                .unwrap_or(false);
            if !still_pending {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(session = %session_uuid, "timed out waiting for LOB stream consumption");
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
