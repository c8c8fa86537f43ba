//! `BackendSession`: a borrowed handle to one pooled XA connection
//! (`spec.md` §3).
//!
//! Grounded on the teacher's `PooledConnection` in
//! `pool/connection_pool.rs` (id, `created_at`, `last_used`, `healthy`
//! flag) and on `spec.md` §9's flattening of the original's "logical
//! connection extends connection" inheritance into composition: here a
//! `BackendSession` simply *contains* the logical connection and the XA
//! resource handle side by side, rather than one inheriting from the other.

use std::time::Instant;

use crate::error::{OjpError, Result};

/// The backend-specific operations OJP needs from a pooled connection.
/// A real deployment implements this against a JDBC-equivalent driver; tests
/// use an in-memory fake. Kept intentionally small — `spec.md` §1 scopes
/// "concrete SQL execution" out as a collaborator.
#[async_trait::async_trait]
pub trait BackendConnection: Send + Sync {
    async fn reset(&mut self) -> Result<()>;
    async fn is_valid(&mut self) -> bool;
    async fn set_isolation(&mut self, level: crate::common::IsolationLevel) -> Result<()>;
    fn isolation(&self) -> crate::common::IsolationLevel;
    /// Local (non-XA) transaction control, per `spec.md` §6
    /// `startTransaction`/`commitTransaction`/`rollbackTransaction`.
    async fn begin(&mut self) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
    /// Concrete SQL execution is a collaborator (`spec.md` §1) described
    /// only by its effects: an update count, or a column/row materialized
    /// result the streaming layer then blocks and externalizes.
    async fn execute_update(&mut self, sql: &str) -> Result<u64>;
    async fn execute_query(
        &mut self,
        sql: &str,
    ) -> Result<(Vec<crate::streaming::ColumnDescriptor>, Vec<crate::streaming::RawRow>)>;
    async fn close(&mut self);
}

/// The backend XA resource manager handle (`javax.transaction.xa.XAResource`
/// equivalent). Methods mirror `spec.md` §4.2's backend calls one-to-one.
#[async_trait::async_trait]
pub trait XaResourceHandle: Send + Sync {
    async fn start(&mut self, xid: &crate::xa::XidKey, flags: u32) -> Result<()>;
    async fn end(&mut self, xid: &crate::xa::XidKey, flags: u32) -> Result<()>;
    async fn prepare(&mut self, xid: &crate::xa::XidKey) -> Result<bool>; // true = read-only
    async fn commit(&mut self, xid: &crate::xa::XidKey, one_phase: bool) -> Result<()>;
    async fn rollback(&mut self, xid: &crate::xa::XidKey) -> Result<()>;
    async fn recover(&mut self) -> Result<Vec<crate::xa::XidKey>>;
}

/// One borrowed XA connection plus its derived logical connection and XA
/// resource handle. `invalidated` latches permanently — `spec.md` §3:
/// "mark unusable, never reuse."
pub struct BackendSession {
    pub id: u64,
    connection: Box<dyn BackendConnection>,
    xa_resource: Box<dyn XaResourceHandle>,
    created_at: Instant,
    last_returned_at: Option<Instant>,
    invalidated: bool,
}

impl BackendSession {
    pub fn new(
        id: u64,
        connection: Box<dyn BackendConnection>,
        xa_resource: Box<dyn XaResourceHandle>,
    ) -> Self {
        Self {
            id,
            connection,
            xa_resource,
            created_at: Instant::now(),
            last_returned_at: None,
            invalidated: false,
        }
    }

    pub fn connection_mut(&mut self) -> &mut dyn BackendConnection {
        &mut *self.connection
    }

    pub fn xa_resource_mut(&mut self) -> &mut dyn XaResourceHandle {
        &mut *self.xa_resource
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Returns the session to a clean, reusable state. `spec.md` §3:
    /// "must fail-close — if reset throws, the session must be invalidated."
    pub async fn reset(&mut self) -> Result<()> {
        match self.connection.reset().await {
            Ok(()) => {
                self.last_returned_at = Some(Instant::now());
                Ok(())
            }
            Err(e) => {
                self.invalidate();
                Err(e)
            }
        }
    }

    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub async fn close(mut self) {
        self.connection.close().await;
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// How long since this session was last reset and put back idle, or its
    /// full age if it has never been returned.
    pub fn idle_duration(&self) -> std::time::Duration {
        match self.last_returned_at {
            Some(at) => at.elapsed(),
            None => self.age(),
        }
    }
}

impl std::fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSession")
            .field("id", &self.id)
            .field("invalidated", &self.invalidated)
            .field("age", &self.age())
            .finish()
    }
}

/// Surfaced when a provider cannot hand out a session in time.
pub fn pool_exhausted(waited: std::time::Duration) -> OjpError {
    OjpError::TransientInfra(format!("pool exhausted after waiting {waited:?}"))
}
