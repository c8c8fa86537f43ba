//! Wire message shapes (`spec.md` §6). Plain `serde`-derived structs/enums,
//! matching the "opaque request/response + server-streaming transport"
//! scoping in `spec.md` §1 — this module describes the messages, not the
//! framing.

use std::collections::HashMap;

use crate::common::{ClientUuid, ConnHash, SessionUuid};
use crate::session::TransactionStatus;
use crate::streaming::ResultBlock;
use crate::xa::WireXid;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TransactionInfo {
    pub transaction_uuid: String,
    pub status: TransactionStatus,
}

impl Default for TransactionInfo {
    fn default() -> Self {
        Self {
            transaction_uuid: String::new(),
            status: TransactionStatus::TrxNone,
        }
    }
}

/// The envelope carried on every RPC (`spec.md` §6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionInfo {
    pub session_uuid: SessionUuid,
    pub client_uuid: ClientUuid,
    pub conn_hash: ConnHash,
    pub is_xa: bool,
    pub cluster_health: String,
    pub target_server: String,
    pub transaction_info: TransactionInfo,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConnectionDetails {
    pub url: String,
    pub user: String,
    pub password: String,
    pub is_xa: bool,
    pub server_endpoints: Vec<String>,
    pub cluster_health: String,
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StatementRequest {
    pub session: SessionInfo,
    pub sql: String,
    pub params: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResultSetFetchRequest {
    pub session: SessionInfo,
    pub result_set_handle: u64,
    pub max_rows: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum OpResult {
    UpdateCount(u64),
    RowBlock(ResultBlock),
    Ack,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct XaRequest {
    pub session: SessionInfo,
    pub xid: WireXid,
    pub flags: u32,
    pub one_phase: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct XaRecoverRequest {
    pub session: SessionInfo,
    pub flags: u32,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SessionTerminationStatus {
    pub found: bool,
    pub rolled_back_open_transaction: bool,
    pub backend_sessions_returned: usize,
    pub close_errors: Vec<String>,
}

impl From<crate::session::TerminationReport> for SessionTerminationStatus {
    fn from(report: crate::session::TerminationReport) -> Self {
        Self {
            found: report.found,
            rolled_back_open_transaction: report.rolled_back_open_transaction,
            backend_sessions_returned: report.backend_sessions_returned,
            close_errors: report.close_errors,
        }
    }
}
