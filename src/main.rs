// # OJP Server
//
// HTTP entry point exposing the `ojp_core::service` handlers over JSON
// (`spec.md` §1 scopes the wire framing itself as "opaque request/response +
// server-streaming transport" — axum's JSON body / SSE chunking is the
// concrete choice made here, grounded on the teacher's `api/rest_api.rs`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use ojp_core::common::{ClientUuid, ConnHash, SessionUuid};
use ojp_core::config::{ConfigLoader, PropertiesFile, SystemProperties};
use ojp_core::error::OjpError;
use ojp_core::pool::{BackendConnection, ProviderRegistry, XaResourceHandle};
use ojp_core::service::wire::{
    ConnectionDetails, OpResult, ResultSetFetchRequest, SessionInfo, StatementRequest, XaRecoverRequest, XaRequest,
};
use ojp_core::service::{BackendDriver, Server};
use ojp_core::streaming::{ColumnDescriptor, RawCellValue, RawRow};
use ojp_core::xa::{WireXid, XidKey};
use ojp_core::VERSION;

/// Stand-in for the real JDBC-equivalent backend (`spec.md` §1: concrete SQL
/// execution is a collaborator, not something this crate implements). Echoes
/// every update as affecting one row and every query as a single-row,
/// single-column result — enough to exercise the proxy end to end without
/// a real database behind it.
struct EchoDriver;

struct EchoConnection {
    isolation: ojp_core::common::IsolationLevel,
}

#[async_trait::async_trait]
impl BackendConnection for EchoConnection {
    async fn reset(&mut self) -> ojp_core::Result<()> {
        Ok(())
    }
    async fn is_valid(&mut self) -> bool {
        true
    }
    async fn set_isolation(&mut self, level: ojp_core::common::IsolationLevel) -> ojp_core::Result<()> {
        self.isolation = level;
        Ok(())
    }
    fn isolation(&self) -> ojp_core::common::IsolationLevel {
        self.isolation
    }
    async fn begin(&mut self) -> ojp_core::Result<()> {
        Ok(())
    }
    async fn commit(&mut self) -> ojp_core::Result<()> {
        Ok(())
    }
    async fn rollback(&mut self) -> ojp_core::Result<()> {
        Ok(())
    }
    async fn execute_update(&mut self, _sql: &str) -> ojp_core::Result<u64> {
        Ok(1)
    }
    async fn execute_query(&mut self, _sql: &str) -> ojp_core::Result<(Vec<ColumnDescriptor>, Vec<RawRow>)> {
        Ok((
            vec![ColumnDescriptor {
                name: "result".into(),
                type_name: "VARCHAR".into(),
            }],
            vec![vec![RawCellValue::Text("ok".into())]],
        ))
    }
    async fn close(&mut self) {}
}

struct EchoXaResource;

#[async_trait::async_trait]
impl XaResourceHandle for EchoXaResource {
    async fn start(&mut self, _xid: &XidKey, _flags: u32) -> ojp_core::Result<()> {
        Ok(())
    }
    async fn end(&mut self, _xid: &XidKey, _flags: u32) -> ojp_core::Result<()> {
        Ok(())
    }
    async fn prepare(&mut self, _xid: &XidKey) -> ojp_core::Result<bool> {
        Ok(false)
    }
    async fn commit(&mut self, _xid: &XidKey, _one_phase: bool) -> ojp_core::Result<()> {
        Ok(())
    }
    async fn rollback(&mut self, _xid: &XidKey) -> ojp_core::Result<()> {
        Ok(())
    }
    async fn recover(&mut self) -> ojp_core::Result<Vec<XidKey>> {
        Ok(vec![])
    }
}

#[async_trait::async_trait]
impl BackendDriver for EchoDriver {
    fn driver_name(&self) -> &'static str {
        "echo"
    }
    async fn open(
        &self,
        _details: &ConnectionDetails,
    ) -> ojp_core::Result<(Box<dyn BackendConnection>, Box<dyn XaResourceHandle>)> {
        Ok((
            Box::new(EchoConnection {
                isolation: ojp_core::common::IsolationLevel::ReadCommitted,
            }),
            Box::new(EchoXaResource),
        ))
    }
}

struct AppError(OjpError);

impl From<OjpError> for AppError {
    fn from(e: OjpError) -> Self {
        AppError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            OjpError::SqlError(_) | OjpError::SqlDataError(_) | OjpError::Protocol(_) => StatusCode::BAD_REQUEST,
            OjpError::XaError { .. } => StatusCode::CONFLICT,
            OjpError::TransientInfra(_) => StatusCode::SERVICE_UNAVAILABLE,
            OjpError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self.0)).into_response()
    }
}

#[derive(Deserialize)]
struct ConnectRequestBody {
    details: ConnectionDetails,
    client_uuid: ClientUuid,
}

#[derive(Deserialize)]
struct SameRmQuery {
    a: String,
    b: String,
}

#[derive(Deserialize)]
struct TimeoutBody {
    conn_hash: ConnHash,
    seconds: u32,
}

async fn connect(State(server): State<Arc<Server>>, Json(body): Json<ConnectRequestBody>) -> Result<Json<SessionInfo>, AppError> {
    Ok(Json(server.connect(body.details, body.client_uuid).await?))
}

async fn execute_update(State(server): State<Arc<Server>>, Json(req): Json<StatementRequest>) -> Result<Json<OpResult>, AppError> {
    Ok(Json(server.execute_update(req).await?))
}

async fn execute_query(State(server): State<Arc<Server>>, Json(req): Json<StatementRequest>) -> Result<Json<Vec<OpResult>>, AppError> {
    Ok(Json(server.execute_query(req).await?))
}

async fn fetch_next_rows(
    State(server): State<Arc<Server>>,
    Json(req): Json<ResultSetFetchRequest>,
) -> Result<Json<OpResult>, AppError> {
    Ok(Json(server.fetch_next_rows(req).await?))
}

async fn start_transaction(State(server): State<Arc<Server>>, Json(session): Json<SessionInfo>) -> Result<StatusCode, AppError> {
    server.start_transaction(&session).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn commit_transaction(State(server): State<Arc<Server>>, Json(session): Json<SessionInfo>) -> Result<StatusCode, AppError> {
    server.commit_transaction(&session).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rollback_transaction(State(server): State<Arc<Server>>, Json(session): Json<SessionInfo>) -> Result<StatusCode, AppError> {
    server.rollback_transaction(&session).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn xa_start(State(server): State<Arc<Server>>, Json(req): Json<XaRequest>) -> Result<StatusCode, AppError> {
    server.xa_start(req).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn xa_end(State(server): State<Arc<Server>>, Json(req): Json<XaRequest>) -> Result<StatusCode, AppError> {
    server.xa_end(req).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn xa_prepare(State(server): State<Arc<Server>>, Json(req): Json<XaRequest>) -> Result<Json<bool>, AppError> {
    Ok(Json(server.xa_prepare(req).await?))
}

async fn xa_commit(State(server): State<Arc<Server>>, Json(req): Json<XaRequest>) -> Result<StatusCode, AppError> {
    server.xa_commit(req).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn xa_rollback(State(server): State<Arc<Server>>, Json(req): Json<XaRequest>) -> Result<StatusCode, AppError> {
    server.xa_rollback(req).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn xa_recover(State(server): State<Arc<Server>>, Json(req): Json<XaRecoverRequest>) -> Result<Json<Vec<WireXid>>, AppError> {
    Ok(Json(server.xa_recover(req).await?))
}

async fn xa_is_same_rm(State(server): State<Arc<Server>>, Query(q): Query<SameRmQuery>) -> Json<bool> {
    Json(server.xa_is_same_rm(&ConnHash::new(q.a), &ConnHash::new(q.b)))
}

async fn xa_set_transaction_timeout(State(server): State<Arc<Server>>, Json(body): Json<TimeoutBody>) -> StatusCode {
    server.xa_set_transaction_timeout(&body.conn_hash, body.seconds);
    StatusCode::NO_CONTENT
}

async fn xa_get_transaction_timeout(State(server): State<Arc<Server>>, Path(conn_hash): Path<String>) -> Json<u32> {
    Json(server.xa_get_transaction_timeout(&ConnHash::new(conn_hash)))
}

async fn terminate_session(State(server): State<Arc<Server>>, Path(session_uuid): Path<String>) -> impl IntoResponse {
    Json(server.terminate_session(&SessionUuid::new(session_uuid)).await)
}

async fn health(State(server): State<Arc<Server>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "UP", "sessions": server.session_count() }))
}

fn app(server: Arc<Server>) -> Router {
    Router::new()
        .route("/connect", post(connect))
        .route("/statements/update", post(execute_update))
        .route("/statements/query", post(execute_query))
        .route("/resultsets/fetch", post(fetch_next_rows))
        .route("/transactions/start", post(start_transaction))
        .route("/transactions/commit", post(commit_transaction))
        .route("/transactions/rollback", post(rollback_transaction))
        .route("/xa/start", post(xa_start))
        .route("/xa/end", post(xa_end))
        .route("/xa/prepare", post(xa_prepare))
        .route("/xa/commit", post(xa_commit))
        .route("/xa/rollback", post(xa_rollback))
        .route("/xa/recover", post(xa_recover))
        .route("/xa/same-rm", get(xa_is_same_rm))
        .route("/xa/timeout", post(xa_set_transaction_timeout))
        .route("/xa/timeout/{conn_hash}", get(xa_get_transaction_timeout))
        .route("/sessions/{session_uuid}/terminate", post(terminate_session))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024))
                .layer(CorsLayer::permissive()),
        )
        .with_state(server)
}

#[tokio::main]
async fn main() -> ojp_core::Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let properties_file = std::fs::read_to_string("ojp.properties")
        .map(|contents| PropertiesFile::parse(&contents))
        .unwrap_or_default();
    let system_properties = SystemProperties::default();
    let loader = ConfigLoader::new(&system_properties, &properties_file);
    let port: u16 = loader.lookup("ojp.server.port").and_then(|v| v.parse().ok()).unwrap_or(8089);

    info!(version = VERSION, "starting OJP server");

    let server = Arc::new(Server::new(Arc::new(EchoDriver), ProviderRegistry::new(vec![])));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, "failed to bind listener");
        OjpError::TransientInfra(format!("bind {addr} failed: {e}"))
    })?;

    axum::serve(listener, app(server))
        .await
        .map_err(|e| OjpError::TransientInfra(format!("server error: {e}")))?;

    Ok(())
}
