// Shared fakes for the end-to-end scenario tests in `spec.md` §8. Each test
// exercises the `Server` through its public RPC surface exactly as a real
// transport layer would, against an in-memory `BackendDriver` instead of a
// real database.

use std::sync::Arc;

use ojp_core::common::IsolationLevel;
use ojp_core::pool::{BackendConnection, BackendSession, ProviderRegistry, XaResourceHandle};
use ojp_core::service::{BackendDriver, Server};
use ojp_core::service::wire::ConnectionDetails;
use ojp_core::streaming::{ColumnDescriptor, RawCellValue, RawRow};
use ojp_core::xa::XidKey;
use ojp_core::Result;

pub struct FakeConnection {
    pub isolation: IsolationLevel,
}

impl Default for FakeConnection {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
        }
    }
}

#[async_trait::async_trait]
impl BackendConnection for FakeConnection {
    async fn reset(&mut self) -> Result<()> {
        // A real driver resets session-local state on return to the pool;
        // here that means restoring the configured default isolation
        // (`spec.md` §8 scenario 6).
        self.isolation = IsolationLevel::ReadCommitted;
        Ok(())
    }
    async fn is_valid(&mut self) -> bool {
        true
    }
    async fn set_isolation(&mut self, level: IsolationLevel) -> Result<()> {
        self.isolation = level;
        Ok(())
    }
    fn isolation(&self) -> IsolationLevel {
        self.isolation
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
        Ok(1)
    }
    async fn execute_query(&mut self, _sql: &str) -> Result<(Vec<ColumnDescriptor>, Vec<RawRow>)> {
        Ok((
            vec![ColumnDescriptor {
                name: "id".into(),
                type_name: "INT".into(),
            }],
            vec![vec![RawCellValue::Int(1)]],
        ))
    }
    async fn close(&mut self) {}
}

pub struct FakeXaResource;

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

pub struct FakeDriver;

#[async_trait::async_trait]
impl BackendDriver for FakeDriver {
    fn driver_name(&self) -> &'static str {
        "fake"
    }
    async fn open(
        &self,
        _details: &ConnectionDetails,
    ) -> Result<(Box<dyn BackendConnection>, Box<dyn XaResourceHandle>)> {
        Ok((Box::new(FakeConnection::default()), Box::new(FakeXaResource)))
    }
}

pub fn test_server() -> Server {
    Server::new(Arc::new(FakeDriver), ProviderRegistry::new(vec![]))
}

pub fn connection_details(is_xa: bool) -> ConnectionDetails {
    ConnectionDetails {
        url: "jdbc:fake://db".into(),
        user: "scott".into(),
        password: "tiger".into(),
        is_xa,
        server_endpoints: vec!["a".into()],
        cluster_health: "a=UP".into(),
        properties: Default::default(),
    }
}

pub struct BackendConnectionBuilder;

impl BackendConnectionBuilder {
    pub fn session(id: u64) -> BackendSession {
        BackendSession::new(id, Box::new(FakeConnection::default()), Box::new(FakeXaResource))
    }
}
