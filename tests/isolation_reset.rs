// `spec.md` §8 scenario 6: a pool configured with default `READ_COMMITTED`
// must not leak a borrower's isolation-level change to the next borrower.
//
// `spec.md` §6 has no dedicated `setTransactionIsolation`/
// `getTransactionIsolation` wire operation — the scenario is a property of
// `BackendConnection::reset()`, invoked by the pool on every return
// (`spec.md` §4.3), so this is exercised directly against the pool rather
// than through `Server`.

mod common;

use std::sync::Arc;

use common::FakeConnection;

use ojp_core::common::IsolationLevel;
use ojp_core::error::Result;
use ojp_core::pool::{BackendSession, BackendSessionFactory, CommonsPool2Pool, ManagedPool, PoolConfig};
use ojp_core::xa::XidKey;

struct FakeXaResource;

#[async_trait::async_trait]
impl ojp_core::pool::XaResourceHandle for FakeXaResource {
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

struct SingleSessionFactory;

#[async_trait::async_trait]
impl BackendSessionFactory for SingleSessionFactory {
    async fn create(&self, id: u64) -> Result<BackendSession> {
        Ok(BackendSession::new(id, Box::new(FakeConnection::default()), Box::new(FakeXaResource)))
    }
}

#[tokio::test]
async fn isolation_change_does_not_survive_a_borrow_return_cycle() {
    let config = PoolConfig {
        max_pool_size: 1,
        min_idle: 1,
        ..PoolConfig::default()
    };
    let pool = CommonsPool2Pool::new(config, Arc::new(SingleSessionFactory)).await.unwrap();

    let mut client_a = pool.borrow().await.unwrap();
    assert_eq!(client_a.connection_mut().isolation(), IsolationLevel::ReadCommitted);
    client_a.connection_mut().set_isolation(IsolationLevel::Serializable).await.unwrap();
    client_a.connection_mut().execute_update("SELECT 1").await.unwrap();
    pool.return_session(client_a).await;

    let mut client_b = pool.borrow().await.unwrap();
    assert_eq!(
        client_b.connection_mut().isolation(),
        IsolationLevel::ReadCommitted,
        "client B must not observe client A's SERIALIZABLE change"
    );
}
