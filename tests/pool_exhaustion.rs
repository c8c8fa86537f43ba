// `spec.md` §8 scenario 3: `maxPoolSize=1`, one session already pinned,
// `xaStartTimeoutMs=100` — a second branch's `xaStart` must wait roughly up
// to the timeout and then fail with `XAER_RMFAIL`, leaving no partial state.
//
// Exercised against the real `CommonsPool2Pool` (not a fake), since the
// behavior under test — the borrow-side `tokio::time::timeout` racing the
// semaphore permit — lives entirely in that implementation.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::BackendConnectionBuilder;

use ojp_core::common::SessionUuid;
use ojp_core::error::XaErrorCode;
use ojp_core::pool::{BackendSessionFactory, CommonsPool2Pool, PoolConfig};
use ojp_core::xa::{flags, XaStartTimeout, XaTransactionRegistry, XidKey};
use ojp_core::Result;

struct OneShotFactory;

#[async_trait::async_trait]
impl BackendSessionFactory for OneShotFactory {
    async fn create(&self, id: u64) -> Result<ojp_core::pool::BackendSession> {
        Ok(BackendConnectionBuilder::session(id))
    }
}

#[tokio::test]
async fn xa_start_on_exhausted_pool_times_out_with_rmfail_and_creates_no_state() {
    let config = PoolConfig {
        max_pool_size: 1,
        min_idle: 0,
        ..PoolConfig::default()
    };
    let pool = CommonsPool2Pool::new(config, Arc::new(OneShotFactory)).await.unwrap();
    let registry = XaTransactionRegistry::new(pool, XaStartTimeout(Duration::from_millis(100)));

    let xid1 = XidKey::new(1, vec![1], vec![1]);
    registry
        .xa_start(xid1, flags::TMNOFLAGS, SessionUuid::new("s1"))
        .await
        .unwrap();

    let xid2 = XidKey::new(1, vec![2], vec![2]);
    let started = Instant::now();
    let err = registry
        .xa_start(xid2.clone(), flags::TMNOFLAGS, SessionUuid::new("s2"))
        .await
        .unwrap_err();
    let waited = started.elapsed();

    assert_eq!(err.xa_code(), Some(XaErrorCode::XaerRmFail));
    assert!(waited >= Duration::from_millis(90), "waited only {waited:?}");
    assert!(waited < Duration::from_secs(2), "waited far too long: {waited:?}");

    // No partial TxContext was created for the failed branch: a fresh
    // attempt behaves as if xid2 had never been seen (still DUPID-free).
    let err_again = registry
        .xa_start(xid2, flags::TMRESUME, SessionUuid::new("s2"))
        .await
        .unwrap_err();
    assert_eq!(err_again.xa_code(), Some(XaErrorCode::XaerProto));
}
