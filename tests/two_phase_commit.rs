// `spec.md` §8 scenario 1: two-phase commit happy path, driven entirely
// through `Server`'s public RPC surface.

mod common;

use common::{connection_details, test_server};

use ojp_core::common::ClientUuid;
use ojp_core::service::wire::XaRequest;
use ojp_core::xa::{flags, WireXid};

fn xid() -> WireXid {
    WireXid {
        format_id: 1,
        global_transaction_id: vec![0xAA, 0xBB],
        branch_qualifier: vec![0x01],
    }
}

#[tokio::test]
async fn two_phase_commit_happy_path_returns_pinned_session_on_terminate() {
    let server = test_server();
    let session = server
        .connect(connection_details(true), ClientUuid::new("c1"))
        .await
        .unwrap();
    assert!(session.is_xa);

    server
        .xa_start(XaRequest {
            session: session.clone(),
            xid: xid(),
            flags: flags::TMNOFLAGS,
            one_phase: false,
        })
        .await
        .unwrap();

    server
        .xa_end(XaRequest {
            session: session.clone(),
            xid: xid(),
            flags: flags::TMSUCCESS,
            one_phase: false,
        })
        .await
        .unwrap();

    let read_only = server
        .xa_prepare(XaRequest {
            session: session.clone(),
            xid: xid(),
            flags: 0,
            one_phase: false,
        })
        .await
        .unwrap();
    assert!(!read_only);

    server
        .xa_commit(XaRequest {
            session: session.clone(),
            xid: xid(),
            flags: 0,
            one_phase: false,
        })
        .await
        .unwrap();

    // The backend session is still pinned to the owning OJP Session at this
    // point (spec.md §4.2's dual-condition release rule) — it is only
    // returned to the pool once the session itself is terminated.
    let stats_before = server.xa_pool_statistics(&session.conn_hash).unwrap();
    assert_eq!(stats_before.active, 1);

    let report = server.terminate_session(&session.session_uuid).await;
    assert!(report.found);
    assert_eq!(report.backend_sessions_returned, 1);

    let stats_after = server.xa_pool_statistics(&session.conn_hash).unwrap();
    assert_eq!(stats_after.idle, stats_before.idle + 1);
    assert_eq!(stats_after.active, 0);
}
