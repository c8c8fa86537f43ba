// `spec.md` §8 scenario 2: invalid XA state transitions are rejected with
// `XAER_PROTO`/`XAER_DUPID` and never partially mutate state, driven through
// `Server`'s public RPC surface (the registry's own unit tests already cover
// this at the `XaTransactionRegistry` layer in isolation).

mod common;

use common::{connection_details, test_server};

use ojp_core::common::ClientUuid;
use ojp_core::error::XaErrorCode;
use ojp_core::service::wire::XaRequest;
use ojp_core::xa::{flags, WireXid};

fn xid() -> WireXid {
    WireXid {
        format_id: 1,
        global_transaction_id: vec![1],
        branch_qualifier: vec![1],
    }
}

#[tokio::test]
async fn prepare_without_end_is_proto_and_state_unaffected() {
    let server = test_server();
    let session = server
        .connect(connection_details(true), ClientUuid::new("c1"))
        .await
        .unwrap();

    server
        .xa_start(XaRequest {
            session: session.clone(),
            xid: xid(),
            flags: flags::TMNOFLAGS,
            one_phase: false,
        })
        .await
        .unwrap();

    let err = server
        .xa_prepare(XaRequest {
            session: session.clone(),
            xid: xid(),
            flags: 0,
            one_phase: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.xa_code(), Some(XaErrorCode::XaerProto));

    // State must still be ACTIVE: the legal next transition (xaEnd) still
    // succeeds, proving the illegal prepare call did not advance it.
    server
        .xa_end(XaRequest {
            session: session.clone(),
            xid: xid(),
            flags: flags::TMSUCCESS,
            one_phase: false,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn duplicate_xa_start_is_dupid() {
    let server = test_server();
    let session = server
        .connect(connection_details(true), ClientUuid::new("c1"))
        .await
        .unwrap();

    server
        .xa_start(XaRequest {
            session: session.clone(),
            xid: xid(),
            flags: flags::TMNOFLAGS,
            one_phase: false,
        })
        .await
        .unwrap();

    let err = server
        .xa_start(XaRequest {
            session: session.clone(),
            xid: xid(),
            flags: flags::TMNOFLAGS,
            one_phase: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.xa_code(), Some(XaErrorCode::XaerDupId));
}

#[tokio::test]
async fn commit_without_prepare_under_two_phase_is_proto() {
    let server = test_server();
    let session = server
        .connect(connection_details(true), ClientUuid::new("c1"))
        .await
        .unwrap();

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

    // one_phase=false from ENDED (not PREPARED) is illegal.
    let err = server
        .xa_commit(XaRequest {
            session: session.clone(),
            xid: xid(),
            flags: 0,
            one_phase: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.xa_code(), Some(XaErrorCode::XaerProto));

    // one_phase=true from ENDED is legal and still works.
    server
        .xa_commit(XaRequest {
            session,
            xid: xid(),
            flags: 0,
            one_phase: true,
        })
        .await
        .unwrap();
}
