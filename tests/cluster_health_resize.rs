// `spec.md` §8 scenario 4: a two-server cluster where one peer going down is
// reported via the per-request `clusterHealth` string must resize the local
// pool upward within a single request round-trip.

mod common;

use common::{connection_details, test_server};

use ojp_core::common::ClientUuid;
use ojp_core::service::wire::StatementRequest;

#[tokio::test]
async fn one_peer_down_doubles_non_xa_pool_allocation_on_next_request() {
    let server = test_server();

    let mut details = connection_details(false);
    details.cluster_health = "a=UP,b=UP".to_string();
    let session = server.connect(details, ClientUuid::new("c1")).await.unwrap();

    // Both peers healthy: the declared defaults (max=20, min=5) are split
    // across 2 healthy peers.
    let initial = server.non_xa_pool_statistics(&session.conn_hash).unwrap();
    assert_eq!(initial.max_pool_size, 10);

    let mut degraded_session = session.clone();
    degraded_session.cluster_health = "a=UP,b=DOWN".to_string();
    let request = StatementRequest {
        session: degraded_session,
        sql: "SELECT 1".into(),
        params: vec![],
    };
    server.execute_query(request).await.unwrap();

    let resized = server.non_xa_pool_statistics(&session.conn_hash).unwrap();
    assert_eq!(resized.max_pool_size, 20);
}
