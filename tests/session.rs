mod common;

use common::{pool, socket, MockCluster, PASSWORD, USER};
use graph_ha::{ConnectionSlot, Error, ErrorCode, ErrorKind, PoolConfig};
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_execute_returns_rows() {
    let cluster = MockCluster::new();
    let pool = pool(&cluster, &[9669], PoolConfig::default()).await;

    let session = pool.get_session(USER, PASSWORD).await.unwrap();
    assert!(session.session_id() > 0);

    let response = assert_ok!(session.execute("YIELD 1").await);
    assert!(response.is_succeeded());
    assert_eq!(response.columns, vec!["server".to_string()]);
    assert_eq!(response.row_count(), 1);
    assert_eq!(response.rows[0][0].value, b"127.0.0.1:9669".to_vec());

    session.release().await.unwrap();
}

#[tokio::test]
async fn test_query_error_is_not_retried() {
    let cluster = MockCluster::new();
    let pool = pool(&cluster, &[9669], PoolConfig::default()).await;

    let session = pool.get_session(USER, PASSWORD).await.unwrap();
    let before = session.connection_id().await;

    let err = assert_err!(session.execute("BAD STATEMENT").await);
    assert_eq!(err.kind(), ErrorKind::Query);
    assert_eq!(err.error_code(), Some(ErrorCode::SyntaxError));
    assert_eq!(cluster.executed(), 1);
    assert_eq!(cluster.opened(), 1);

    // The session stays on its connection and keeps working.
    assert_eq!(session.connection_id().await, before);
    assert_ok!(session.execute("YIELD 1").await);

    session.release().await.unwrap();
}

#[tokio::test]
async fn test_rpc_status_error_keeps_connection() {
    let cluster = MockCluster::new();
    let config = PoolConfig::default().with_pool_size(1, 4);
    let pool = pool(&cluster, &[9669], config).await;
    cluster.deny_statements(true);

    // The idle connection answers its validation with a status error and
    // is still handed out.
    let session = pool.get_session(USER, PASSWORD).await.unwrap();
    assert_eq!(cluster.opened(), 1);
    assert_eq!(cluster.closed(), 0);
    let bound = session.connection_id().await;

    let err = assert_err!(session.execute("YIELD 1").await);
    assert_eq!(err.kind(), ErrorKind::Query);
    assert_eq!(err.error_code(), Some(ErrorCode::RpcFailure));
    assert_eq!(session.connection_id().await, bound);
    assert_eq!(cluster.opened(), 1);
    assert!(pool.stats().endpoints[0].available);

    cluster.deny_statements(false);
    assert_ok!(session.execute("YIELD 1").await);
    session.release().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_after_connection_loss() {
    let cluster = MockCluster::new();
    let pool = pool(&cluster, &[9669], PoolConfig::default()).await;

    let session = pool.get_session(USER, PASSWORD).await.unwrap();
    let broken = session.connection_id().await.unwrap();
    cluster.kill_all();

    let response = assert_ok!(session.execute("YIELD 1").await);
    assert!(response.is_succeeded());

    let current = session.connection_id().await.unwrap();
    assert_ne!(current, broken);
    assert_eq!(pool.slot_of(current), Some(ConnectionSlot::Active));

    // The broken connection is closed and no longer counts against the pool.
    assert_eq!(pool.slot_of(broken), None);
    assert_eq!(pool.stats().total(), 1);
    assert_eq!(cluster.closed(), 1);

    let other = pool.get_session(USER, PASSWORD).await.unwrap();
    assert_ne!(other.connection_id().await, Some(broken));
    assert_eq!(cluster.opened(), 3);

    other.release().await.unwrap();
    session.release().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_moves_to_another_server() {
    let cluster = MockCluster::new();
    let pool = pool(&cluster, &[9669, 9670], PoolConfig::default()).await;

    let session = pool.get_session(USER, PASSWORD).await.unwrap();
    assert_eq!(session.server_address().await, Some(socket(9669)));

    cluster.kill(socket(9669));
    cluster.refuse(socket(9669));

    let response = assert_ok!(session.execute("YIELD 1").await);
    assert_eq!(response.rows[0][0].value, b"127.0.0.1:9670".to_vec());
    assert_eq!(session.server_address().await, Some(socket(9670)));
    assert!(!pool.stats().endpoints[0].available);

    session.release().await.unwrap();
}

#[tokio::test]
async fn test_failed_reconnect_returns_transport_error() {
    let cluster = MockCluster::new();
    let config = PoolConfig::default().with_pool_size(0, 1);
    let pool = pool(&cluster, &[9669], config).await;

    let session = pool.get_session(USER, PASSWORD).await.unwrap();
    let bound = session.connection_id().await;
    cluster.kill_all();

    let err = assert_err!(session.execute("YIELD 1").await);
    assert!(err.is_transport());
    assert!(!session.is_released().await);
    assert_eq!(session.connection_id().await, bound);

    assert_ok!(session.release().await);
    assert_eq!(pool.idle_conn_count(), 1);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let cluster = MockCluster::new();
    let pool = pool(&cluster, &[9669], PoolConfig::default()).await;

    let session = pool.get_session(USER, PASSWORD).await.unwrap();
    assert_ok!(session.release().await);
    assert_ok!(session.release().await);

    assert!(session.is_released().await);
    assert_eq!(session.connection_id().await, None);
    assert_eq!(pool.idle_conn_count(), 1);
    assert_eq!(pool.active_conn_count(), 0);

    let err = assert_err!(session.execute("YIELD 1").await);
    assert!(matches!(err, Error::AlreadyReleased));
}

#[tokio::test]
async fn test_release_after_signout_failure() {
    let cluster = MockCluster::new();
    let pool = pool(&cluster, &[9669], PoolConfig::default()).await;

    let session = pool.get_session(USER, PASSWORD).await.unwrap();
    cluster.kill_all();

    assert_ok!(session.release().await);
    assert_eq!(pool.active_conn_count(), 0);
    assert_eq!(pool.idle_conn_count(), 1);

    // The dead connection is replaced on the next checkout.
    let session = pool.get_session(USER, PASSWORD).await.unwrap();
    assert_ok!(session.execute("YIELD 1").await);
    assert_eq!(cluster.opened(), 2);
    session.release().await.unwrap();
}

#[tokio::test]
async fn test_sessions_on_shared_pool_clones() {
    let cluster = MockCluster::new();
    let pool = pool(&cluster, &[9669], PoolConfig::default()).await;
    let clone = pool.clone();

    let session = clone.get_session(USER, PASSWORD).await.unwrap();
    assert_eq!(pool.active_conn_count(), 1);
    session.release().await.unwrap();
    assert_eq!(pool.idle_conn_count(), 1);
}
