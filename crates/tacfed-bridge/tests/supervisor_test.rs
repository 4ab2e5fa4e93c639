//! Reconciliation tests for the connection supervisor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tacfed_bridge::outbound::{self, NewChange};
use tacfed_bridge::registry::{self, NewPeer};
use tacfed_bridge::supervisor::{shutdown_all, Supervisor};
use tacfed_bridge::BridgeConfig;
use tacfed_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use tacfed_types::{ConnectionStatus, LiveEvent};
use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::sleep;

fn test_config() -> BridgeConfig {
    BridgeConfig {
        node_id: "test-node".to_string(),
        max_retries: 5,
        send_batch_size: 10,
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(50),
        poll_error_backoff: Duration::from_millis(100),
        heartbeat_interval: Duration::from_secs(60),
        reconcile_interval: Duration::from_millis(100),
        shutdown_join_timeout: Duration::from_secs(1),
    }
}

fn build_pool(db_file: &NamedTempFile) -> DbPool {
    let pool = create_pool(
        db_file.path().to_str().expect("temp path should be utf-8"),
        DbRuntimeSettings::default(),
    )
    .expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");
    run_migrations(&conn).expect("failed to run migrations");
    pool
}

fn supervisor(pool: &DbPool) -> (Supervisor, broadcast::Sender<LiveEvent>) {
    let (live_tx, _) = broadcast::channel(16);
    (
        Supervisor::new(pool.clone(), Arc::new(test_config()), live_tx.clone()),
        live_tx,
    )
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) {
    let start = Instant::now();
    while !check() {
        assert!(start.elapsed() < deadline, "condition not met in time");
        sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn reconcile_connects_enabled_peers_exactly_once() {
    let db_file = NamedTempFile::new().unwrap();
    let pool = build_pool(&db_file);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let peer_id = {
        let conn = pool.get().unwrap();
        registry::create_peer(&conn, &NewPeer::tcp("alpha", "127.0.0.1", port)).unwrap()
    };

    let (supervisor, _live_tx) = supervisor(&pool);
    supervisor.reconcile_once().await.unwrap();
    let _accepted = listener.accept().await.unwrap();

    let connections = supervisor.connections();
    {
        let map = connections.read().await;
        assert_eq!(map.len(), 1, "one live connection per peer id");
        assert!(map.get(&peer_id).unwrap().is_connected());
    }

    // A healthy connection is left alone on the next cycle.
    supervisor.reconcile_once().await.unwrap();
    {
        let map = connections.read().await;
        assert_eq!(map.len(), 1);
        assert!(map.get(&peer_id).unwrap().is_connected());
    }

    shutdown_all(&connections).await;
}

#[tokio::test]
async fn failed_attempts_retry_every_cycle_without_claiming_connected() {
    let db_file = NamedTempFile::new().unwrap();
    let pool = build_pool(&db_file);

    // A port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let peer_id = {
        let conn = pool.get().unwrap();
        registry::create_peer(&conn, &NewPeer::tcp("alpha", "127.0.0.1", port)).unwrap()
    };

    let (supervisor, _live_tx) = supervisor(&pool);

    for cycle in 0..3 {
        supervisor.reconcile_once().await.unwrap();

        let conn = pool.get().unwrap();
        let peer = registry::get_peer(&conn, peer_id).unwrap().unwrap();
        assert_eq!(
            peer.connection_status,
            ConnectionStatus::Error,
            "cycle {cycle}: a failed handshake must never report connected"
        );
        assert!(peer.last_error.is_some(), "cycle {cycle}: error recorded");
        assert!(supervisor.connections().read().await.is_empty());

        // Clear the status so the next assertion proves this cycle
        // attempted again rather than showing a stale row.
        registry::set_status(&conn, peer_id, ConnectionStatus::Disconnected, None).unwrap();
    }
}

#[tokio::test]
async fn disabling_a_peer_removes_its_connection_and_keeps_its_queue() {
    let db_file = NamedTempFile::new().unwrap();
    let pool = build_pool(&db_file);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let peer_id = {
        let conn = pool.get().unwrap();
        let id = registry::create_peer(&conn, &NewPeer::tcp("alpha", "127.0.0.1", port)).unwrap();
        for uid in ["c1", "c2", "c3", "c4", "c5"] {
            let change_id =
                outbound::insert_change(&conn, &NewChange::local(uid, "op-alpha", "user-1"))
                    .unwrap();
            outbound::enqueue_change(&conn, change_id).unwrap();
        }
        // Park the records at the retry ceiling so the sender leaves
        // them alone while the connection is up.
        conn.execute("UPDATE federation_outbound SET retry_count = 5", [])
            .unwrap();
        id
    };

    let (supervisor, _live_tx) = supervisor(&pool);
    supervisor.reconcile_once().await.unwrap();
    let _accepted = listener.accept().await.unwrap();
    assert!(supervisor
        .connections()
        .read()
        .await
        .get(&peer_id)
        .unwrap()
        .is_connected());

    {
        let conn = pool.get().unwrap();
        conn.execute("UPDATE federation_peers SET enabled = 0 WHERE id = ?1", [peer_id])
            .unwrap();
    }

    supervisor.reconcile_once().await.unwrap();
    assert!(
        supervisor.connections().read().await.is_empty(),
        "disabled peer loses its connection within one cycle"
    );

    let conn = pool.get().unwrap();
    let status = outbound::sync_status(&conn, peer_id, 5).unwrap();
    assert_eq!(status.total, 5, "all five records remain");
    assert_eq!(status.pending, 5, "nothing was sent or dropped");
    assert_eq!(status.sent, 0);

    wait_until(Duration::from_secs(2), || {
        let conn = pool.get().unwrap();
        registry::get_peer(&conn, peer_id)
            .unwrap()
            .unwrap()
            .connection_status
            == ConnectionStatus::Disconnected
    })
    .await;
}

#[tokio::test]
async fn dead_links_are_rebuilt_on_the_next_cycle() {
    let db_file = NamedTempFile::new().unwrap();
    let pool = build_pool(&db_file);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let peer_id = {
        let conn = pool.get().unwrap();
        registry::create_peer(&conn, &NewPeer::tcp("alpha", "127.0.0.1", port)).unwrap()
    };

    let (supervisor, _live_tx) = supervisor(&pool);
    supervisor.reconcile_once().await.unwrap();
    let (accepted, _) = listener.accept().await.unwrap();

    // Remote hangs up; the receiver notices and marks the link down.
    drop(accepted);
    let connections = supervisor.connections();
    wait_until(Duration::from_secs(3), || {
        connections
            .try_read()
            .map(|map| !map.get(&peer_id).unwrap().is_connected())
            .unwrap_or(false)
    })
    .await;

    // Next cycle replaces the dead connection with a fresh one.
    supervisor.reconcile_once().await.unwrap();
    let _accepted = listener.accept().await.unwrap();
    assert!(connections.read().await.get(&peer_id).unwrap().is_connected());

    shutdown_all(&connections).await;
}
