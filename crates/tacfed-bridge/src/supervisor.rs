//! Connection supervisor.
//!
//! Level-triggered reconciliation of the desired peer set (enabled
//! outbound rows in the registry) against the live connection set. The
//! supervisor is the only writer of the peer-id → connection map; the
//! bus bridge and the status surface read snapshots through the shared
//! handle and never mutate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::time::sleep;

use tacfed_db::DbPool;
use tacfed_types::LiveEvent;

use crate::config::BridgeConfig;
use crate::connection::PeerConnection;
use crate::error::BridgeError;
use crate::registry;

/// Shared handle to the live connections, keyed by peer id.
pub type ConnectionMap = Arc<RwLock<HashMap<i64, PeerConnection>>>;

/// Reconciles registry state against live connections on a fixed
/// interval. Transient inconsistencies self-heal within one cycle; a
/// connection is attempted at most once per cycle, so backoff is the
/// interval itself.
pub struct Supervisor {
    pool: DbPool,
    config: Arc<BridgeConfig>,
    live_tx: broadcast::Sender<LiveEvent>,
    connections: ConnectionMap,
}

impl Supervisor {
    pub fn new(
        pool: DbPool,
        config: Arc<BridgeConfig>,
        live_tx: broadcast::Sender<LiveEvent>,
    ) -> Self {
        Self {
            pool,
            config,
            live_tx,
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Handle to the connection map for readers (bus bridge, status).
    pub fn connections(&self) -> ConnectionMap {
        self.connections.clone()
    }

    /// Runs the reconciliation loop until the task is dropped.
    ///
    /// A failed cycle is logged and retried on the next interval — never
    /// fatal.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.config.reconcile_interval.as_secs(),
            "federation supervisor started"
        );

        loop {
            if let Err(e) = self.reconcile_once().await {
                tracing::error!(error = %e, "reconciliation cycle failed");
            }
            sleep(self.config.reconcile_interval).await;
        }
    }

    /// One reconciliation pass.
    ///
    /// 1. Fetch enabled outbound peers.
    /// 2. Drop connections whose peer is disabled or gone.
    /// 3. For each desired peer with no healthy connection, tear down
    ///    whatever is left and attempt one fresh connect.
    pub async fn reconcile_once(&self) -> Result<(), BridgeError> {
        let pool = self.pool.clone();
        let peers = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            registry::list_enabled_outbound(&conn)
        })
        .await??;

        let desired: HashSet<i64> = peers.iter().map(|p| p.id).collect();
        let mut map = self.connections.write().await;

        let stale: Vec<i64> = map
            .keys()
            .filter(|id| !desired.contains(id))
            .copied()
            .collect();
        for peer_id in stale {
            if let Some(mut connection) = map.remove(&peer_id) {
                connection.disconnect().await;
                tracing::info!(peer_id, "removed connection for disabled peer");
            }
        }

        for peer in peers {
            let healthy = map.get(&peer.id).is_some_and(|c| c.is_connected());
            if healthy {
                continue;
            }

            if let Some(mut dead) = map.remove(&peer.id) {
                dead.disconnect().await;
            }

            let mut connection = PeerConnection::new(
                peer.clone(),
                self.pool.clone(),
                self.config.clone(),
                self.live_tx.clone(),
            );
            match connection.connect().await {
                Ok(()) => {
                    map.insert(peer.id, connection);
                }
                Err(e) => {
                    // Already persisted on the peer row; retried next cycle.
                    tracing::warn!(
                        peer = %peer.name,
                        error = %e,
                        "connection attempt failed, will retry next cycle"
                    );
                }
            }
        }

        Ok(())
    }
}

/// Disconnects every live connection. Called on shutdown.
pub async fn shutdown_all(connections: &ConnectionMap) {
    let mut map = connections.write().await;
    for (_, mut connection) in map.drain() {
        connection.disconnect().await;
    }
}
