//! Live-event bus bridge.
//!
//! Consumes the local fanout of live events and forwards each one
//! directly to every connected peer whose push policy includes the
//! live-event class. This path bypasses the durable queue: it is
//! best-effort and low-latency, with no retries. A per-peer failure is
//! logged and counted against the peer, never resurfaced to the bus.

use tokio::sync::broadcast;

use tacfed_cot::parse_event;
use tacfed_db::DbPool;
use tacfed_types::{EventSource, LiveEvent, PushClass};

use crate::registry;
use crate::supervisor::ConnectionMap;

/// Runs the bus bridge until the channel closes.
pub async fn run_bus_bridge(
    connections: ConnectionMap,
    pool: DbPool,
    mut rx: broadcast::Receiver<LiveEvent>,
) {
    tracing::info!("bus bridge started");

    loop {
        match rx.recv().await {
            Ok(event) => forward_live_event(&connections, &pool, &event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Best-effort path: lagging drops events, it never blocks
                // the producers.
                tracing::warn!(skipped, "bus bridge lagged, live events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    tracing::info!("bus bridge stopped");
}

/// Fans one live event out to every eligible connected peer.
///
/// Returns once every eligible peer has been attempted, regardless of
/// individual failures — that return is the bus acknowledgement. An
/// event that does not parse as a CoT document at all is dropped without
/// redelivery; a federation-sourced event is never forwarded back out.
pub async fn forward_live_event(connections: &ConnectionMap, pool: &DbPool, event: &LiveEvent) {
    if let EventSource::Federated { peer_id } = event.source {
        tracing::trace!(peer_id, "federation-sourced event not forwarded back out");
        return;
    }

    if let Err(e) = parse_event(&event.payload) {
        tracing::warn!(error = %e, "undecodable live event rejected");
        return;
    }

    let map = connections.read().await;
    for connection in map.values() {
        if !connection.is_connected() || !connection.peer().pushes(PushClass::LiveEvents) {
            continue;
        }

        let peer_id = connection.peer_id();
        match connection.send_raw(&event.payload).await {
            Ok(()) => {
                bump_counter(pool, peer_id, true).await;
            }
            Err(e) => {
                tracing::warn!(
                    peer = %connection.peer_name(),
                    error = %e,
                    "live event forward failed"
                );
                bump_counter(pool, peer_id, false).await;
            }
        }
    }
}

async fn bump_counter(pool: &DbPool, peer_id: i64, sent: bool) {
    let pool = pool.clone();
    let res = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        if sent {
            registry::increment_sent(&conn, peer_id)
        } else {
            registry::increment_failed(&conn, peer_id)
        }
    })
    .await;

    match res {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(peer_id, error = %e, "failed to update peer counter"),
        Err(e) => tracing::error!(peer_id, error = %e, "counter task join error"),
    }
}
