//! Read-only federation status endpoints.
//!
//! Consumed by the admin surface. Certificate and key material never
//! leaves the registry — peers are serialized through
//! [`PeerDefinition::summary`], which replaces the PEM columns with
//! presence flags.
//!
//! [`PeerDefinition::summary`]: tacfed_types::PeerDefinition::summary

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tacfed_bridge::{outbound, registry};

use crate::AppState;

/// `GET /api/federation/peers` — every peer with its sync statistics.
pub async fn list_peers_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, StatusCode> {
    let pool = state.pool.clone();
    let max_retries = state.max_retries;

    let result = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        let peers = registry::list_peers(&conn)?;

        let mut out = Vec::with_capacity(peers.len());
        for peer in peers {
            let sync = outbound::sync_status(&conn, peer.id, max_retries)?;
            out.push(json!({
                "peer": peer.summary(),
                "sync": sync,
            }));
        }
        Ok::<_, tacfed_bridge::BridgeError>(out)
    })
    .await;

    match result {
        Ok(Ok(peers)) => Ok(Json(json!({ "peers": peers }))),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "failed to load federation status");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            tracing::error!(error = %e, "federation status task join error");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// `GET /api/federation/peers/{id}` — one peer with its sync statistics.
pub async fn get_peer_handler(
    State(state): State<AppState>,
    Path(peer_id): Path<i64>,
) -> Result<Json<Value>, StatusCode> {
    let pool = state.pool.clone();
    let max_retries = state.max_retries;

    let result = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        let peer = registry::get_peer(&conn, peer_id)?;
        let payload = match peer {
            Some(peer) => {
                let sync = outbound::sync_status(&conn, peer.id, max_retries)?;
                Some(json!({
                    "peer": peer.summary(),
                    "sync": sync,
                }))
            }
            None => None,
        };
        Ok::<_, tacfed_bridge::BridgeError>(payload)
    })
    .await;

    match result {
        Ok(Ok(Some(payload))) => Ok(Json(payload)),
        Ok(Ok(None)) => Err(StatusCode::NOT_FOUND),
        Ok(Err(e)) => {
            tracing::error!(peer_id, error = %e, "failed to load peer status");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            tracing::error!(peer_id, error = %e, "peer status task join error");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
