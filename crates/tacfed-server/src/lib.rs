//! Tacfed server library logic.
//!
//! Hosts the read-only federation status surface. Everything it reports
//! is derived purely from the peer registry and the outbound queue — no
//! live call into the bridge is needed, so the surface stays accurate
//! even while a peer connection is mid-rebuild.

pub mod api_federation;
pub mod config;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tacfed_db::DbPool;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Per-deployment node identifier, reported by the health endpoint.
    pub node_id: String,
    /// Retry ceiling, needed to classify exhausted queue records.
    pub max_retries: i64,
}

/// Health check handler.
///
/// Returns `200 OK` with server status, version, and node id. Used by
/// load balancers and monitoring.
async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "node_id": state.node_id,
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/federation/peers",
            get(api_federation::list_peers_handler),
        )
        .route(
            "/api/federation/peers/{id}",
            get(api_federation::get_peer_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
