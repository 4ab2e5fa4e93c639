//! Tacfed server binary — federation bridge plus status surface.
//!
//! Starts the connection supervisor and bus bridge (when federation is
//! enabled), serves the read-only status API over HTTP, and shuts the
//! peer links down gracefully on SIGTERM/SIGINT.

use std::net::SocketAddr;

use tacfed_bridge::supervisor::{shutdown_all, Supervisor};
use tacfed_server::{app, config, AppState};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("TACFED_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = tacfed_db::create_pool(
        &config.database.path,
        tacfed_db::DbRuntimeSettings::default(),
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = tacfed_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Start the federation bridge. The live_tx sender is the local bus
    // the domain layer publishes situational events into; it must stay
    // alive for the lifetime of the process or the bus bridge exits.
    let mut connections = None;
    let mut _live_tx: Option<broadcast::Sender<tacfed_types::LiveEvent>> = None;

    if config.federation.enabled {
        let bridge_config = config.federation.bridge_config();
        let (live_tx, live_rx) = broadcast::channel(256);

        let supervisor = Supervisor::new(pool.clone(), bridge_config, live_tx.clone());
        connections = Some(supervisor.connections());

        tokio::spawn(tacfed_bridge::bus::run_bus_bridge(
            supervisor.connections(),
            pool.clone(),
            live_rx,
        ));
        tokio::spawn(supervisor.run());

        _live_tx = Some(live_tx);
        tracing::info!(node_id = %config.federation.node_id, "federation bridge started");
    } else {
        tracing::info!("federation is disabled, serving status surface only");
    }

    // Build application
    let state = AppState {
        pool,
        node_id: config.federation.node_id.clone(),
        max_retries: config.federation.max_retries,
    };
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting tacfed server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    if let Some(connections) = connections {
        shutdown_all(&connections).await;
    }

    tracing::info!("tacfed server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
