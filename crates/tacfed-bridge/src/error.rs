//! Error types for the federation bridge.

use std::time::Duration;

/// Errors that can occur inside the bridge.
///
/// None of these are process-fatal; callers record them against the
/// offending peer and keep servicing the rest.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A database operation failed.
    #[error("bridge database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Checking a connection out of the pool failed.
    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON stored in a registry column could not be read or written.
    #[error("bridge serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A CoT document could not be framed, parsed, or serialized.
    #[error("cot codec error: {0}")]
    Cot(#[from] tacfed_cot::CotError),

    /// Socket-level I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS configuration or negotiation failed.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// Stored PEM material could not be parsed.
    #[error("invalid certificate material: {0}")]
    InvalidCertificate(String),

    /// The peer address is not a valid TLS server name.
    #[error("invalid server name '{0}'")]
    InvalidServerName(String),

    /// The connect attempt exceeded its deadline.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A referenced change is missing from the change log.
    #[error("change {0} not found")]
    ChangeNotFound(i64),

    /// A write was attempted on a connection that is not established.
    #[error("peer is not connected")]
    NotConnected,

    /// A blocking database task panicked or was cancelled.
    #[error("background task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
