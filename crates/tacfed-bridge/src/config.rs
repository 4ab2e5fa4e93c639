//! Bridge runtime tunables.

use std::time::Duration;

/// Runtime configuration for the federation bridge.
///
/// The server binary populates this from its `[federation]` config
/// section; tests shrink the intervals to keep runs fast.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Per-deployment node identifier, carried in heartbeat pings.
    pub node_id: String,

    /// Ceiling on per-record send attempts. A record at the ceiling is
    /// excluded from further polls but stays visible as pending.
    pub max_retries: i64,

    /// Page size for each durable-queue poll.
    pub send_batch_size: i64,

    /// Deadline for the TCP connect and the TLS handshake, each.
    pub connect_timeout: Duration,

    /// Receiver read timeout. A timeout is not an error — the loop just
    /// rechecks its flags and reads again.
    pub read_timeout: Duration,

    /// Sender sleep when the queue is empty.
    pub poll_interval: Duration,

    /// Sender sleep after a transient queue poll error, shorter than the
    /// idle interval so a recovered store is picked up quickly.
    pub poll_error_backoff: Duration,

    /// Keep-alive cadence.
    pub heartbeat_interval: Duration,

    /// Supervisor reconciliation cadence.
    pub reconcile_interval: Duration,

    /// How long disconnect waits for each loop before abandoning it.
    pub shutdown_join_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            node_id: "tacfed".to_string(),
            max_retries: 5,
            send_batch_size: 10,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(5),
            poll_error_backoff: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(60),
            shutdown_join_timeout: Duration::from_secs(5),
        }
    }
}
