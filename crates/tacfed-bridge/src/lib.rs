//! Federation bridge for tactical-data servers.
//!
//! The bridge keeps persistent, optionally mutually-authenticated TLS
//! connections to peer servers, frames CoT documents over the raw byte
//! streams, guarantees at-least-once delivery of durable mission changes
//! through a persisted retry queue, and fans live events out to every
//! eligible peer.
//!
//! # Architecture
//!
//! - [`supervisor::Supervisor`] reconciles the desired peer set (the
//!   registry) against the live connection set on a fixed interval. It is
//!   the sole writer of the peer-id → connection map.
//! - [`connection::PeerConnection`] owns one physical link and runs three
//!   loops against it: sender (drains the durable queue), receiver
//!   (frames and ingests inbound documents), heartbeat (keep-alive
//!   cadence). Writes to the socket are serialized by one lock per
//!   connection.
//! - [`outbound`] is the durable queue: idempotent enqueue on
//!   (peer, change), FIFO per peer, bounded retries, no deletion.
//! - [`bus`] bridges the local live-event fanout to connected peers,
//!   best-effort and independent of the durable path.
//!
//! No failure in this crate is process-fatal: a peer that cannot be
//! reached is recorded on its registry row and retried next cycle while
//! every other peer keeps flowing.

pub mod bus;
pub mod config;
pub mod connection;
pub mod error;
pub mod outbound;
pub mod registry;
pub mod supervisor;
pub mod tls;

pub use config::BridgeConfig;
pub use connection::PeerConnection;
pub use error::BridgeError;
pub use supervisor::{ConnectionMap, Supervisor};
