//! Shared types and constants for the tacfed federation bridge.
//!
//! This crate provides the domain types used across all tacfed crates:
//! peer definitions, outbound queue records, data-class and status enums,
//! and the live-event bus message. It depends on nothing in the workspace,
//! which keeps the dependency graph acyclic.

use serde::{Deserialize, Serialize};

mod peer;

pub use peer::{PeerDefinition, PeerSummary};

/// Connection status of a federation peer, as persisted in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No link is currently established.
    Disconnected,
    /// A link is established and the loops are running.
    Connected,
    /// The last connection attempt or session failed.
    Error,
}

impl ConnectionStatus {
    /// Returns the canonical string stored in the registry.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "connected" => Ok(Self::Connected),
            "error" => Ok(Self::Error),
            _ => Err(ParseEnumError("connection status", s.to_string())),
        }
    }
}

/// Direction of a federation link.
///
/// Only `Outbound` peers are dialed by the supervisor; `Inbound` rows
/// describe remote servers that connect to us and are not managed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerDirection {
    /// This server initiates the connection to the remote.
    Outbound,
    /// The remote server connects to this server.
    Inbound,
}

impl PeerDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        }
    }
}

impl std::str::FromStr for PeerDirection {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outbound" => Ok(Self::Outbound),
            "inbound" => Ok(Self::Inbound),
            _ => Err(ParseEnumError("peer direction", s.to_string())),
        }
    }
}

/// Classes of data a peer may opt into receiving.
///
/// Stored in the registry as a JSON array of the serialized labels, e.g.
/// `["live-events", "missions"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushClass {
    /// Low-latency situational-awareness events, forwarded best-effort.
    LiveEvents,
    /// Chat traffic.
    Chat,
    /// Durable mission changes, delivered via the outbound queue.
    Missions,
    /// Data package announcements.
    DataPackages,
    /// Video stream announcements.
    Video,
}

impl PushClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LiveEvents => "live-events",
            Self::Chat => "chat",
            Self::Missions => "missions",
            Self::DataPackages => "data-packages",
            Self::Video => "video",
        }
    }
}

/// Error returned when parsing an unknown enum label from the registry.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {0}: {1}")]
pub struct ParseEnumError(pub &'static str, pub String);

/// One durable change queued for delivery to one peer.
///
/// Rows are created when a mission change commits, mutated by the sender
/// loop on each attempt, and never deleted — exhausted records stay
/// visible for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundRecord {
    pub id: i64,
    pub peer_id: i64,
    pub change_id: i64,
    pub sent: bool,
    pub sent_at: Option<String>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<String>,
    pub retry_count: i64,
    pub last_retry_at: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
}

/// A committed domain change from the mission change log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionChange {
    pub id: i64,
    /// Event UID of the change.
    pub uid: String,
    pub mission_name: String,
    pub creator_uid: String,
    pub change_type: String,
    pub content: Option<String>,
    /// Target identifier of the changed content, if any.
    pub content_uid: Option<String>,
    /// True when this change arrived via federation. Federated changes are
    /// never re-queued for outbound federation.
    pub federated: bool,
    /// The peer the change arrived from, when federated.
    pub source_peer_id: Option<i64>,
    pub created_at: String,
}

/// Where a live event on the local bus originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Produced by a local client or service.
    Local,
    /// Ingested from a federated peer. Never forwarded back out.
    Federated { peer_id: i64 },
}

/// A live situational-awareness event on the local fanout bus.
///
/// The payload is the raw CoT document as it would appear on the wire.
#[derive(Debug, Clone)]
pub struct LiveEvent {
    pub payload: Vec<u8>,
    pub source: EventSource,
}

impl LiveEvent {
    /// A locally produced event.
    pub fn local(payload: Vec<u8>) -> Self {
        Self {
            payload,
            source: EventSource::Local,
        }
    }

    /// An event ingested from the given peer.
    pub fn federated(payload: Vec<u8>, peer_id: i64) -> Self {
        Self {
            payload,
            source: EventSource::Federated { peer_id },
        }
    }
}

/// Per-peer delivery statistics derived from the outbound queue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// All records ever queued for the peer.
    pub total: i64,
    /// Records delivered at least once.
    pub sent: i64,
    /// Records not yet delivered, including exhausted ones.
    pub pending: i64,
    /// Records that hit the retry ceiling and are no longer attempted.
    pub exhausted: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_status_round_trips_through_registry_labels() {
        for status in [
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connected,
            ConnectionStatus::Error,
        ] {
            let parsed: ConnectionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<ConnectionStatus>().is_err());
    }

    #[test]
    fn push_classes_serialize_as_kebab_case() {
        let json = serde_json::to_string(&vec![PushClass::LiveEvents, PushClass::DataPackages])
            .unwrap();
        assert_eq!(json, r#"["live-events","data-packages"]"#);

        let parsed: Vec<PushClass> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, vec![PushClass::LiveEvents, PushClass::DataPackages]);
    }

    #[test]
    fn federated_live_events_carry_their_source_peer() {
        let event = LiveEvent::federated(b"<event/>".to_vec(), 7);
        assert_eq!(event.source, EventSource::Federated { peer_id: 7 });
        assert_eq!(LiveEvent::local(vec![]).source, EventSource::Local);
    }
}
