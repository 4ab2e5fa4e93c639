//! Peer definition types.

use serde::{Deserialize, Serialize};

use crate::{ConnectionStatus, PeerDirection, PushClass};

/// A configured federation peer as stored in the registry.
///
/// Created and edited by the admin surface; the bridge treats every field
/// as read-only except the observed-state fields (`connection_status`,
/// `last_connected`, `last_error` and the counters), which only the bridge
/// writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDefinition {
    pub id: i64,
    /// Unique human-readable name.
    pub name: String,
    pub description: Option<String>,
    /// IP address or hostname of the remote server.
    pub address: String,
    pub port: u16,
    pub direction: PeerDirection,
    /// Wire protocol variant ("v1" legacy, "v2" current).
    pub protocol_version: String,
    pub use_tls: bool,
    /// PEM bundle used to verify the remote certificate chain.
    pub ca_certificate: Option<String>,
    /// PEM client certificate for mutual TLS.
    pub client_certificate: Option<String>,
    /// PEM client key for mutual TLS.
    pub client_key: Option<String>,
    /// When false, the certificate chain is still verified against the CA
    /// but the hostname check is skipped.
    pub verify_hostname: bool,
    pub enabled: bool,
    /// Data classes this peer receives.
    pub push_classes: Vec<PushClass>,
    /// When set, only changes for these mission names are queued.
    pub mission_filter: Option<Vec<String>>,
    pub connection_status: ConnectionStatus,
    pub last_connected: Option<String>,
    pub last_error: Option<String>,
    pub events_sent: i64,
    pub events_failed: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl PeerDefinition {
    /// True when the peer's push policy includes the given class.
    pub fn pushes(&self, class: PushClass) -> bool {
        self.push_classes.contains(&class)
    }

    /// True when the peer should receive changes for `mission_name`.
    ///
    /// A peer without a filter accepts every mission.
    pub fn accepts_mission(&self, mission_name: &str) -> bool {
        match &self.mission_filter {
            Some(filter) => filter.iter().any(|m| m == mission_name),
            None => true,
        }
    }

    /// Redacted view for the status surface.
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            address: self.address.clone(),
            port: self.port,
            direction: self.direction,
            protocol_version: self.protocol_version.clone(),
            use_tls: self.use_tls,
            has_ca_certificate: self.ca_certificate.is_some(),
            has_client_certificate: self.client_certificate.is_some(),
            has_client_key: self.client_key.is_some(),
            verify_hostname: self.verify_hostname,
            enabled: self.enabled,
            push_classes: self.push_classes.clone(),
            mission_filter: self.mission_filter.clone(),
            connection_status: self.connection_status,
            last_connected: self.last_connected.clone(),
            last_error: self.last_error.clone(),
            events_sent: self.events_sent,
            events_failed: self.events_failed,
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

/// A peer serialized for the status API — key material replaced by
/// presence flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub address: String,
    pub port: u16,
    pub direction: PeerDirection,
    pub protocol_version: String,
    pub use_tls: bool,
    pub has_ca_certificate: bool,
    pub has_client_certificate: bool,
    pub has_client_key: bool,
    pub verify_hostname: bool,
    pub enabled: bool,
    pub push_classes: Vec<PushClass>,
    pub mission_filter: Option<Vec<String>>,
    pub connection_status: ConnectionStatus,
    pub last_connected: Option<String>,
    pub last_error: Option<String>,
    pub events_sent: i64,
    pub events_failed: i64,
    pub created_at: String,
    pub updated_at: String,
}
