//! Peer registry access.
//!
//! The registry is written by the admin surface; the bridge reads the
//! configuration columns and writes back only observed state — status,
//! last-connected, last-error, and the sent/failed counters.

use rusqlite::{params, Connection, OptionalExtension};
use tacfed_types::{ConnectionStatus, PeerDefinition, PeerDirection, PushClass};

use crate::error::BridgeError;

const PEER_COLUMNS: &str = "id, name, description, address, port, direction, protocol_version,
     use_tls, ca_certificate, client_certificate, client_key, verify_hostname,
     enabled, push_classes, mission_filter,
     connection_status, last_connected, last_error, events_sent, events_failed,
     created_at, updated_at";

/// Fields accepted when creating a peer. Everything else starts at its
/// schema default. Called by the admin surface, not by the bridge.
#[derive(Debug, Clone)]
pub struct NewPeer {
    pub name: String,
    pub description: Option<String>,
    pub address: String,
    pub port: u16,
    pub direction: PeerDirection,
    pub use_tls: bool,
    pub ca_certificate: Option<String>,
    pub client_certificate: Option<String>,
    pub client_key: Option<String>,
    pub verify_hostname: bool,
    pub enabled: bool,
    pub push_classes: Vec<PushClass>,
    pub mission_filter: Option<Vec<String>>,
}

impl NewPeer {
    /// A plaintext TCP peer with the default push policy.
    pub fn tcp(name: &str, address: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            address: address.to_string(),
            port,
            direction: PeerDirection::Outbound,
            use_tls: false,
            ca_certificate: None,
            client_certificate: None,
            client_key: None,
            verify_hostname: true,
            enabled: true,
            push_classes: vec![PushClass::LiveEvents, PushClass::Missions],
            mission_filter: None,
        }
    }
}

/// Inserts a peer row and returns its id.
pub fn create_peer(conn: &Connection, peer: &NewPeer) -> Result<i64, BridgeError> {
    let push_classes = serde_json::to_string(&peer.push_classes)?;
    let mission_filter = peer
        .mission_filter
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO federation_peers (
            name, description, address, port, direction, use_tls,
            ca_certificate, client_certificate, client_key, verify_hostname,
            enabled, push_classes, mission_filter
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            peer.name,
            peer.description,
            peer.address,
            peer.port,
            peer.direction.as_str(),
            peer.use_tls,
            peer.ca_certificate,
            peer.client_certificate,
            peer.client_key,
            peer.verify_hostname,
            peer.enabled,
            push_classes,
            mission_filter,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// All peers, for the status surface.
pub fn list_peers(conn: &Connection) -> Result<Vec<PeerDefinition>, BridgeError> {
    let sql = format!("SELECT {PEER_COLUMNS} FROM federation_peers ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], peer_from_row)?;

    let mut peers = Vec::new();
    for row in rows {
        peers.push(row?);
    }
    Ok(peers)
}

/// Enabled peers this server dials — the supervisor's desired set.
pub fn list_enabled_outbound(conn: &Connection) -> Result<Vec<PeerDefinition>, BridgeError> {
    let sql = format!(
        "SELECT {PEER_COLUMNS} FROM federation_peers
         WHERE enabled = 1 AND direction = 'outbound'
         ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], peer_from_row)?;

    let mut peers = Vec::new();
    for row in rows {
        peers.push(row?);
    }
    Ok(peers)
}

/// Fetches one peer by id.
pub fn get_peer(conn: &Connection, peer_id: i64) -> Result<Option<PeerDefinition>, BridgeError> {
    let sql = format!("SELECT {PEER_COLUMNS} FROM federation_peers WHERE id = ?1");
    let peer = conn
        .query_row(&sql, params![peer_id], peer_from_row)
        .optional()?;
    Ok(peer)
}

/// Persists connection status and error text for a peer.
///
/// `last_connected` is stamped only on the transition to `Connected`.
pub fn set_status(
    conn: &Connection,
    peer_id: i64,
    status: ConnectionStatus,
    error: Option<&str>,
) -> Result<(), BridgeError> {
    if status == ConnectionStatus::Connected {
        conn.execute(
            "UPDATE federation_peers
             SET connection_status = ?1, last_error = ?2,
                 last_connected = datetime('now'), updated_at = datetime('now')
             WHERE id = ?3",
            params![status.as_str(), error, peer_id],
        )?;
    } else {
        conn.execute(
            "UPDATE federation_peers
             SET connection_status = ?1, last_error = ?2, updated_at = datetime('now')
             WHERE id = ?3",
            params![status.as_str(), error, peer_id],
        )?;
    }
    Ok(())
}

/// Bumps the cumulative sent counter.
pub fn increment_sent(conn: &Connection, peer_id: i64) -> Result<(), BridgeError> {
    conn.execute(
        "UPDATE federation_peers SET events_sent = events_sent + 1 WHERE id = ?1",
        params![peer_id],
    )?;
    Ok(())
}

/// Bumps the cumulative failed counter.
pub fn increment_failed(conn: &Connection, peer_id: i64) -> Result<(), BridgeError> {
    conn.execute(
        "UPDATE federation_peers SET events_failed = events_failed + 1 WHERE id = ?1",
        params![peer_id],
    )?;
    Ok(())
}

fn peer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeerDefinition> {
    let direction: String = row.get(5)?;
    let direction = direction.parse::<PeerDirection>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let push_classes: String = row.get(13)?;
    let push_classes: Vec<PushClass> = serde_json::from_str(&push_classes).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(13, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let mission_filter: Option<String> = row.get(14)?;
    let mission_filter: Option<Vec<String>> = mission_filter
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    14,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    let status: String = row.get(15)?;
    let status = status.parse::<ConnectionStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(15, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(PeerDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        address: row.get(3)?,
        port: row.get(4)?,
        direction,
        protocol_version: row.get(6)?,
        use_tls: row.get(7)?,
        ca_certificate: row.get(8)?,
        client_certificate: row.get(9)?,
        client_key: row.get(10)?,
        verify_hostname: row.get(11)?,
        enabled: row.get(12)?,
        push_classes,
        mission_filter,
        connection_status: status,
        last_connected: row.get(16)?,
        last_error: row.get(17)?,
        events_sent: row.get(18)?,
        events_failed: row.get(19)?,
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        tacfed_db::run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn created_peer_round_trips() {
        let conn = setup();
        let mut new_peer = NewPeer::tcp("alpha", "10.0.0.1", 8089);
        new_peer.mission_filter = Some(vec!["op-alpha".to_string()]);

        let id = create_peer(&conn, &new_peer).unwrap();
        let peer = get_peer(&conn, id).unwrap().expect("peer should exist");

        assert_eq!(peer.name, "alpha");
        assert_eq!(peer.port, 8089);
        assert_eq!(peer.direction, PeerDirection::Outbound);
        assert_eq!(
            peer.push_classes,
            vec![PushClass::LiveEvents, PushClass::Missions]
        );
        assert_eq!(peer.mission_filter, Some(vec!["op-alpha".to_string()]));
        assert_eq!(peer.connection_status, ConnectionStatus::Disconnected);
        assert_eq!(peer.events_sent, 0);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let conn = setup();
        create_peer(&conn, &NewPeer::tcp("alpha", "10.0.0.1", 8089)).unwrap();
        let err = create_peer(&conn, &NewPeer::tcp("alpha", "10.0.0.2", 8090));
        assert!(err.is_err(), "peer names must be unique");
    }

    #[test]
    fn enabled_outbound_listing_skips_disabled_and_inbound_peers() {
        let conn = setup();
        create_peer(&conn, &NewPeer::tcp("alpha", "h", 1000)).unwrap();

        let mut disabled = NewPeer::tcp("bravo", "h", 1001);
        disabled.enabled = false;
        create_peer(&conn, &disabled).unwrap();

        let mut inbound = NewPeer::tcp("charlie", "h", 1002);
        inbound.direction = PeerDirection::Inbound;
        create_peer(&conn, &inbound).unwrap();

        let peers = list_enabled_outbound(&conn).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "alpha");
    }

    #[test]
    fn status_updates_stamp_last_connected_only_on_connect() {
        let conn = setup();
        let id = create_peer(&conn, &NewPeer::tcp("alpha", "h", 1000)).unwrap();

        set_status(&conn, id, ConnectionStatus::Error, Some("refused")).unwrap();
        let peer = get_peer(&conn, id).unwrap().unwrap();
        assert_eq!(peer.connection_status, ConnectionStatus::Error);
        assert_eq!(peer.last_error.as_deref(), Some("refused"));
        assert!(peer.last_connected.is_none());

        set_status(&conn, id, ConnectionStatus::Connected, None).unwrap();
        let peer = get_peer(&conn, id).unwrap().unwrap();
        assert_eq!(peer.connection_status, ConnectionStatus::Connected);
        assert!(peer.last_error.is_none());
        assert!(peer.last_connected.is_some());
    }

    #[test]
    fn counters_accumulate() {
        let conn = setup();
        let id = create_peer(&conn, &NewPeer::tcp("alpha", "h", 1000)).unwrap();

        increment_sent(&conn, id).unwrap();
        increment_sent(&conn, id).unwrap();
        increment_failed(&conn, id).unwrap();

        let peer = get_peer(&conn, id).unwrap().unwrap();
        assert_eq!(peer.events_sent, 2);
        assert_eq!(peer.events_failed, 1);
    }
}
