//! Mission change log and outbound durable queue.
//!
//! Enqueue is idempotent on (peer, change) — the `INSERT OR IGNORE`
//! rides the UNIQUE constraint, so producer-side retries are safe. Rows
//! are never deleted; exhausted records surface only through
//! [`sync_status`].

use rusqlite::{params, Connection, OptionalExtension};
use tacfed_types::{MissionChange, OutboundRecord, PushClass, SyncStatus};

use crate::error::BridgeError;
use crate::registry;

/// Stored error text is truncated to fit the column.
const MAX_ERROR_LEN: usize = 1000;

/// Fields accepted when recording a change in the change log.
#[derive(Debug, Clone)]
pub struct NewChange {
    pub uid: String,
    pub mission_name: String,
    pub creator_uid: String,
    pub change_type: String,
    pub content: Option<String>,
    pub content_uid: Option<String>,
    /// True when the change arrived via federation. Federated changes
    /// are never queued for outbound federation.
    pub federated: bool,
    pub source_peer_id: Option<i64>,
}

impl NewChange {
    /// A locally authored change.
    pub fn local(uid: &str, mission_name: &str, creator_uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            mission_name: mission_name.to_string(),
            creator_uid: creator_uid.to_string(),
            change_type: "ADD_CONTENT".to_string(),
            content: None,
            content_uid: None,
            federated: false,
            source_peer_id: None,
        }
    }
}

/// Inserts a change into the change log and returns its id.
pub fn insert_change(conn: &Connection, change: &NewChange) -> Result<i64, BridgeError> {
    conn.execute(
        "INSERT INTO mission_changes (
            uid, mission_name, creator_uid, change_type, content, content_uid,
            federated, source_peer_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            change.uid,
            change.mission_name,
            change.creator_uid,
            change.change_type,
            change.content,
            change.content_uid,
            change.federated,
            change.source_peer_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetches one change from the change log.
pub fn get_change(conn: &Connection, change_id: i64) -> Result<Option<MissionChange>, BridgeError> {
    let change = conn
        .query_row(
            "SELECT id, uid, mission_name, creator_uid, change_type, content, content_uid,
                    federated, source_peer_id, created_at
             FROM mission_changes WHERE id = ?1",
            params![change_id],
            change_from_row,
        )
        .optional()?;
    Ok(change)
}

/// Queues a committed change for every eligible peer.
///
/// Eligible means: enabled, push policy includes `missions`, and the
/// peer's mission filter (when set) names the change's mission. A change
/// tagged federation-sourced is never queued, for any peer — that is the
/// loop-prevention invariant.
///
/// Returns the number of records actually created; pairs that already
/// exist are skipped silently, which makes producer-side re-enqueue a
/// no-op.
pub fn enqueue_change(conn: &Connection, change_id: i64) -> Result<usize, BridgeError> {
    let change = get_change(conn, change_id)?.ok_or(BridgeError::ChangeNotFound(change_id))?;

    if change.federated {
        tracing::debug!(
            change_id,
            "change is federation-sourced, not re-queued for federation"
        );
        return Ok(0);
    }

    let mut created = 0;
    for peer in registry::list_peers(conn)? {
        if !peer.enabled || !peer.pushes(PushClass::Missions) {
            continue;
        }
        if !peer.accepts_mission(&change.mission_name) {
            continue;
        }

        created += conn.execute(
            "INSERT OR IGNORE INTO federation_outbound (peer_id, change_id) VALUES (?1, ?2)",
            params![peer.id, change_id],
        )?;
    }

    tracing::debug!(change_id, created, "queued change for federation");
    Ok(created)
}

/// Eligible records for one peer, oldest first.
///
/// Eligible means unsent with retries remaining. Exhausted records are
/// excluded here but still counted by [`sync_status`].
pub fn pending_for_peer(
    conn: &Connection,
    peer_id: i64,
    max_retries: i64,
    limit: i64,
) -> Result<Vec<OutboundRecord>, BridgeError> {
    let mut stmt = conn.prepare(
        "SELECT id, peer_id, change_id, sent, sent_at, acknowledged, acknowledged_at,
                retry_count, last_retry_at, last_error, created_at
         FROM federation_outbound
         WHERE peer_id = ?1 AND sent = 0 AND retry_count < ?2
         ORDER BY id ASC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![peer_id, max_retries, limit], record_from_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

/// Marks a record delivered.
pub fn mark_sent(conn: &Connection, record_id: i64) -> Result<(), BridgeError> {
    conn.execute(
        "UPDATE federation_outbound
         SET sent = 1, sent_at = datetime('now'), last_error = NULL
         WHERE id = ?1",
        params![record_id],
    )?;
    Ok(())
}

/// Records a failed attempt: bumps the retry count and stores a bounded
/// error string. The record stays unsent and is picked up again until it
/// exhausts its retries.
pub fn record_send_failure(
    conn: &Connection,
    record_id: i64,
    error: &str,
) -> Result<(), BridgeError> {
    let truncated: String = error.chars().take(MAX_ERROR_LEN).collect();
    conn.execute(
        "UPDATE federation_outbound
         SET retry_count = retry_count + 1,
             last_retry_at = datetime('now'),
             last_error = ?2
         WHERE id = ?1",
        params![record_id, truncated],
    )?;
    Ok(())
}

/// Delivery statistics for one peer, derived purely from the queue.
pub fn sync_status(
    conn: &Connection,
    peer_id: i64,
    max_retries: i64,
) -> Result<SyncStatus, BridgeError> {
    let status = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(sent = 1), 0),
                COALESCE(SUM(sent = 0), 0),
                COALESCE(SUM(sent = 0 AND retry_count >= ?2), 0)
         FROM federation_outbound
         WHERE peer_id = ?1",
        params![peer_id, max_retries],
        |row| {
            Ok(SyncStatus {
                total: row.get(0)?,
                sent: row.get(1)?,
                pending: row.get(2)?,
                exhausted: row.get(3)?,
            })
        },
    )?;
    Ok(status)
}

fn change_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MissionChange> {
    Ok(MissionChange {
        id: row.get(0)?,
        uid: row.get(1)?,
        mission_name: row.get(2)?,
        creator_uid: row.get(3)?,
        change_type: row.get(4)?,
        content: row.get(5)?,
        content_uid: row.get(6)?,
        federated: row.get(7)?,
        source_peer_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboundRecord> {
    Ok(OutboundRecord {
        id: row.get(0)?,
        peer_id: row.get(1)?,
        change_id: row.get(2)?,
        sent: row.get(3)?,
        sent_at: row.get(4)?,
        acknowledged: row.get(5)?,
        acknowledged_at: row.get(6)?,
        retry_count: row.get(7)?,
        last_retry_at: row.get(8)?,
        last_error: row.get(9)?,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{create_peer, NewPeer};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        tacfed_db::run_migrations(&conn).unwrap();
        conn
    }

    fn local_change(conn: &Connection, uid: &str, mission: &str) -> i64 {
        insert_change(conn, &NewChange::local(uid, mission, "user-1")).unwrap()
    }

    #[test]
    fn committed_change_is_queued_once_per_eligible_peer() {
        let conn = setup();
        create_peer(&conn, &NewPeer::tcp("alpha", "h", 1000)).unwrap();
        create_peer(&conn, &NewPeer::tcp("bravo", "h", 1001)).unwrap();

        let change_id = local_change(&conn, "c1", "op-alpha");
        let created = enqueue_change(&conn, change_id).unwrap();
        assert_eq!(created, 2, "one record per eligible peer");

        for peer_id in [1, 2] {
            let pending = pending_for_peer(&conn, peer_id, 5, 10).unwrap();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].retry_count, 0);
            assert!(!pending[0].sent);
        }
    }

    #[test]
    fn enqueue_is_idempotent_on_the_peer_change_pair() {
        let conn = setup();
        create_peer(&conn, &NewPeer::tcp("alpha", "h", 1000)).unwrap();

        let change_id = local_change(&conn, "c1", "op-alpha");
        assert_eq!(enqueue_change(&conn, change_id).unwrap(), 1);
        assert_eq!(enqueue_change(&conn, change_id).unwrap(), 0, "re-enqueue is a no-op");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM federation_outbound", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn federated_changes_are_never_queued() {
        let conn = setup();
        create_peer(&conn, &NewPeer::tcp("alpha", "h", 1000)).unwrap();
        create_peer(&conn, &NewPeer::tcp("bravo", "h", 1001)).unwrap();

        let mut change = NewChange::local("c1", "op-alpha", "user-1");
        change.federated = true;
        change.source_peer_id = Some(1);
        let change_id = insert_change(&conn, &change).unwrap();

        assert_eq!(enqueue_change(&conn, change_id).unwrap(), 0);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM federation_outbound", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0, "no echo back to any peer, including the source");
    }

    #[test]
    fn disabled_peers_and_peers_without_the_missions_class_are_skipped() {
        let conn = setup();

        let mut disabled = NewPeer::tcp("alpha", "h", 1000);
        disabled.enabled = false;
        create_peer(&conn, &disabled).unwrap();

        let mut live_only = NewPeer::tcp("bravo", "h", 1001);
        live_only.push_classes = vec![PushClass::LiveEvents];
        create_peer(&conn, &live_only).unwrap();

        let change_id = local_change(&conn, "c1", "op-alpha");
        assert_eq!(enqueue_change(&conn, change_id).unwrap(), 0);
    }

    #[test]
    fn mission_filter_limits_what_a_peer_receives() {
        let conn = setup();
        let mut filtered = NewPeer::tcp("alpha", "h", 1000);
        filtered.mission_filter = Some(vec!["op-alpha".to_string()]);
        let peer_id = create_peer(&conn, &filtered).unwrap();

        let matching = local_change(&conn, "c1", "op-alpha");
        let other = local_change(&conn, "c2", "op-bravo");

        assert_eq!(enqueue_change(&conn, matching).unwrap(), 1);
        assert_eq!(enqueue_change(&conn, other).unwrap(), 0);

        let pending = pending_for_peer(&conn, peer_id, 5, 10).unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn pending_records_come_out_oldest_first() {
        let conn = setup();
        let peer_id = create_peer(&conn, &NewPeer::tcp("alpha", "h", 1000)).unwrap();

        for uid in ["c1", "c2", "c3"] {
            let id = local_change(&conn, uid, "op-alpha");
            enqueue_change(&conn, id).unwrap();
        }

        let pending = pending_for_peer(&conn, peer_id, 5, 10).unwrap();
        let change_ids: Vec<i64> = pending.iter().map(|r| r.change_id).collect();
        assert_eq!(change_ids, vec![1, 2, 3], "FIFO by enqueue order");
    }

    #[test]
    fn mark_sent_excludes_the_record_from_later_polls() {
        let conn = setup();
        let peer_id = create_peer(&conn, &NewPeer::tcp("alpha", "h", 1000)).unwrap();
        let change_id = local_change(&conn, "c1", "op-alpha");
        enqueue_change(&conn, change_id).unwrap();

        let record = &pending_for_peer(&conn, peer_id, 5, 10).unwrap()[0];
        record_send_failure(&conn, record.id, "first try failed").unwrap();
        mark_sent(&conn, record.id).unwrap();

        assert!(pending_for_peer(&conn, peer_id, 5, 10).unwrap().is_empty());

        let status = sync_status(&conn, peer_id, 5).unwrap();
        assert_eq!(status.sent, 1);
        assert_eq!(status.pending, 0);

        // last_error cleared on success
        let last_error: Option<String> = conn
            .query_row(
                "SELECT last_error FROM federation_outbound WHERE id = ?1",
                params![record.id],
                |r| r.get(0),
            )
            .unwrap();
        assert!(last_error.is_none());
    }

    #[test]
    fn retries_are_bounded_and_exhausted_records_stay_pending_in_status() {
        let conn = setup();
        let peer_id = create_peer(&conn, &NewPeer::tcp("alpha", "h", 1000)).unwrap();
        let change_id = local_change(&conn, "c1", "op-alpha");
        enqueue_change(&conn, change_id).unwrap();

        let record_id = pending_for_peer(&conn, peer_id, 3, 10).unwrap()[0].id;
        for _ in 0..3 {
            assert_eq!(pending_for_peer(&conn, peer_id, 3, 10).unwrap().len(), 1);
            record_send_failure(&conn, record_id, "connection reset").unwrap();
        }

        assert!(
            pending_for_peer(&conn, peer_id, 3, 10).unwrap().is_empty(),
            "record at the retry ceiling is excluded from polls"
        );

        let status = sync_status(&conn, peer_id, 3).unwrap();
        assert_eq!(status.total, 1);
        assert_eq!(status.pending, 1, "exhausted records still count as pending");
        assert_eq!(status.exhausted, 1);
    }

    #[test]
    fn failure_error_text_is_truncated() {
        let conn = setup();
        let peer_id = create_peer(&conn, &NewPeer::tcp("alpha", "h", 1000)).unwrap();
        let change_id = local_change(&conn, "c1", "op-alpha");
        enqueue_change(&conn, change_id).unwrap();

        let record_id = pending_for_peer(&conn, peer_id, 5, 10).unwrap()[0].id;
        let long_error = "x".repeat(5000);
        record_send_failure(&conn, record_id, &long_error).unwrap();

        let stored: String = conn
            .query_row(
                "SELECT last_error FROM federation_outbound WHERE id = ?1",
                params![record_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stored.len(), 1000);
    }

    #[test]
    fn disabling_a_peer_leaves_its_queue_intact() {
        let conn = setup();
        let peer_id = create_peer(&conn, &NewPeer::tcp("alpha", "h", 1000)).unwrap();
        for uid in ["c1", "c2", "c3", "c4", "c5"] {
            let id = local_change(&conn, uid, "op-alpha");
            enqueue_change(&conn, id).unwrap();
        }

        conn.execute(
            "UPDATE federation_peers SET enabled = 0 WHERE id = ?1",
            params![peer_id],
        )
        .unwrap();

        let status = sync_status(&conn, peer_id, 5).unwrap();
        assert_eq!(status.total, 5);
        assert_eq!(status.pending, 5, "records survive the peer being disabled");
    }
}
