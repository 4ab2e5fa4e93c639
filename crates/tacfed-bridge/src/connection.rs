//! A single link to one federation peer.
//!
//! Each connection owns a socket (plain TCP or TLS) and runs three loops
//! against it: the sender drains this peer's durable queue, the receiver
//! frames and ingests inbound documents, and the heartbeat keeps the
//! link from idling out. All three observe the shared `running` and
//! `connected` flags before every blocking call; writes are serialized
//! by one lock held only for the duration of a single write.
//!
//! Database work always happens on the blocking pool in short
//! transactions — never while a socket operation is in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_rustls::TlsConnector;

use tacfed_cot::{
    mission_change_event, parse_event, ping_event, CotFramer, FederatedChange, COT_TYPE_PING,
};
use tacfed_db::DbPool;
use tacfed_types::{ConnectionStatus, LiveEvent, OutboundRecord, PeerDefinition};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::outbound::{self, NewChange};
use crate::registry;
use crate::tls;

/// Object-safe alias for the two stream flavors a link can ride on.
trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

type BoxedStream = Box<dyn AsyncStream>;

/// State shared between the connection handle and its loops.
struct ConnectionShared {
    peer_id: i64,
    peer_name: String,
    /// Cooperative shutdown flag, observed by every loop.
    running: AtomicBool,
    /// Link health. Cleared by whichever loop observes the failure.
    connected: AtomicBool,
    /// Write half of the socket. One lock per connection serializes the
    /// sender and heartbeat loops; held only per write.
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    /// Stamped on every successful read or write.
    last_activity: std::sync::Mutex<Instant>,
    pool: DbPool,
    config: Arc<BridgeConfig>,
    live_tx: broadcast::Sender<LiveEvent>,
}

impl ConnectionShared {
    fn is_live(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        let mut guard = self
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Instant::now();
    }

    /// Runs one short database operation on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, BridgeError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }

    /// Writes one complete document under the writer lock.
    async fn write_all(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BridgeError::NotConnected);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(BridgeError::NotConnected)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        self.touch();
        Ok(())
    }

    async fn persist_status(&self, status: ConnectionStatus, error: Option<String>) {
        let peer_id = self.peer_id;
        let res = self
            .with_conn(move |conn| registry::set_status(conn, peer_id, status, error.as_deref()))
            .await;
        if let Err(e) = res {
            tracing::error!(peer_id, error = %e, "failed to persist peer status");
        }
    }
}

/// Handle for one peer link. Owned exclusively by the supervisor's
/// connection map; at most one exists per peer id.
pub struct PeerConnection {
    peer: PeerDefinition,
    shared: Arc<ConnectionShared>,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerConnection {
    pub fn new(
        peer: PeerDefinition,
        pool: DbPool,
        config: Arc<BridgeConfig>,
        live_tx: broadcast::Sender<LiveEvent>,
    ) -> Self {
        let shared = Arc::new(ConnectionShared {
            peer_id: peer.id,
            peer_name: peer.name.clone(),
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            writer: Mutex::new(None),
            last_activity: std::sync::Mutex::new(Instant::now()),
            pool,
            config,
            live_tx,
        });
        Self {
            peer,
            shared,
            tasks: Vec::new(),
        }
    }

    pub fn peer(&self) -> &PeerDefinition {
        &self.peer
    }

    pub fn peer_id(&self) -> i64 {
        self.peer.id
    }

    pub fn peer_name(&self) -> &str {
        &self.peer.name
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Instant of the last successful read or write on this link.
    pub fn last_activity(&self) -> Instant {
        *self
            .shared
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Establishes the link and starts the three loops.
    ///
    /// Idempotent: calling this while already connected is a successful
    /// no-op. On failure the error is persisted on the peer row and no
    /// loops are left running — the supervisor retries next cycle.
    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        if self.is_connected() {
            return Ok(());
        }

        tracing::info!(
            peer = %self.peer.name,
            address = %self.peer.address,
            port = self.peer.port,
            tls = self.peer.use_tls,
            "connecting to federation peer"
        );

        match self.dial().await {
            Ok(stream) => {
                let (reader, writer) = tokio::io::split(stream);
                *self.shared.writer.lock().await = Some(writer);
                self.shared.running.store(true, Ordering::SeqCst);
                self.shared.connected.store(true, Ordering::SeqCst);
                self.shared
                    .persist_status(ConnectionStatus::Connected, None)
                    .await;

                self.tasks.push(tokio::spawn(sender_loop(self.shared.clone())));
                self.tasks
                    .push(tokio::spawn(receiver_loop(self.shared.clone(), reader)));
                self.tasks
                    .push(tokio::spawn(heartbeat_loop(self.shared.clone())));

                tracing::info!(peer = %self.peer.name, "federation peer connected");
                Ok(())
            }
            Err(e) => {
                self.shared.connected.store(false, Ordering::SeqCst);
                self.shared
                    .persist_status(ConnectionStatus::Error, Some(e.to_string()))
                    .await;
                tracing::warn!(peer = %self.peer.name, error = %e, "federation peer connection failed");
                Err(e)
            }
        }
    }

    async fn dial(&self) -> Result<BoxedStream, BridgeError> {
        let connect_timeout = self.shared.config.connect_timeout;
        let tcp = timeout(
            connect_timeout,
            TcpStream::connect((self.peer.address.as_str(), self.peer.port)),
        )
        .await
        .map_err(|_| BridgeError::ConnectTimeout(connect_timeout))??;

        if !self.peer.use_tls {
            return Ok(Box::new(tcp));
        }

        let config = tls::client_config(&self.peer)?;
        let connector = TlsConnector::from(Arc::new(config));
        let name = tls::server_name(&self.peer.address)?;
        let stream = timeout(connect_timeout, connector.connect(name, tcp))
            .await
            .map_err(|_| BridgeError::ConnectTimeout(connect_timeout))??;
        Ok(Box::new(stream))
    }

    /// Tears the link down and stops the loops.
    ///
    /// Idempotent. Each loop is joined with a bounded wait; a loop that
    /// does not stop in time is abandoned, not treated as an error. The
    /// peer row is marked disconnected regardless of prior state.
    pub async fn disconnect(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);

        // Dropping the write half closes the outbound side of the socket.
        *self.shared.writer.lock().await = None;

        let join_timeout = self.shared.config.shutdown_join_timeout;
        for mut task in self.tasks.drain(..) {
            if timeout(join_timeout, &mut task).await.is_err() {
                task.abort();
                tracing::debug!(
                    peer = %self.shared.peer_name,
                    "loop did not stop within the join timeout, abandoned"
                );
            }
        }

        self.shared
            .persist_status(ConnectionStatus::Disconnected, None)
            .await;
        tracing::info!(peer = %self.shared.peer_name, "federation peer disconnected");
    }

    /// Writes raw wire bytes directly, bypassing the durable queue.
    ///
    /// This is the best-effort fast path used by the bus bridge; failures
    /// are the caller's to count, nothing is retried.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        self.shared.write_all(bytes).await
    }
}

/// Drains this peer's durable queue while the link is up.
async fn sender_loop(shared: Arc<ConnectionShared>) {
    tracing::info!(peer = %shared.peer_name, "sender loop started");
    let config = shared.config.clone();

    while shared.is_live() {
        let peer_id = shared.peer_id;
        let max_retries = config.max_retries;
        let batch_size = config.send_batch_size;
        let batch = shared
            .with_conn(move |conn| {
                outbound::pending_for_peer(conn, peer_id, max_retries, batch_size)
            })
            .await;

        match batch {
            Ok(records) if records.is_empty() => sleep(config.poll_interval).await,
            Ok(records) => {
                for record in records {
                    if !shared.is_live() {
                        break;
                    }
                    send_record(&shared, &record).await;
                }
            }
            Err(e) => {
                tracing::error!(peer = %shared.peer_name, error = %e, "queue poll failed");
                sleep(config.poll_error_backoff).await;
            }
        }
    }

    tracing::info!(peer = %shared.peer_name, "sender loop stopped");
}

/// One send attempt for one queued record.
async fn send_record(shared: &Arc<ConnectionShared>, record: &OutboundRecord) {
    let change_id = record.change_id;
    let wire = shared
        .with_conn(move |conn| {
            let change = outbound::get_change(conn, change_id)?
                .ok_or(BridgeError::ChangeNotFound(change_id))?;
            Ok(mission_change_event(&change).to_wire()?)
        })
        .await;

    let wire = match wire {
        Ok(wire) => wire,
        Err(e) => {
            // Resolution failure consumes a retry but leaves the link up.
            record_failure(shared, record.id, &e.to_string()).await;
            return;
        }
    };

    match shared.write_all(&wire).await {
        Ok(()) => {
            let record_id = record.id;
            let peer_id = shared.peer_id;
            let res = shared
                .with_conn(move |conn| {
                    outbound::mark_sent(conn, record_id)?;
                    registry::increment_sent(conn, peer_id)
                })
                .await;
            if let Err(e) = res {
                tracing::error!(peer = %shared.peer_name, error = %e, "failed to mark record sent");
            }
            tracing::debug!(peer = %shared.peer_name, change_id, "sent mission change");
        }
        Err(e) => {
            record_failure(shared, record.id, &e.to_string()).await;
            // A failed write means the link is dead; the record stays
            // queued and the supervisor rebuilds the link next cycle.
            shared.connected.store(false, Ordering::SeqCst);
            shared
                .persist_status(ConnectionStatus::Error, Some(e.to_string()))
                .await;
            tracing::warn!(peer = %shared.peer_name, error = %e, "send failed, link marked down");
        }
    }
}

async fn record_failure(shared: &Arc<ConnectionShared>, record_id: i64, error: &str) {
    let peer_id = shared.peer_id;
    let error = error.to_string();
    let res = shared
        .with_conn(move |conn| {
            outbound::record_send_failure(conn, record_id, &error)?;
            registry::increment_failed(conn, peer_id)
        })
        .await;
    if let Err(e) = res {
        tracing::error!(peer = %shared.peer_name, error = %e, "failed to record send failure");
    }
}

/// Reads the byte stream, frames it into documents, and ingests them.
async fn receiver_loop(shared: Arc<ConnectionShared>, mut reader: ReadHalf<BoxedStream>) {
    tracing::info!(peer = %shared.peer_name, "receiver loop started");
    let mut framer = CotFramer::new();
    let mut buf = vec![0u8; 8192];

    while shared.is_live() {
        match timeout(shared.config.read_timeout, reader.read(&mut buf)).await {
            // Read timeout: not an error, recheck flags and keep listening.
            Err(_) => continue,
            Ok(Ok(0)) => {
                tracing::warn!(peer = %shared.peer_name, "connection closed by peer");
                shared.connected.store(false, Ordering::SeqCst);
                shared
                    .persist_status(ConnectionStatus::Disconnected, None)
                    .await;
                break;
            }
            Ok(Ok(n)) => {
                shared.touch();
                framer.extend(&buf[..n]);
                loop {
                    match framer.next_document() {
                        Ok(Some(document)) => ingest_document(&shared, &document).await,
                        Ok(None) => break,
                        Err(e) => {
                            // The framer dropped its buffer; later
                            // documents frame cleanly again.
                            tracing::warn!(peer = %shared.peer_name, error = %e, "framing buffer reset");
                            break;
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::error!(peer = %shared.peer_name, error = %e, "receive failed");
                shared.connected.store(false, Ordering::SeqCst);
                shared
                    .persist_status(ConnectionStatus::Error, Some(e.to_string()))
                    .await;
                break;
            }
        }
    }

    tracing::info!(peer = %shared.peer_name, "receiver loop stopped");
}

/// Ingests one framed document from the peer.
///
/// Mission changes are stored tagged federation-sourced; everything but
/// heartbeats is re-published on the local distribution channel with its
/// origin attached so outbound paths never echo it back.
async fn ingest_document(shared: &Arc<ConnectionShared>, document: &[u8]) {
    let event = match parse_event(document) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(peer = %shared.peer_name, error = %e, "malformed document from peer, skipped");
            return;
        }
    };

    if event.event_type == COT_TYPE_PING {
        tracing::trace!(peer = %shared.peer_name, uid = %event.uid, "peer heartbeat");
        return;
    }

    match FederatedChange::from_event(&event, shared.peer_id) {
        Ok(Some(change)) => {
            let res = shared
                .with_conn(move |conn| {
                    outbound::insert_change(
                        conn,
                        &NewChange {
                            uid: change.uid,
                            mission_name: change.mission_name,
                            creator_uid: change.creator_uid,
                            change_type: change.change_type,
                            content: change.content,
                            content_uid: change.content_uid,
                            federated: true,
                            source_peer_id: Some(change.source_peer_id),
                        },
                    )
                })
                .await;
            match res {
                Ok(change_id) => {
                    tracing::debug!(
                        peer = %shared.peer_name,
                        change_id,
                        "ingested federated mission change"
                    );
                }
                Err(e) => {
                    tracing::error!(peer = %shared.peer_name, error = %e, "failed to store federated change");
                }
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(peer = %shared.peer_name, error = %e, "unusable mission change from peer, skipped");
            return;
        }
    }

    let _ = shared
        .live_tx
        .send(LiveEvent::federated(document.to_vec(), shared.peer_id));
}

/// Sends a keep-alive ping on a fixed cadence.
async fn heartbeat_loop(shared: Arc<ConnectionShared>) {
    tracing::info!(peer = %shared.peer_name, "heartbeat loop started");

    while shared.is_live() {
        sleep(shared.config.heartbeat_interval).await;
        if !shared.is_live() {
            break;
        }

        let wire = match ping_event(&shared.config.node_id).to_wire() {
            Ok(wire) => wire,
            Err(e) => {
                tracing::error!(peer = %shared.peer_name, error = %e, "failed to build ping");
                continue;
            }
        };

        if let Err(e) = shared.write_all(&wire).await {
            tracing::warn!(peer = %shared.peer_name, error = %e, "heartbeat send failed");
        }
    }

    tracing::info!(peer = %shared.peer_name, "heartbeat loop stopped");
}
