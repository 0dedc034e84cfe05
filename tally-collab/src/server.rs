//! WebSocket sync server owning the authoritative store.
//!
//! Architecture:
//! ```text
//! Client A ──┐                          ┌── TopicDb (RocksDB, optional)
//!             ├── Request ──► LocalStore ┤
//! Client B ──┘                    │     └── in-memory map
//!                                 │
//!                          change feed (one listener per connection)
//!                                 │
//!                      ┌──────────┼───────────┐
//!                      ▼          ▼           ▼
//!                   Client A   Client B    Client C   (Snapshot frames)
//! ```
//!
//! Every connection owns an [`Outbox`]. The connection's store listener
//! replaces the outbox's pending snapshot from inside the store's write
//! section, so a slow client holds at most one unsent snapshot no matter
//! how fast the store changes. A response is queued with the store revision
//! current when it was produced and leaves only after a snapshot at least
//! that new, so a client always receives the snapshot of its own write
//! first.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tally_core::Snapshot;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{MessageType, Request, Response, SyncMessage};
use crate::store::{Listener, LocalStore, Store, StoreConfig, StoreError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Connections beyond this are refused
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            storage_path: None,
            max_connections: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub refused_connections: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_bytes: u64,
    pub snapshots_pushed: u64,
    /// Snapshots replaced by a newer one before they were sent
    pub snapshots_coalesced: u64,
}

/// Next frame due on one connection.
#[derive(Debug)]
enum Frame {
    Snapshot {
        snapshot: Arc<Snapshot>,
        /// Revisions superseded since the last snapshot sent
        skipped: u64,
    },
    Response(Vec<u8>),
}

/// Frames waiting for one connection: the newest unsent snapshot plus
/// responses in request order.
struct Outbox {
    snapshots: watch::Receiver<Option<Arc<Snapshot>>>,
    /// Revision of the last snapshot sent, or the store revision at
    /// subscribe time
    sent_revision: u64,
    /// Encoded responses, each with the revision it must follow
    responses: VecDeque<(u64, Vec<u8>)>,
}

impl Outbox {
    fn new(snapshots: watch::Receiver<Option<Arc<Snapshot>>>, sent_revision: u64) -> Self {
        Self {
            snapshots,
            sent_revision,
            responses: VecDeque::new(),
        }
    }

    /// Queue a response that may leave once a snapshot at `after_revision`
    /// has been sent.
    fn push_response(&mut self, after_revision: u64, frame: Vec<u8>) {
        self.responses.push_back((after_revision, frame));
    }

    /// Take the next frame that may be sent now. A newer snapshot always
    /// goes before any queued response.
    fn next_frame(&mut self) -> Option<Frame> {
        let newest = self.snapshots.borrow_and_update().clone();
        if let Some(snapshot) = newest {
            if snapshot.revision > self.sent_revision {
                let skipped = snapshot.revision - self.sent_revision - 1;
                self.sent_revision = snapshot.revision;
                return Some(Frame::Snapshot { snapshot, skipped });
            }
        }
        match self.responses.front() {
            Some((after, _)) if *after <= self.sent_revision => {
                self.responses.pop_front().map(|(_, frame)| Frame::Response(frame))
            }
            _ => None,
        }
    }

    /// Wait for a new snapshot. False once the listener is gone.
    async fn changed(&mut self) -> bool {
        self.snapshots.changed().await.is_ok()
    }

    fn queued_responses(&self) -> usize {
        self.responses.len()
    }
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    /// Authoritative store shared by all connections
    store: Arc<LocalStore>,
    stats: Arc<RwLock<ServerStats>>,
    /// Identity stamped on outgoing messages
    server_id: Uuid,
}

impl SyncServer {
    /// Create a server, opening persistent storage if configured.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store = match &config.storage_path {
            Some(path) => LocalStore::open(StoreConfig::at(path))?,
            None => LocalStore::in_memory(),
        };
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        Self::with_store(ServerConfig::default(), Arc::new(LocalStore::in_memory()))
    }

    /// Create with persistence enabled at the given path.
    pub fn with_storage(
        bind_addr: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        Self::new(ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..ServerConfig::default()
        })
    }

    /// Serve an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<LocalStore>) -> Self {
        Self {
            config,
            store,
            stats: Arc::new(RwLock::new(ServerStats::default())),
            server_id: Uuid::new_v4(),
        }
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!(
            "Sync server listening on {} ({})",
            self.config.bind_addr,
            if self.store.is_persistent() { "persistent" } else { "in-memory" }
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let active = self.stats.read().await.active_connections;
            if active as usize >= self.config.max_connections {
                log::warn!("Refusing {addr}: {active} connections open");
                self.stats.write().await.refused_connections += 1;
                continue;
            }

            let store = self.store.clone();
            let stats = self.stats.clone();
            let server_id = self.server_id;

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, store, stats.clone(), server_id).await {
                    log::error!("Connection error from {addr}: {e}");
                }
                let mut s = stats.write().await;
                s.active_connections = s.active_connections.saturating_sub(1);
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        store: Arc<LocalStore>,
        stats: Arc<RwLock<ServerStats>>,
        server_id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        // The listener keeps only the newest snapshot; encoding happens here.
        let (snap_tx, snap_rx) = watch::channel::<Option<Arc<Snapshot>>>(None);
        let listener: Listener = Arc::new(move |snapshot: Arc<Snapshot>| {
            snap_tx.send_replace(Some(snapshot));
        });
        let subscription = store.subscribe(listener).await?;
        let mut outbox = Outbox::new(snap_rx, store.revision().await);

        let mut client_name: Option<String> = None;

        loop {
            while let Some(frame) = outbox.next_frame() {
                let data = match frame {
                    Frame::Snapshot { snapshot, skipped } => {
                        {
                            let mut s = stats.write().await;
                            s.snapshots_pushed += 1;
                            s.snapshots_coalesced += skipped;
                        }
                        if skipped > 0 {
                            log::debug!(
                                "{addr} skipped {skipped} snapshots, sending revision {}",
                                snapshot.revision
                            );
                        }
                        SyncMessage::snapshot(server_id, &snapshot)?.encode()?
                    }
                    Frame::Response(data) => data,
                };
                ws_sender.send(Message::Binary(data.into())).await?;
            }

            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            stats.write().await.total_bytes += bytes.len() as u64;

                            let sync_msg = match SyncMessage::decode(&bytes) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                    continue;
                                }
                            };

                            match sync_msg.msg_type {
                                MessageType::Hello => {
                                    let name = sync_msg
                                        .hello_name()
                                        .unwrap_or_else(|_| "Anonymous".to_string());
                                    log::info!("Client {name} ({}) joined from {addr}", sync_msg.peer_id);
                                    client_name = Some(name);
                                }

                                MessageType::Request => {
                                    let response = match sync_msg.request_payload() {
                                        Ok(request) => {
                                            log::debug!("Request {} from {addr}: {request:?}", sync_msg.request_id);
                                            apply_request(store.as_ref(), request).await
                                        }
                                        Err(e) => Response::Failed(StoreError::ProtocolError(e.to_string())),
                                    };

                                    {
                                        let mut s = stats.write().await;
                                        s.total_requests += 1;
                                        if matches!(response, Response::Failed(_)) {
                                            s.failed_requests += 1;
                                        }
                                    }

                                    // Read after the call: covers the snapshot of this write.
                                    let after_revision = store.revision().await;
                                    let reply = SyncMessage::response(server_id, sync_msg.request_id, &response)?;
                                    outbox.push_response(after_revision, reply.encode()?);
                                }

                                other => {
                                    log::debug!("Unexpected {other:?} from {addr}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // A newer snapshot is waiting
                changed = outbox.changed() => {
                    if !changed {
                        log::warn!("Store listener for {addr} is gone");
                        break;
                    }
                }
            }
        }

        subscription.release();
        if outbox.queued_responses() > 0 {
            log::debug!("Dropping {} unsent responses for {addr}", outbox.queued_responses());
        }
        log::info!(
            "Client {} at {addr} disconnected",
            client_name.as_deref().unwrap_or("Anonymous")
        );
        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the authoritative store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }
}

/// Execute one client request against the store.
async fn apply_request(store: &dyn Store, request: Request) -> Response {
    let result = match request {
        Request::Create(topic) => store.create(topic).await.map(Response::Created),
        Request::Update { id, answers } => store
            .update(id, answers)
            .await
            .map(|version| Response::Updated { version }),
        Request::UpdateIf {
            id,
            expected_version,
            answers,
        } => store
            .update_if(id, expected_version, answers)
            .await
            .map(|version| Response::Updated { version }),
        Request::Delete(id) => store.delete(id).await.map(|()| Response::Deleted),
        Request::Get(id) => store.get(id).await.map(Response::Topic),
        Request::List => store.list().await.map(Response::Snapshot),
    };
    result.unwrap_or_else(Response::Failed)
}
