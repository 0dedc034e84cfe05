//! WebSocket store client.
//!
//! [`RemoteStore`] implements [`Store`] by forwarding every call to a
//! [`SyncServer`](crate::server::SyncServer) and waiting for the correlated
//! response. Snapshots pushed by the server are delivered to local
//! listeners.
//!
//! One reader task handles frames in arrival order, so a write's snapshot
//! reaches listeners before the write's own call returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tally_core::{Answer, NewTopic, Snapshot, Topic, TopicId};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{MessageType, Request, Response, SyncMessage};
use crate::store::{ChangeFeed, Listener, Store, StoreError, Subscription};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the server
    pub server_url: String,
    /// Display name sent in the Hello message
    pub name: String,
    /// How long a call waits for its response
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            name: "Anonymous".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// A [`Store`] backed by a remote sync server.
pub struct RemoteStore {
    peer_id: Uuid,
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: mpsc::Sender<Message>,
    /// Calls awaiting a response, by request_id
    pending: PendingMap,
    next_request: AtomicU64,
    feed: ChangeFeed,
    tasks: Vec<JoinHandle<()>>,
}

impl RemoteStore {
    /// Connect to the server and introduce ourselves.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(config: ClientConfig) -> Result<Self, StoreError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(config.server_url.as_str())
            .await
            .map_err(|e| {
                log::error!("Failed to connect to {}: {e}", config.server_url);
                StoreError::Disconnected
            })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let peer_id = Uuid::new_v4();
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let feed = ChangeFeed::new();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        // Reader task: snapshots to listeners, responses to waiting calls
        let reader = {
            let state = state.clone();
            let pending = pending.clone();
            let feed = feed.clone();
            let server_url = config.server_url.clone();
            tokio::spawn(async move {
                while let Some(msg) = ws_reader.next().await {
                    match msg {
                        Ok(Message::Binary(data)) => {
                            let bytes: Vec<u8> = data.into();
                            let sync_msg = match SyncMessage::decode(&bytes) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("Undecodable frame from {server_url}: {e}");
                                    continue;
                                }
                            };
                            match sync_msg.msg_type {
                                MessageType::Snapshot => match sync_msg.snapshot_payload() {
                                    Ok(snapshot) => {
                                        feed.publish(Arc::new(snapshot));
                                    }
                                    Err(e) => log::warn!("Bad snapshot payload: {e}"),
                                },
                                MessageType::Response => {
                                    let waiter = pending.lock().await.remove(&sync_msg.request_id);
                                    match (waiter, sync_msg.response_payload()) {
                                        (Some(tx), Ok(response)) => {
                                            let _ = tx.send(response);
                                        }
                                        (Some(tx), Err(e)) => {
                                            let _ = tx.send(Response::Failed(e.into()));
                                        }
                                        (None, _) => log::debug!(
                                            "Response {} arrived after its call gave up",
                                            sync_msg.request_id
                                        ),
                                    }
                                }
                                other => log::debug!("Unexpected {other:?} from server"),
                            }
                        }
                        Ok(Message::Close(_)) | Err(_) => break,
                        _ => {}
                    }
                }

                // Connection lost: fail every waiting call, end the feed
                *state.write().await = ConnectionState::Disconnected;
                pending.lock().await.clear();
                feed.close();
                log::info!("Disconnected from {server_url}");
            })
        };

        let hello = SyncMessage::hello(peer_id, &config.name).encode()?;
        out_tx
            .send(Message::Binary(hello.into()))
            .await
            .map_err(|_| StoreError::Disconnected)?;

        log::info!("Connected to {} as {}", config.server_url, config.name);

        Ok(Self {
            peer_id,
            config,
            state,
            outgoing_tx: out_tx,
            pending,
            next_request: AtomicU64::new(0),
            feed,
            tasks: vec![writer, reader],
        })
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of registered change listeners.
    pub fn listener_count(&self) -> usize {
        self.feed.listener_count()
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let _ = self.outgoing_tx.send(Message::Close(None)).await;
    }

    /// Send one request and wait for its response.
    async fn call(&self, request: Request) -> Result<Response, StoreError> {
        if self.connection_state().await != ConnectionState::Connected {
            return Err(StoreError::Disconnected);
        }

        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        // The reader may have cleared the map just before our insert.
        if self.connection_state().await != ConnectionState::Connected {
            self.pending.lock().await.remove(&request_id);
            return Err(StoreError::Disconnected);
        }

        let encoded = SyncMessage::request(self.peer_id, request_id, &request)?.encode()?;
        if self
            .outgoing_tx
            .send(Message::Binary(encoded.into()))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&request_id);
            return Err(StoreError::Disconnected);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(Response::Failed(e))) => Err(e),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(StoreError::Disconnected),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                log::warn!("Request {request_id} timed out");
                Err(StoreError::Timeout)
            }
        }
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        self.feed.close();
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn unexpected(response: Response) -> StoreError {
    StoreError::ProtocolError(format!("unexpected response {response:?}"))
}

#[async_trait]
impl Store for RemoteStore {
    async fn create(&self, topic: NewTopic) -> Result<TopicId, StoreError> {
        match self.call(Request::Create(topic)).await? {
            Response::Created(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    async fn update(&self, id: TopicId, answers: Vec<Answer>) -> Result<u64, StoreError> {
        match self.call(Request::Update { id, answers }).await? {
            Response::Updated { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    async fn update_if(
        &self,
        id: TopicId,
        expected_version: u64,
        answers: Vec<Answer>,
    ) -> Result<u64, StoreError> {
        let request = Request::UpdateIf {
            id,
            expected_version,
            answers,
        };
        match self.call(request).await? {
            Response::Updated { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    async fn delete(&self, id: TopicId) -> Result<(), StoreError> {
        match self.call(Request::Delete(id)).await? {
            Response::Deleted => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn get(&self, id: TopicId) -> Result<Topic, StoreError> {
        match self.call(Request::Get(id)).await? {
            Response::Topic(topic) => Ok(topic),
            other => Err(unexpected(other)),
        }
    }

    async fn list(&self) -> Result<Snapshot, StoreError> {
        match self.call(Request::List).await? {
            Response::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(&self, listener: Listener) -> Result<Subscription, StoreError> {
        Ok(self.feed.register(listener))
    }
}
