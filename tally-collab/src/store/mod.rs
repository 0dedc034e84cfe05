//! Topic storage with a push-based change feed.
//!
//! Architecture:
//! ```text
//! ┌──────────────┐   create/update/delete   ┌──────────────┐
//! │ VotingEngine │ ───────────────────────► │  dyn Store   │
//! └──────────────┘                          └──────┬───────┘
//!                                                  │
//!                    ┌─────────────────────────────┼──────────────────┐
//!                    ▼                             ▼                  │
//!             ┌─────────────┐              ┌──────────────┐           │
//!             │ LocalStore  │              │ RemoteStore  │ ── ws ────┘
//!             │ (authority) │              │ (client)     │   to a SyncServer
//!             └──────┬──────┘              └──────────────┘   owning a LocalStore
//!                    │
//!          ┌─────────┴─────────┐
//!          ▼                   ▼
//!    memory map          TopicDb (RocksDB)
//! ```
//!
//! Every implementation publishes the full record set to its listeners
//! once per logical change.

pub mod feed;
pub mod local;
pub mod rocks;

pub use feed::{ChangeFeed, Listener, Subscription};
pub use local::LocalStore;
pub use rocks::{StoreConfig, TopicDb};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tally_core::{Answer, NewTopic, Snapshot, Topic, TopicId};

/// Keyed topic storage shared by every writer.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a new topic under a fresh id and return the id.
    async fn create(&self, topic: NewTopic) -> Result<TopicId, StoreError>;

    /// Replace a topic's answers unconditionally (last write wins).
    ///
    /// Returns the topic's new version.
    async fn update(&self, id: TopicId, answers: Vec<Answer>) -> Result<u64, StoreError>;

    /// Replace a topic's answers only if its version still equals
    /// `expected_version`; otherwise fail with [`StoreError::Conflict`].
    async fn update_if(
        &self,
        id: TopicId,
        expected_version: u64,
        answers: Vec<Answer>,
    ) -> Result<u64, StoreError>;

    /// Remove a topic. Removing an absent id succeeds and notifies nobody.
    async fn delete(&self, id: TopicId) -> Result<(), StoreError>;

    /// Read one topic.
    async fn get(&self, id: TopicId) -> Result<Topic, StoreError>;

    /// Read the full record set.
    async fn list(&self) -> Result<Snapshot, StoreError>;

    /// Register a listener for every subsequent change.
    async fn subscribe(&self, listener: Listener) -> Result<Subscription, StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Topic not found
    NotFound(TopicId),
    /// Version check failed on a conditional write
    Conflict {
        id: TopicId,
        expected: u64,
        actual: u64,
    },
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
    /// Peer sent something the protocol does not allow here
    ProtocolError(String),
    /// Connection to the server is gone
    Disconnected,
    /// Server did not answer in time
    Timeout,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(id) => write!(f, "Topic not found: {id}"),
            StoreError::Conflict { id, expected, actual } => {
                write!(f, "Version conflict on topic {id}: expected {expected}, found {actual}")
            }
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::ProtocolError(e) => write!(f, "Protocol error: {e}"),
            StoreError::Disconnected => write!(f, "Disconnected from server"),
            StoreError::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for StoreError {}
