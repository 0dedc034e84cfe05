//! # tally-collab: Shared store, sync and transport for live polls
//!
//! Many observers vote on the same set of topics. Every change to the store
//! pushes the complete record set to every subscriber.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌──────────────┐
//! │ RemoteStore  │ ◄─────────────────► │ SyncServer   │
//! │ (per client) │     Binary Proto    │ (central)    │
//! └──────┬───────┘                     └──────┬───────┘
//!        │ dyn Store                          │
//!        ▼                                    ▼
//! ┌──────────────┐                     ┌──────────────┐
//! │ PollSession  │                     │ LocalStore   │
//! │ engine+sync  │                     │ (authority)  │
//! └──────┬───────┘                     └──────┬───────┘
//!        │                                    │
//!  ┌─────┴────────┐                   ┌───────┴───────┐
//!  │ ObserverGroup│                   │ TopicDb       │
//!  │ (fan-out)    │                   │ (RocksDB)     │
//!  └──────────────┘                   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`store`]: Store trait, in-process store, RocksDB persistence
//! - [`engine`]: Command executor with write policies
//! - [`sync`]: Materialized snapshot and observer streams
//! - [`broadcast`]: Snapshot fan-out with backpressure
//! - [`session`]: Store + sync + engine for one presentation layer
//! - [`protocol`]: Binary wire protocol (bincode-encoded SyncMessage)
//! - [`server`]: WebSocket sync server
//! - [`client`]: WebSocket store client

pub mod broadcast;
pub mod client;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;
pub mod sync;

// Re-exports for convenience
pub use broadcast::{ObserverGroup, ObserverInfo, ObserverStats};
pub use client::{ClientConfig, ConnectionState, RemoteStore};
pub use engine::{Applied, EngineConfig, VotingEngine, WritePolicy};
pub use error::{ErrorKind, VoteError};
pub use protocol::{MessageType, ProtocolError, Request, Response, SyncMessage};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::PollSession;
pub use store::{
    ChangeFeed, Listener, LocalStore, Store, StoreConfig, StoreError, Subscription, TopicDb,
};
pub use sync::{Observer, SyncConfig, SyncLayer};
