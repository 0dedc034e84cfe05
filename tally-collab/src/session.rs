//! One observer-facing poll session: store + sync layer + engine.
//!
//! Commands are evaluated against the session's cached snapshot, which is
//! exactly what its observers are looking at.

use std::sync::Arc;
use tally_core::{Snapshot, TopicId};

use crate::engine::{EngineConfig, VotingEngine};
use crate::error::VoteError;
use crate::store::{Store, StoreError};
use crate::sync::{Observer, SyncConfig, SyncLayer};

pub struct PollSession {
    store: Arc<dyn Store>,
    sync: SyncLayer,
    engine: VotingEngine,
}

impl PollSession {
    /// Attach to `store` and load its current record set.
    pub async fn open(store: Arc<dyn Store>, config: EngineConfig) -> Result<Self, StoreError> {
        Self::open_with(store, config, SyncConfig::default()).await
    }

    pub async fn open_with(
        store: Arc<dyn Store>,
        config: EngineConfig,
        sync_config: SyncConfig,
    ) -> Result<Self, StoreError> {
        let sync = SyncLayer::start(store.as_ref(), sync_config).await?;
        let engine = VotingEngine::new(store.clone(), config);
        Ok(Self {
            store,
            sync,
            engine,
        })
    }

    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.sync.current_snapshot()
    }

    pub fn observe(&self, name: impl Into<String>) -> Observer {
        self.sync.attach(name)
    }

    pub fn sync_layer(&self) -> &SyncLayer {
        &self.sync
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn add_topic(&self, title: &str) -> Result<TopicId, VoteError> {
        self.engine.add_topic(title).await
    }

    pub async fn add_answer(&self, id: TopicId, text: &str) -> Result<u64, VoteError> {
        let snapshot = self.current_snapshot();
        self.engine.add_answer(&snapshot, id, text).await
    }

    pub async fn cast_vote(&self, id: TopicId, answer_index: usize) -> Result<u64, VoteError> {
        let snapshot = self.current_snapshot();
        self.engine.cast_vote(&snapshot, id, answer_index).await
    }

    pub async fn delete_topic(&self, id: TopicId) -> Result<(), VoteError> {
        self.engine.delete_topic(id).await
    }

    pub async fn reset_all(&self, passphrase: &str) -> Result<usize, VoteError> {
        let snapshot = self.current_snapshot();
        self.engine.reset_all(&snapshot, passphrase).await
    }

    /// Detach from the store. Observers see the end of their stream.
    pub fn close(self) {
        self.sync.stop();
    }
}
