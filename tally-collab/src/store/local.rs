//! Authoritative in-process store.
//!
//! Holds every topic in memory, optionally backed by [`TopicDb`]. Writers are
//! serialized by one async lock; inside it a mutation is persisted first,
//! then applied in memory, then published, so a failed write changes
//! nothing and listeners observe changes in revision order.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tally_core::{Answer, NewTopic, Snapshot, Topic, TopicId};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::feed::{ChangeFeed, Listener, Subscription};
use super::rocks::{StoreConfig, TopicDb};
use super::{Store, StoreError};

struct StoreState {
    topics: HashMap<TopicId, Topic>,
    /// Last committed revision
    revision: u64,
}

/// In-memory topic store with optional RocksDB persistence.
pub struct LocalStore {
    state: RwLock<StoreState>,
    /// Persistent backing (None = in-memory only)
    db: Option<TopicDb>,
    feed: ChangeFeed,
}

impl LocalStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState {
                topics: HashMap::new(),
                revision: 0,
            }),
            db: None,
            feed: ChangeFeed::new(),
        }
    }

    /// Open a persistent store, recovering all topics and the revision.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let db = TopicDb::open(config)?;
        let revision = db.load_revision()?;
        let topics: HashMap<TopicId, Topic> =
            db.load_topics()?.into_iter().map(|t| (t.id, t)).collect();

        log::info!(
            "Recovered {} topics at revision {revision} from {}",
            topics.len(),
            db.path().display()
        );

        Ok(Self {
            state: RwLock::new(StoreState { topics, revision }),
            db: Some(db),
            feed: ChangeFeed::new(),
        })
    }

    /// Whether writes reach disk.
    pub fn is_persistent(&self) -> bool {
        self.db.is_some()
    }

    /// Last committed revision.
    pub async fn revision(&self) -> u64 {
        self.state.read().await.revision
    }

    pub async fn topic_count(&self) -> usize {
        self.state.read().await.topics.len()
    }

    /// Number of registered change listeners.
    pub fn listener_count(&self) -> usize {
        self.feed.listener_count()
    }

    /// Flush persisted writes to disk. No-op in memory.
    pub fn sync(&self) -> Result<(), StoreError> {
        match &self.db {
            Some(db) => db.sync(),
            None => Ok(()),
        }
    }

    /// Advance the revision and publish the resulting record set.
    ///
    /// Called with the write lock held.
    fn commit(&self, state: &mut StoreState, revision: u64) {
        state.revision = revision;
        let snapshot = Arc::new(Snapshot::new(
            revision,
            state.topics.values().cloned().collect(),
        ));
        let reached = self.feed.publish(snapshot);
        log::debug!("Revision {revision} published to {reached} listeners");
    }

    fn replace_answers(
        &self,
        state: &mut StoreState,
        id: TopicId,
        expected_version: Option<u64>,
        answers: Vec<Answer>,
    ) -> Result<u64, StoreError> {
        let current = state.topics.get(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(expected) = expected_version {
            if current.version != expected {
                return Err(StoreError::Conflict {
                    id,
                    expected,
                    actual: current.version,
                });
            }
        }

        let mut next = current.clone();
        next.answers = answers;
        next.version += 1;
        let version = next.version;

        let revision = state.revision + 1;
        if let Some(db) = &self.db {
            db.put_topic(&next, revision)?;
        }
        state.topics.insert(id, next);
        self.commit(state, revision);
        Ok(version)
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn create(&self, topic: NewTopic) -> Result<TopicId, StoreError> {
        let mut state = self.state.write().await;

        let mut id = Uuid::new_v4();
        while state.topics.contains_key(&id) {
            id = Uuid::new_v4();
        }
        let topic = topic.into_topic(id);

        let revision = state.revision + 1;
        if let Some(db) = &self.db {
            db.put_topic(&topic, revision)?;
        }
        state.topics.insert(id, topic);
        self.commit(&mut state, revision);
        Ok(id)
    }

    async fn update(&self, id: TopicId, answers: Vec<Answer>) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        self.replace_answers(&mut state, id, None, answers)
    }

    async fn update_if(
        &self,
        id: TopicId,
        expected_version: u64,
        answers: Vec<Answer>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        self.replace_answers(&mut state, id, Some(expected_version), answers)
    }

    async fn delete(&self, id: TopicId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.topics.contains_key(&id) {
            log::debug!("Delete of absent topic {id} ignored");
            return Ok(());
        }

        let revision = state.revision + 1;
        if let Some(db) = &self.db {
            db.delete_topic(id, revision)?;
        }
        state.topics.remove(&id);
        self.commit(&mut state, revision);
        Ok(())
    }

    async fn get(&self, id: TopicId) -> Result<Topic, StoreError> {
        self.state
            .read()
            .await
            .topics
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Snapshot, StoreError> {
        let state = self.state.read().await;
        Ok(Snapshot::new(
            state.revision,
            state.topics.values().cloned().collect(),
        ))
    }

    async fn subscribe(&self, listener: Listener) -> Result<Subscription, StoreError> {
        Ok(self.feed.register(listener))
    }
}
