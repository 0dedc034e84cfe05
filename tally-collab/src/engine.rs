//! Voting engine: validates commands and issues them against a store.
//!
//! ```text
//!  command ──► tally_core::transition ──► Transition ──► execute() ──► Store
//!                     │                                     │
//!                     └── Rejection ──► VoteError ◄─────────┘ StoreError
//! ```
//!
//! Answer edits are computed from the caller's cached snapshot. Under
//! [`WritePolicy::LastWriteWins`] the result overwrites the stored answers
//! unconditionally, so two writers editing from the same stale snapshot lose
//! one edit. [`WritePolicy::Optimistic`] turns that case into a version
//! conflict and recomputes the edit from a fresh read.

use std::sync::Arc;
use tally_core::{now_millis, transition, Answer, AnswerEdit, Snapshot, TopicId, Transition};

use crate::error::VoteError;
use crate::store::{Store, StoreError};

/// How answer replacements reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Plain overwrite
    #[default]
    LastWriteWins,
    /// Version-checked write, recomputed and retried on conflict
    Optimistic { max_attempts: u32 },
}

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub write_policy: WritePolicy,
}

impl EngineConfig {
    pub fn optimistic(max_attempts: u32) -> Self {
        Self {
            write_policy: WritePolicy::Optimistic { max_attempts },
        }
    }
}

/// What an executed transition did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Created(TopicId),
    Replaced { id: TopicId, version: u64 },
    Deleted(TopicId),
    Reset { deleted: usize },
}

/// Stateless command executor over a shared store.
pub struct VotingEngine {
    store: Arc<dyn Store>,
    config: EngineConfig,
}

impl VotingEngine {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a topic with no answers. Returns its id.
    pub async fn add_topic(&self, title: &str) -> Result<TopicId, VoteError> {
        let transition = transition::add_topic(title, now_millis())?;
        match self.execute(transition).await? {
            Applied::Created(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    /// Append an answer to a topic. Returns the topic's new version.
    pub async fn add_answer(
        &self,
        snapshot: &Snapshot,
        id: TopicId,
        text: &str,
    ) -> Result<u64, VoteError> {
        let transition = transition::add_answer(snapshot, id, text)?;
        self.replaced(transition).await
    }

    /// Add one vote. Returns the topic's new version.
    pub async fn cast_vote(
        &self,
        snapshot: &Snapshot,
        id: TopicId,
        answer_index: usize,
    ) -> Result<u64, VoteError> {
        let transition = transition::cast_vote(snapshot, id, answer_index)?;
        self.replaced(transition).await
    }

    /// Delete a topic. Deleting an absent topic succeeds.
    pub async fn delete_topic(&self, id: TopicId) -> Result<(), VoteError> {
        self.execute(transition::delete_topic(id)).await?;
        Ok(())
    }

    /// Delete every topic in `snapshot` if `passphrase` matches.
    ///
    /// Returns the number of topics deleted.
    pub async fn reset_all(&self, snapshot: &Snapshot, passphrase: &str) -> Result<usize, VoteError> {
        let transition = transition::reset_all(snapshot, passphrase)?;
        match self.execute(transition).await? {
            Applied::Reset { deleted } => Ok(deleted),
            other => Err(unexpected(other)),
        }
    }

    /// Issue one transition against the store.
    pub async fn execute(&self, transition: Transition) -> Result<Applied, VoteError> {
        match transition {
            Transition::Create(topic) => {
                let id = self.store.create(topic).await?;
                log::debug!("Created topic {id}");
                Ok(Applied::Created(id))
            }
            Transition::Replace {
                id,
                base_version,
                answers,
                edit,
            } => {
                let version = self.replace(id, base_version, answers, &edit).await?;
                log::debug!("Topic {id} now at version {version}");
                Ok(Applied::Replaced { id, version })
            }
            Transition::Delete(id) => {
                self.store.delete(id).await?;
                log::debug!("Deleted topic {id}");
                Ok(Applied::Deleted(id))
            }
            Transition::DeleteAll(ids) => self.delete_all(ids).await,
        }
    }

    async fn replaced(&self, transition: Transition) -> Result<u64, VoteError> {
        match self.execute(transition).await? {
            Applied::Replaced { version, .. } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    async fn replace(
        &self,
        id: TopicId,
        base_version: u64,
        answers: Vec<Answer>,
        edit: &AnswerEdit,
    ) -> Result<u64, VoteError> {
        let max_attempts = match self.config.write_policy {
            WritePolicy::LastWriteWins => return Ok(self.store.update(id, answers).await?),
            WritePolicy::Optimistic { max_attempts } => max_attempts.max(1),
        };

        let mut expected = base_version;
        let mut answers = answers;
        let mut attempt = 1;
        loop {
            match self.store.update_if(id, expected, answers).await {
                Ok(version) => return Ok(version),
                Err(StoreError::Conflict { actual, .. }) if attempt < max_attempts => {
                    log::warn!(
                        "Topic {id} moved to version {actual} (attempt {attempt}/{max_attempts}), retrying"
                    );
                    let fresh = self.store.get(id).await?;
                    answers = edit.apply(&fresh)?;
                    expected = fresh.version;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn delete_all(&self, ids: Vec<TopicId>) -> Result<Applied, VoteError> {
        let total = ids.len();
        for (deleted, id) in ids.into_iter().enumerate() {
            if let Err(source) = self.store.delete(id).await {
                log::error!("Reset stopped at topic {id} after {deleted}/{total}: {source}");
                return Err(VoteError::ResetIncomplete {
                    deleted,
                    remaining: total - deleted,
                    failed: id,
                    source,
                });
            }
        }
        log::info!("Reset deleted {total} topics");
        Ok(Applied::Reset { deleted: total })
    }
}

fn unexpected(applied: Applied) -> VoteError {
    VoteError::Storage(StoreError::ProtocolError(format!(
        "unexpected result {applied:?}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::LocalStore;

    fn engine(config: EngineConfig) -> (Arc<LocalStore>, VotingEngine) {
        let store = Arc::new(LocalStore::in_memory());
        let engine = VotingEngine::new(store.clone(), config);
        (store, engine)
    }

    #[tokio::test]
    async fn test_add_topic_creates_empty_topic() {
        let (store, engine) = engine(EngineConfig::default());
        let id = engine.add_topic("  Lunch?  ").await.unwrap();

        let topic = store.get(id).await.unwrap();
        assert_eq!(topic.title, "Lunch?");
        assert!(topic.answers.is_empty());
        assert_eq!(topic.version, 1);
    }

    #[tokio::test]
    async fn test_blank_title_never_reaches_store() {
        let (store, engine) = engine(EngineConfig::default());
        let err = engine.add_topic("   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.revision().await, 0);
    }

    #[tokio::test]
    async fn test_answer_then_vote() {
        let (store, engine) = engine(EngineConfig::default());
        let id = engine.add_topic("Lunch?").await.unwrap();

        let snap = store.list().await.unwrap();
        assert_eq!(engine.add_answer(&snap, id, "Pizza").await.unwrap(), 2);

        let snap = store.list().await.unwrap();
        engine.cast_vote(&snap, id, 0).await.unwrap();

        let topic = store.get(id).await.unwrap();
        assert_eq!(topic.answers, vec![Answer { text: "Pizza".into(), votes: 1 }]);
    }

    #[tokio::test]
    async fn test_vote_on_vanished_topic() {
        let (store, engine) = engine(EngineConfig::default());
        let id = engine.add_topic("Lunch?").await.unwrap();
        let snap = store.list().await.unwrap();
        engine.add_answer(&snap, id, "Pizza").await.unwrap();

        let stale = store.list().await.unwrap();
        engine.delete_topic(id).await.unwrap();

        // Stale snapshot still shows the topic; the store no longer has it
        let err = engine.cast_vote(&stale, id, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(store.topic_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_twice_is_safe() {
        let (_store, engine) = engine(EngineConfig::default());
        let id = engine.add_topic("Lunch?").await.unwrap();
        engine.delete_topic(id).await.unwrap();
        engine.delete_topic(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_all() {
        let (store, engine) = engine(EngineConfig::default());
        engine.add_topic("a").await.unwrap();
        engine.add_topic("b").await.unwrap();
        let snap = store.list().await.unwrap();

        assert_eq!(engine.reset_all(&snap, "wrong").await, Err(VoteError::Auth));
        assert_eq!(store.topic_count().await, 2);

        assert_eq!(engine.reset_all(&snap, "admin123").await, Ok(2));
        assert_eq!(store.topic_count().await, 0);
    }

    #[tokio::test]
    async fn test_optimistic_recomputes_on_conflict() {
        let (store, engine) = engine(EngineConfig::optimistic(3));
        let id = engine.add_topic("Lunch?").await.unwrap();
        let snap = store.list().await.unwrap();
        engine.add_answer(&snap, id, "Pizza").await.unwrap();

        let stale = store.list().await.unwrap();
        engine.cast_vote(&stale, id, 0).await.unwrap();
        engine.cast_vote(&stale, id, 0).await.unwrap();

        assert_eq!(store.get(id).await.unwrap().answers[0].votes, 2);
    }

    #[tokio::test]
    async fn test_optimistic_gives_up_after_max_attempts() {
        let (store, engine) = engine(EngineConfig::optimistic(1));
        let id = engine.add_topic("Lunch?").await.unwrap();
        let snap = store.list().await.unwrap();
        engine.add_answer(&snap, id, "Pizza").await.unwrap();

        let stale = store.list().await.unwrap();
        engine.cast_vote(&stale, id, 0).await.unwrap();
        let err = engine.cast_vote(&stale, id, 0).await.unwrap_err();
        assert!(matches!(err, VoteError::Storage(StoreError::Conflict { .. })));
        assert_eq!(store.get(id).await.unwrap().answers[0].votes, 1);
    }

    #[tokio::test]
    async fn test_execute_reports_applied() {
        let (_store, engine) = engine(EngineConfig::default());
        let applied = engine
            .execute(transition::add_topic("Lunch?", 7).unwrap())
            .await
            .unwrap();
        assert!(matches!(applied, Applied::Created(_)));
    }
}
