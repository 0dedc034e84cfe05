//! Engine behavior against an in-process store: validation, not-found
//! handling, reset, stale-snapshot writes and partial reset failure.

use async_trait::async_trait;
use std::sync::Arc;
use tally_collab::engine::{EngineConfig, VotingEngine};
use tally_collab::error::{ErrorKind, VoteError};
use tally_collab::session::PollSession;
use tally_collab::store::{Listener, LocalStore, Store, StoreError, Subscription};
use tally_core::{Answer, NewTopic, Operation, Snapshot, Topic, TopicId};

async fn session() -> (Arc<LocalStore>, PollSession) {
    let store = Arc::new(LocalStore::in_memory());
    let session = PollSession::open(store.clone(), EngineConfig::default())
        .await
        .unwrap();
    (store, session)
}

#[tokio::test]
async fn test_every_title_gets_a_unique_topic() {
    let (store, session) = session().await;
    let titles = ["Lunch?", "Dinner?", "Lunch?", "  padded  "];

    let mut ids = Vec::new();
    for title in titles {
        ids.push(session.add_topic(title).await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), titles.len());

    let snap = store.list().await.unwrap();
    assert_eq!(snap.len(), titles.len());
    assert!(snap.topics.iter().all(|t| t.answers.is_empty()));
    assert!(snap.topics.iter().any(|t| t.title == "padded"));
}

#[tokio::test]
async fn test_blank_titles_are_noops() {
    let (store, session) = session().await;
    for title in ["", "   ", "\t\n"] {
        let err = session.add_topic(title).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert!(store.list().await.unwrap().is_empty());
    assert_eq!(store.revision().await, 0);
}

#[tokio::test]
async fn test_answer_appends_at_end_with_zero_votes() {
    let (store, session) = session().await;
    let id = session.add_topic("Lunch?").await.unwrap();
    session.add_answer(id, "Pizza").await.unwrap();
    session.cast_vote(id, 0).await.unwrap();

    session.add_answer(id, "  Sushi ").await.unwrap();

    let topic = store.get(id).await.unwrap();
    assert_eq!(
        topic.answers,
        vec![
            Answer { text: "Pizza".into(), votes: 1 },
            Answer { text: "Sushi".into(), votes: 0 },
        ]
    );
}

#[tokio::test]
async fn test_blank_answer_rejected() {
    let (store, session) = session().await;
    let id = session.add_topic("Lunch?").await.unwrap();
    let err = session.add_answer(id, "   ").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(store.get(id).await.unwrap().answers.is_empty());
}

#[tokio::test]
async fn test_vote_increments_exactly_one_answer() {
    let (store, session) = session().await;
    let id = session.add_topic("Lunch?").await.unwrap();
    for text in ["Pizza", "Sushi", "Tacos"] {
        session.add_answer(id, text).await.unwrap();
    }

    session.cast_vote(id, 1).await.unwrap();

    let votes: Vec<u64> = store
        .get(id)
        .await
        .unwrap()
        .answers
        .iter()
        .map(|a| a.votes)
        .collect();
    assert_eq!(votes, vec![0, 1, 0]);
}

#[tokio::test]
async fn test_bad_vote_targets_are_noops() {
    let (store, session) = session().await;
    let id = session.add_topic("Lunch?").await.unwrap();
    session.add_answer(id, "Pizza").await.unwrap();
    let before = store.revision().await;

    let out_of_range = session.cast_vote(id, 5).await.unwrap_err();
    assert_eq!(out_of_range.kind(), ErrorKind::NotFound);

    let unknown = session.cast_vote(uuid::Uuid::new_v4(), 0).await.unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::NotFound);

    assert_eq!(store.revision().await, before);
}

#[tokio::test]
async fn test_delete_removes_exactly_one() {
    let (store, session) = session().await;
    let keep = session.add_topic("keep").await.unwrap();
    let gone = session.add_topic("gone").await.unwrap();

    session.delete_topic(gone).await.unwrap();
    session.delete_topic(gone).await.unwrap();

    let snap = store.list().await.unwrap();
    assert_eq!(snap.ids(), vec![keep]);
}

#[tokio::test]
async fn test_reset_passphrase() {
    let (store, session) = session().await;
    session.add_topic("a").await.unwrap();
    session.add_topic("b").await.unwrap();
    let before = store.list().await.unwrap();

    let err = session.reset_all("wrong").await.unwrap_err();
    assert_eq!(err, VoteError::Auth);
    assert_eq!(store.list().await.unwrap(), before);

    session.reset_all("admin123").await.unwrap();
    assert!(store.list().await.unwrap().is_empty());
    assert!(session.current_snapshot().is_empty());
}

#[tokio::test]
async fn test_lunch_scenario() {
    let (_store, session) = session().await;
    let id = session.add_topic("Lunch?").await.unwrap();
    session.add_answer(id, "Pizza").await.unwrap();
    session.add_answer(id, "Sushi").await.unwrap();
    session.cast_vote(id, 0).await.unwrap();
    session.cast_vote(id, 0).await.unwrap();

    let snap = session.current_snapshot();
    assert_eq!(snap.len(), 1);
    let topic = snap.at(0).unwrap();
    assert_eq!(topic.title, "Lunch?");
    assert_eq!(
        topic.answers,
        vec![
            Answer { text: "Pizza".into(), votes: 2 },
            Answer { text: "Sushi".into(), votes: 0 },
        ]
    );
}

// ─── Stale snapshot writes ───────────────────────────────────────────

async fn two_votes_from_one_snapshot(config: EngineConfig) -> u64 {
    let store = Arc::new(LocalStore::in_memory());
    let alice = VotingEngine::new(store.clone(), config.clone());
    let bob = VotingEngine::new(store.clone(), config);

    let id = alice.add_topic("Lunch?").await.unwrap();
    let snap = store.list().await.unwrap();
    alice.add_answer(&snap, id, "Pizza").await.unwrap();

    let stale = store.list().await.unwrap();
    alice.cast_vote(&stale, id, 0).await.unwrap();
    bob.cast_vote(&stale, id, 0).await.unwrap();

    store.get(id).await.unwrap().answers[0].votes
}

#[tokio::test]
async fn test_last_write_wins_loses_one_vote() {
    // Both writers overwrite answers computed from the same base.
    assert_eq!(two_votes_from_one_snapshot(EngineConfig::default()).await, 1);
}

#[tokio::test]
async fn test_optimistic_keeps_both_votes() {
    assert_eq!(two_votes_from_one_snapshot(EngineConfig::optimistic(3)).await, 2);
}

#[tokio::test]
async fn test_answer_and_vote_race_optimistic() {
    let store = Arc::new(LocalStore::in_memory());
    let engine = VotingEngine::new(store.clone(), EngineConfig::optimistic(3));
    let id = engine.add_topic("Lunch?").await.unwrap();
    let snap = store.list().await.unwrap();
    engine.add_answer(&snap, id, "Pizza").await.unwrap();

    let stale = store.list().await.unwrap();
    engine.add_answer(&stale, id, "Sushi").await.unwrap();
    engine.cast_vote(&stale, id, 0).await.unwrap();

    let topic = store.get(id).await.unwrap();
    assert_eq!(
        topic.answers,
        vec![
            Answer { text: "Pizza".into(), votes: 1 },
            Answer { text: "Sushi".into(), votes: 0 },
        ]
    );
}

// ─── Partial reset failure ───────────────────────────────────────────

/// Delegates to a LocalStore but refuses to delete one topic.
struct FlakyStore {
    inner: LocalStore,
    fail_on: std::sync::Mutex<Option<TopicId>>,
}

#[async_trait]
impl Store for FlakyStore {
    async fn create(&self, topic: NewTopic) -> Result<TopicId, StoreError> {
        self.inner.create(topic).await
    }

    async fn update(&self, id: TopicId, answers: Vec<Answer>) -> Result<u64, StoreError> {
        self.inner.update(id, answers).await
    }

    async fn update_if(
        &self,
        id: TopicId,
        expected_version: u64,
        answers: Vec<Answer>,
    ) -> Result<u64, StoreError> {
        self.inner.update_if(id, expected_version, answers).await
    }

    async fn delete(&self, id: TopicId) -> Result<(), StoreError> {
        let failing = *self.fail_on.lock().unwrap();
        if failing == Some(id) {
            return Err(StoreError::DatabaseError("disk unplugged".into()));
        }
        self.inner.delete(id).await
    }

    async fn get(&self, id: TopicId) -> Result<Topic, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Snapshot, StoreError> {
        self.inner.list().await
    }

    async fn subscribe(&self, listener: Listener) -> Result<Subscription, StoreError> {
        self.inner.subscribe(listener).await
    }
}

#[tokio::test]
async fn test_partial_reset_reports_one_aggregate_error() {
    let store = Arc::new(FlakyStore {
        inner: LocalStore::in_memory(),
        fail_on: std::sync::Mutex::new(None),
    });
    let session = PollSession::open(store.clone(), EngineConfig::default())
        .await
        .unwrap();

    for title in ["a", "b", "c", "d"] {
        session.add_topic(title).await.unwrap();
    }
    // Reset walks the snapshot in order: fail on the third
    let third = session.current_snapshot().at(2).unwrap().id;
    *store.fail_on.lock().unwrap() = Some(third);

    let err = session.reset_all("admin123").await.unwrap_err();
    match &err {
        VoteError::ResetIncomplete {
            deleted,
            remaining,
            failed,
            source,
        } => {
            assert_eq!(*deleted, 2);
            assert_eq!(*remaining, 2);
            assert_eq!(*failed, third);
            assert!(matches!(source, StoreError::DatabaseError(_)));
        }
        other => panic!("Expected ResetIncomplete, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(err.user_message(Operation::ResetAll).contains("2 topics deleted"));

    // The failed topic and everything after it stay intact
    let left = store.list().await.unwrap();
    assert_eq!(left.len(), 2);
    assert!(left.contains(&third));
    assert_eq!(session.current_snapshot().len(), 2);
}

#[tokio::test]
async fn test_failures_do_not_stop_the_session() {
    let store = Arc::new(FlakyStore {
        inner: LocalStore::in_memory(),
        fail_on: std::sync::Mutex::new(None),
    });
    let session = PollSession::open(store.clone(), EngineConfig::default())
        .await
        .unwrap();

    let id = session.add_topic("Lunch?").await.unwrap();
    *store.fail_on.lock().unwrap() = Some(id);
    assert!(session.delete_topic(id).await.is_err());

    // Later commands still work
    session.add_answer(id, "Pizza").await.unwrap();
    assert_eq!(session.current_snapshot().get(&id).unwrap().answers.len(), 1);
}
