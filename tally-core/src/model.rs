//! Topics, answers and the snapshots that carry them to observers.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Store-assigned topic identifier.
pub type TopicId = Uuid;

/// A vote-able option belonging to one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub votes: u64,
}

impl Answer {
    /// A fresh answer with no votes.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            votes: 0,
        }
    }
}

/// A pollable question with its answers, as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub title: String,
    /// Display order is insertion order
    pub answers: Vec<Answer>,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
    /// Write counter: 1 on creation, +1 per update
    pub version: u64,
}

impl Topic {
    /// Total votes across all answers.
    pub fn total_votes(&self) -> u64 {
        self.answers.iter().map(|a| a.votes).sum()
    }
}

/// Fields supplied when creating a topic. The store assigns id and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTopic {
    pub title: String,
    pub answers: Vec<Answer>,
    pub created_at: u64,
}

impl NewTopic {
    /// Materialize the record under a store-assigned id.
    pub fn into_topic(self, id: TopicId) -> Topic {
        Topic {
            id,
            title: self.title,
            answers: self.answers,
            created_at: self.created_at,
            version: 1,
        }
    }
}

/// The full set of topics at one store revision.
///
/// Topics are ordered by creation time, ties broken by id, so every
/// observer renders the same order regardless of storage iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Store-wide change counter, strictly increasing per change
    pub revision: u64,
    pub topics: Vec<Topic>,
}

impl Snapshot {
    pub fn new(revision: u64, mut topics: Vec<Topic>) -> Self {
        topics.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Self { revision, topics }
    }

    /// Look up a topic by id.
    pub fn get(&self, id: &TopicId) -> Option<&Topic> {
        self.topics.iter().find(|t| &t.id == id)
    }

    pub fn contains(&self, id: &TopicId) -> bool {
        self.get(id).is_some()
    }

    /// Topic at a display position (0-based).
    pub fn at(&self, position: usize) -> Option<&Topic> {
        self.topics.get(position)
    }

    /// Ids in display order.
    pub fn ids(&self) -> Vec<TopicId> {
        self.topics.iter().map(|t| t.id).collect()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
