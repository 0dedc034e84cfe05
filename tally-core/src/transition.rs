//! Pure state transitions of the voting engine.
//!
//! Every function validates user intent against a snapshot and yields the
//! single store operation that realizes it. Nothing here performs I/O; the
//! executor in `tally-collab` issues the returned [`Transition`].
//!
//! ```text
//! intent ──► validate ──► Transition ──► Store op
//!               │
//!               └──► Rejection (no store call)
//! ```

use crate::model::{Answer, NewTopic, Snapshot, Topic, TopicId};

/// Passphrase guarding `reset_all`. Compared exactly, case-sensitively.
///
/// This is a confirmation step checked client-side, not an access-control
/// boundary.
pub const RESET_PASSPHRASE: &str = "admin123";

/// An edit to a topic's answer list.
///
/// Kept alongside the computed answers so a conflicting write can be
/// recomputed against a fresher copy of the topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerEdit {
    /// Append a new answer with zero votes
    Append(String),
    /// Add one vote to the answer at this index
    Vote(usize),
}

impl AnswerEdit {
    /// Compute the topic's next answer list.
    pub fn apply(&self, topic: &Topic) -> Result<Vec<Answer>, Rejection> {
        let mut answers = topic.answers.clone();
        match self {
            AnswerEdit::Append(text) => answers.push(Answer::new(text.clone())),
            AnswerEdit::Vote(index) => {
                let len = answers.len();
                let answer = answers.get_mut(*index).ok_or(Rejection::AnswerOutOfRange {
                    topic: topic.id,
                    index: *index,
                    len,
                })?;
                answer.votes = answer.votes.saturating_add(1);
            }
        }
        Ok(answers)
    }
}

/// The store operation realizing one engine command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Create a topic
    Create(NewTopic),
    /// Overwrite a topic's answers
    Replace {
        id: TopicId,
        /// Version of the topic the answers were computed from
        base_version: u64,
        answers: Vec<Answer>,
        edit: AnswerEdit,
    },
    /// Remove one topic
    Delete(TopicId),
    /// Remove every listed topic, in order
    DeleteAll(Vec<TopicId>),
}

/// Why a command was refused before reaching the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    BlankTitle,
    BlankAnswer,
    UnknownTopic(TopicId),
    AnswerOutOfRange {
        topic: TopicId,
        index: usize,
        len: usize,
    },
    BadPassphrase,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::BlankTitle => write!(f, "Topic title must not be blank"),
            Rejection::BlankAnswer => write!(f, "Answer text must not be blank"),
            Rejection::UnknownTopic(id) => write!(f, "Unknown topic: {id}"),
            Rejection::AnswerOutOfRange { topic, index, len } => {
                write!(f, "Answer {index} out of range for topic {topic} ({len} answers)")
            }
            Rejection::BadPassphrase => write!(f, "Reset passphrase does not match"),
        }
    }
}

impl std::error::Error for Rejection {}

/// Create a topic titled `title` (trimmed) with no answers.
pub fn add_topic(title: &str, now: u64) -> Result<Transition, Rejection> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Rejection::BlankTitle);
    }
    Ok(Transition::Create(NewTopic {
        title: title.to_string(),
        answers: Vec::new(),
        created_at: now,
    }))
}

/// Append an answer to a topic, computed against `snapshot`.
pub fn add_answer(snapshot: &Snapshot, id: TopicId, text: &str) -> Result<Transition, Rejection> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Rejection::BlankAnswer);
    }
    replace(snapshot, id, AnswerEdit::Append(text.to_string()))
}

/// Add one vote to `answer_index` of a topic, computed against `snapshot`.
pub fn cast_vote(
    snapshot: &Snapshot,
    id: TopicId,
    answer_index: usize,
) -> Result<Transition, Rejection> {
    replace(snapshot, id, AnswerEdit::Vote(answer_index))
}

/// Delete a topic. Absence is not checked.
pub fn delete_topic(id: TopicId) -> Transition {
    Transition::Delete(id)
}

/// Delete every topic in `snapshot`, provided the passphrase matches.
pub fn reset_all(snapshot: &Snapshot, passphrase: &str) -> Result<Transition, Rejection> {
    if passphrase != RESET_PASSPHRASE {
        log::debug!("Reset refused: passphrase mismatch");
        return Err(Rejection::BadPassphrase);
    }
    Ok(Transition::DeleteAll(snapshot.ids()))
}

fn replace(snapshot: &Snapshot, id: TopicId, edit: AnswerEdit) -> Result<Transition, Rejection> {
    let topic = snapshot.get(&id).ok_or(Rejection::UnknownTopic(id))?;
    let answers = edit.apply(topic)?;
    Ok(Transition::Replace {
        id,
        base_version: topic.version,
        answers,
        edit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn lunch() -> (Snapshot, TopicId) {
        let id = Uuid::new_v4();
        let topic = Topic {
            id,
            title: "Lunch?".into(),
            answers: vec![
                Answer { text: "Pizza".into(), votes: 1 },
                Answer { text: "Sushi".into(), votes: 4 },
            ],
            created_at: 10,
            version: 3,
        };
        (Snapshot::new(5, vec![topic]), id)
    }

    #[test]
    fn test_add_topic_trims_title() {
        match add_topic("  Lunch?  ", 42).unwrap() {
            Transition::Create(new) => {
                assert_eq!(new.title, "Lunch?");
                assert!(new.answers.is_empty());
                assert_eq!(new.created_at, 42);
            }
            other => panic!("Expected Create, got {other:?}"),
        }
    }

    #[test]
    fn test_add_topic_blank_rejected() {
        assert_eq!(add_topic("", 0), Err(Rejection::BlankTitle));
        assert_eq!(add_topic("   \t\n", 0), Err(Rejection::BlankTitle));
    }

    #[test]
    fn test_add_answer_appends_with_zero_votes() {
        let (snap, id) = lunch();
        match add_answer(&snap, id, " Tacos ").unwrap() {
            Transition::Replace { id: tid, base_version, answers, edit } => {
                assert_eq!(tid, id);
                assert_eq!(base_version, 3);
                assert_eq!(answers.len(), 3);
                assert_eq!(answers[0], Answer { text: "Pizza".into(), votes: 1 });
                assert_eq!(answers[1], Answer { text: "Sushi".into(), votes: 4 });
                assert_eq!(answers[2], Answer { text: "Tacos".into(), votes: 0 });
                assert_eq!(edit, AnswerEdit::Append("Tacos".into()));
            }
            other => panic!("Expected Replace, got {other:?}"),
        }
    }

    #[test]
    fn test_add_answer_blank_checked_before_topic() {
        let (snap, _) = lunch();
        assert_eq!(add_answer(&snap, Uuid::new_v4(), "  "), Err(Rejection::BlankAnswer));
    }

    #[test]
    fn test_add_answer_unknown_topic() {
        let (snap, _) = lunch();
        let ghost = Uuid::new_v4();
        assert_eq!(add_answer(&snap, ghost, "Tacos"), Err(Rejection::UnknownTopic(ghost)));
    }

    #[test]
    fn test_cast_vote_increments_only_target() {
        let (snap, id) = lunch();
        match cast_vote(&snap, id, 1).unwrap() {
            Transition::Replace { answers, .. } => {
                assert_eq!(answers[0].votes, 1);
                assert_eq!(answers[1].votes, 5);
            }
            other => panic!("Expected Replace, got {other:?}"),
        }
        // Snapshot itself untouched
        assert_eq!(snap.get(&id).unwrap().answers[1].votes, 4);
    }

    #[test]
    fn test_cast_vote_saturates_at_max() {
        let (mut snap, id) = lunch();
        snap.topics[0].answers[1].votes = u64::MAX;
        match cast_vote(&snap, id, 1).unwrap() {
            Transition::Replace { answers, .. } => assert_eq!(answers[1].votes, u64::MAX),
            other => panic!("Expected Replace, got {other:?}"),
        }
    }

    #[test]
    fn test_cast_vote_out_of_range() {
        let (snap, id) = lunch();
        assert_eq!(
            cast_vote(&snap, id, 2),
            Err(Rejection::AnswerOutOfRange { topic: id, index: 2, len: 2 })
        );
    }

    #[test]
    fn test_cast_vote_unknown_topic() {
        let (snap, _) = lunch();
        let ghost = Uuid::new_v4();
        assert_eq!(cast_vote(&snap, ghost, 0), Err(Rejection::UnknownTopic(ghost)));
    }

    #[test]
    fn test_edit_reapplies_to_fresher_topic() {
        let (snap, id) = lunch();
        let mut fresher = snap.get(&id).unwrap().clone();
        fresher.answers[0].votes = 10;
        fresher.version = 4;

        let answers = AnswerEdit::Vote(0).apply(&fresher).unwrap();
        assert_eq!(answers[0].votes, 11);
    }

    #[test]
    fn test_delete_topic_is_unconditional() {
        let ghost = Uuid::new_v4();
        assert_eq!(delete_topic(ghost), Transition::Delete(ghost));
    }

    #[test]
    fn test_reset_all_requires_exact_passphrase() {
        let (snap, id) = lunch();
        assert_eq!(reset_all(&snap, "admin123"), Ok(Transition::DeleteAll(vec![id])));
        assert_eq!(reset_all(&snap, "wrong"), Err(Rejection::BadPassphrase));
        assert_eq!(reset_all(&snap, "ADMIN123"), Err(Rejection::BadPassphrase));
        assert_eq!(reset_all(&snap, " admin123"), Err(Rejection::BadPassphrase));
    }

    #[test]
    fn test_reset_all_on_empty_snapshot() {
        let snap = Snapshot::default();
        assert_eq!(reset_all(&snap, RESET_PASSPHRASE), Ok(Transition::DeleteAll(Vec::new())));
    }
}
