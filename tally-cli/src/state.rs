//! Shell state: the parts of the UI that never reach the store.
//!
//! `AppState` holds the selected topic (target of `answer`), the single
//! error slot and whether the reset dialog is open. Topics are addressed by
//! their 1-based display position in the latest snapshot.

use tally_collab::VoteError;
use tally_core::{ErrorSlot, Operation, Snapshot, Topic, TopicId};

/// One parsed line of shell input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddTopic(String),
    Select(usize),
    AddAnswer(String),
    /// Topic position, answer position (both 1-based).
    Vote(usize, usize),
    Delete(usize),
    OpenReset,
    /// Raw line typed while the reset dialog is open.
    Passphrase(String),
    CancelReset,
    Dismiss,
    Help,
    Quit,
    Nothing,
}

pub const HELP: &str = "\
Commands:
  topic <title>     add a topic
  select <n>        pick topic n for answering
  answer <text>     add an answer to the selected topic
  vote <n> <i>      vote for answer i of topic n
  delete <n>        delete topic n
  reset             delete every topic (asks for the passphrase)
  dismiss           clear the error message
  help              show this text
  quit              leave the shell";

impl Command {
    /// Parse a line. While the reset dialog is open every non-blank line is
    /// taken as the passphrase and a blank line cancels.
    pub fn parse(line: &str, reset_dialog_open: bool) -> Result<Command, String> {
        if reset_dialog_open {
            if line.trim().is_empty() {
                return Ok(Command::CancelReset);
            }
            return Ok(Command::Passphrase(line.trim_end_matches(['\r', '\n']).to_string()));
        }

        let line = line.trim();
        if line.is_empty() {
            return Ok(Command::Nothing);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word {
            "topic" => Ok(Command::AddTopic(rest.to_string())),
            "answer" => Ok(Command::AddAnswer(rest.to_string())),
            "select" => Ok(Command::Select(position(rest)?)),
            "delete" => Ok(Command::Delete(position(rest)?)),
            "vote" => {
                let mut parts = rest.split_whitespace();
                let (Some(topic), Some(answer), None) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err("Usage: vote <topic> <answer>".to_string());
                };
                Ok(Command::Vote(position(topic)?, position(answer)?))
            }
            "reset" => Ok(Command::OpenReset),
            "dismiss" => Ok(Command::Dismiss),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("Unknown command '{other}'. Type 'help'")),
        }
    }
}

fn position(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("'{s}' is not a position (expected 1, 2, ...)")),
    }
}

/// UI-local state of one shell.
#[derive(Debug, Default)]
pub struct AppState {
    pub selected: Option<TopicId>,
    pub errors: ErrorSlot,
    pub reset_dialog: bool,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Topic shown at 1-based `position`.
    pub fn topic_at<'a>(&mut self, snapshot: &'a Snapshot, position: usize) -> Option<&'a Topic> {
        let topic = position.checked_sub(1).and_then(|i| snapshot.at(i));
        if topic.is_none() {
            self.errors.show(format!("There is no topic {position}."));
        }
        topic
    }

    /// Select the topic at `position`. Returns false if there is none.
    pub fn select(&mut self, snapshot: &Snapshot, position: usize) -> bool {
        match self.topic_at(snapshot, position) {
            Some(topic) => {
                self.selected = Some(topic.id);
                true
            }
            None => false,
        }
    }

    /// The selected topic, if it still exists. A vanished selection is
    /// cleared.
    pub fn selected_topic<'a>(&mut self, snapshot: &'a Snapshot) -> Option<&'a Topic> {
        let id = self.selected?;
        let topic = snapshot.get(&id);
        if topic.is_none() {
            self.selected = None;
        }
        topic
    }

    pub fn open_reset(&mut self) {
        self.reset_dialog = true;
    }

    pub fn close_reset(&mut self) {
        self.reset_dialog = false;
    }

    /// Put the message for a failed `operation` into the error slot.
    pub fn report(&mut self, operation: Operation, error: &VoteError) {
        log::debug!("{operation} failed: {error}");
        self.errors.show(error.user_message(operation));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::Answer;

    fn snapshot(titles: &[&str]) -> Snapshot {
        let topics = titles
            .iter()
            .enumerate()
            .map(|(i, title)| Topic {
                id: uuid::Uuid::new_v4(),
                title: title.to_string(),
                answers: vec![Answer::new("yes")],
                created_at: i as u64,
                version: 1,
            })
            .collect();
        Snapshot::new(1, topics)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("topic  Lunch today? ", false),
            Ok(Command::AddTopic("Lunch today?".into()))
        );
        assert_eq!(Command::parse("select 2", false), Ok(Command::Select(2)));
        assert_eq!(
            Command::parse("answer Pizza", false),
            Ok(Command::AddAnswer("Pizza".into()))
        );
        assert_eq!(Command::parse("vote 1 3", false), Ok(Command::Vote(1, 3)));
        assert_eq!(Command::parse("delete 4", false), Ok(Command::Delete(4)));
        assert_eq!(Command::parse("reset", false), Ok(Command::OpenReset));
        assert_eq!(Command::parse("dismiss", false), Ok(Command::Dismiss));
        assert_eq!(Command::parse("quit", false), Ok(Command::Quit));
        assert_eq!(Command::parse("   ", false), Ok(Command::Nothing));
    }

    #[test]
    fn test_parse_rejects_bad_positions() {
        assert!(Command::parse("select 0", false).is_err());
        assert!(Command::parse("delete x", false).is_err());
        assert!(Command::parse("vote 1", false).is_err());
        assert!(Command::parse("vote 1 2 3", false).is_err());
        assert!(Command::parse("frobnicate", false).is_err());
    }

    #[test]
    fn test_blank_topic_reaches_engine() {
        // Blank titles are rejected by the engine, not the parser
        assert_eq!(Command::parse("topic", false), Ok(Command::AddTopic(String::new())));
    }

    #[test]
    fn test_reset_dialog_takes_raw_line() {
        assert_eq!(
            Command::parse("reset", true),
            Ok(Command::Passphrase("reset".into()))
        );
        assert_eq!(
            Command::parse(" admin123", true),
            Ok(Command::Passphrase(" admin123".into()))
        );
        assert_eq!(Command::parse("", true), Ok(Command::CancelReset));
    }

    #[test]
    fn test_select_by_position() {
        let snap = snapshot(&["a", "b"]);
        let mut state = AppState::new();

        assert!(state.select(&snap, 2));
        assert_eq!(state.selected, Some(snap.topics[1].id));
        assert!(!state.errors.is_active());

        assert!(!state.select(&snap, 3));
        assert_eq!(state.selected, Some(snap.topics[1].id));
        assert_eq!(state.errors.current(), Some("There is no topic 3."));
    }

    #[test]
    fn test_vanished_selection_is_cleared() {
        let before = snapshot(&["a", "b"]);
        let mut state = AppState::new();
        state.select(&before, 1);

        let after = Snapshot::new(2, vec![before.topics[1].clone()]);
        assert!(state.selected_topic(&after).is_none());
        assert!(state.selected.is_none());
    }

    #[test]
    fn test_report_replaces_message() {
        let mut state = AppState::new();
        state.report(Operation::ResetAll, &VoteError::Auth);
        assert_eq!(state.errors.current(), Some("Incorrect passphrase."));

        state.report(
            Operation::AddTopic,
            &VoteError::Validation("The title is empty".into()),
        );
        assert_eq!(state.errors.current(), Some("The title is empty."));
    }
}
