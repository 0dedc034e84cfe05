//! Plain-text rendering of snapshots.

use std::fmt::Write;
use tally_core::{Snapshot, Topic};

use crate::state::AppState;

fn write_topic(out: &mut String, position: usize, topic: &Topic, selected: bool) {
    let marker = if selected { '>' } else { ' ' };
    let total = topic.total_votes();
    let noun = if total == 1 { "vote" } else { "votes" };
    let _ = writeln!(out, "{marker}{position:>3}. {}  ({total} {noun})", topic.title);
    if topic.answers.is_empty() {
        let _ = writeln!(out, "       (no answers yet)");
    }
    for (i, answer) in topic.answers.iter().enumerate() {
        let _ = writeln!(out, "       {}) {}  [{}]", i + 1, answer.text, answer.votes);
    }
}

/// Every topic in display order, as shown by `tally watch`.
pub fn render_snapshot(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "── Live poll · revision {} ──", snapshot.revision);
    if snapshot.is_empty() {
        let _ = writeln!(out, "  No topics yet.");
    }
    for (i, topic) in snapshot.topics.iter().enumerate() {
        write_topic(&mut out, i + 1, topic, false);
    }
    out
}

/// The shell view: topics with the selection marker, then the error slot
/// and the reset dialog if they are open.
pub fn render_view(snapshot: &Snapshot, state: &mut AppState) -> String {
    let selected = state.selected_topic(snapshot).map(|t| t.id);

    let mut out = String::new();
    let _ = writeln!(out, "── Live poll · revision {} ──", snapshot.revision);
    if snapshot.is_empty() {
        let _ = writeln!(out, "  No topics yet. Add one with 'topic <title>'.");
    }
    for (i, topic) in snapshot.topics.iter().enumerate() {
        write_topic(&mut out, i + 1, topic, selected == Some(topic.id));
    }
    if let Some(message) = state.errors.current() {
        let _ = writeln!(out, "! {message}  (type 'dismiss' to close)");
    }
    if state.reset_dialog {
        let _ = writeln!(out, "Reset: every topic and answer will be deleted.");
        let _ = writeln!(out, "Enter the passphrase (blank line cancels):");
    }
    out
}
