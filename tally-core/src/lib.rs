//! # tally-core: data model and pure transitions for live polls
//!
//! Topics hold an ordered list of answers; answers hold a vote counter.
//! The functions in [`transition`] turn user intent into exactly one store
//! operation without touching the store, so the same logic runs in every
//! client process.
//!
//! ## Modules
//!
//! - [`model`]: Topic, Answer, Snapshot
//! - [`transition`]: add topic, add answer, cast vote, delete, reset
//! - [`notice`]: the single dismissible error slot for observers

pub mod model;
pub mod notice;
pub mod transition;

pub use model::{now_millis, Answer, NewTopic, Snapshot, Topic, TopicId};
pub use notice::{ErrorSlot, Operation};
pub use transition::{AnswerEdit, Rejection, Transition, RESET_PASSPHRASE};
