//! Errors surfaced to observers by the voting engine.

use tally_core::{Operation, Rejection, TopicId};
use thiserror::Error;

use crate::store::StoreError;

/// Coarse error category shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Blank title or answer text
    Validation,
    /// Topic or answer vanished
    NotFound,
    /// Wrong reset passphrase
    Auth,
    /// Store or transport failure
    Storage,
}

/// Failure of one engine command. Never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Reset passphrase rejected")]
    Auth,
    #[error("Storage error: {0}")]
    Storage(#[source] StoreError),
    /// A reset stopped at its first failed delete
    #[error("Reset incomplete: {deleted} deleted, {remaining} remaining, failed on {failed}: {source}")]
    ResetIncomplete {
        deleted: usize,
        /// Topics left intact, including the failed one
        remaining: usize,
        failed: TopicId,
        source: StoreError,
    },
}

impl VoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoteError::Validation(_) => ErrorKind::Validation,
            VoteError::NotFound(_) => ErrorKind::NotFound,
            VoteError::Auth => ErrorKind::Auth,
            VoteError::Storage(_) | VoteError::ResetIncomplete { .. } => ErrorKind::Storage,
        }
    }

    /// Message for the observer's error slot after `operation` failed.
    pub fn user_message(&self, operation: Operation) -> String {
        match self {
            VoteError::Validation(reason) => format!("{reason}."),
            VoteError::Auth => "Incorrect passphrase.".to_string(),
            VoteError::NotFound(_) => {
                format!("An error occurred while {operation}: it no longer exists.")
            }
            VoteError::Storage(_) => format!("An error occurred while {operation}."),
            VoteError::ResetIncomplete {
                deleted, remaining, ..
            } => format!(
                "An error occurred while {operation}: {deleted} topics deleted, {remaining} left."
            ),
        }
    }
}

impl From<Rejection> for VoteError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::BlankTitle | Rejection::BlankAnswer => {
                VoteError::Validation(rejection.to_string())
            }
            Rejection::UnknownTopic(_) | Rejection::AnswerOutOfRange { .. } => {
                VoteError::NotFound(rejection.to_string())
            }
            Rejection::BadPassphrase => VoteError::Auth,
        }
    }
}

impl From<StoreError> for VoteError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => VoteError::NotFound(e.to_string()),
            other => VoteError::Storage(other),
        }
    }
}
