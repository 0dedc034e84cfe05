//! The single user-visible error slot owned by a presentation layer.

/// Commands an observer can issue, used to phrase failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    AddTopic,
    AddAnswer,
    CastVote,
    DeleteTopic,
    ResetAll,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::AddTopic => write!(f, "adding the topic"),
            Operation::AddAnswer => write!(f, "adding the answer"),
            Operation::CastVote => write!(f, "voting"),
            Operation::DeleteTopic => write!(f, "deleting the topic"),
            Operation::ResetAll => write!(f, "resetting"),
        }
    }
}

/// At most one active, dismissible error message.
///
/// A new message replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorSlot {
    message: Option<String>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    /// Clear the active message, returning it.
    pub fn dismiss(&mut self) -> Option<String> {
        self.message.take()
    }

    pub fn current(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.message.is_some()
    }
}
