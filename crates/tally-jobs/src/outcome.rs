//! Successful job outcomes.

use serde::Serialize;

/// How a job finished without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// A new row was written.
    Created,
    /// An identical row already existed; nothing was written.
    AlreadyExists,
    /// The parent does not exist; the event can never succeed.
    Discarded(DiscardReason),
}

/// Missing parent that caused a discard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// No application with the event's token.
    ApplicationNotFound,
    /// No chat with the event's number under its application.
    ChatNotFound,
}

impl JobOutcome {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AlreadyExists => "already_exists",
            Self::Discarded(_) => "discarded",
        }
    }
}
