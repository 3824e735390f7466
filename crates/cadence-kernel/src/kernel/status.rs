//! Execution status model.
//!
//! [StatusKind] is the finite set of states; [Status] is the per-execution value that
//! carries the human-readable message and the initiator alongside the kind. A `Status`
//! is never shared between executions, so setting a message on one execution cannot
//! leak into another.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of an execution (or of an action instance, for the enable/disable kinds).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Cancelled,
    Completed,
    Failed,
    TimedOut,
    Skipped,
    Scheduled,
    InProgress,
    Disabled,
    Enabled,
}

impl StatusKind {
    /// Terminal kinds: no further transition is expected once reached.
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            StatusKind::Cancelled
                | StatusKind::Completed
                | StatusKind::Failed
                | StatusKind::TimedOut
                | StatusKind::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::Cancelled => "CANCELLED",
            StatusKind::Completed => "COMPLETED",
            StatusKind::Failed => "FAILED",
            StatusKind::TimedOut => "TIMED_OUT",
            StatusKind::Skipped => "SKIPPED",
            StatusKind::Scheduled => "SCHEDULED",
            StatusKind::InProgress => "IN_PROGRESS",
            StatusKind::Disabled => "DISABLED",
            StatusKind::Enabled => "ENABLED",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status attached to a single execution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub message: Option<String>,
    pub initiator: Option<String>,
}

impl Status {
    pub fn new(kind: StatusKind) -> Self {
        Self {
            kind,
            message: None,
            initiator: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    pub fn is_complete(&self) -> bool {
        self.kind.is_complete()
    }
}

impl From<StatusKind> for Status {
    fn from(kind: StatusKind) -> Self {
        Status::new(kind)
    }
}
