//! Execution model: one attempt to run an action instance.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kernel::execution_log::{LogEntry, LogLevel};
use crate::kernel::identity::{
    next_created_time, ActionInstanceId, CreatedTime, ExecutionId, ExecutorId,
};
use crate::kernel::status::{Status, StatusKind};

/// Execution record.
///
/// `created_time` is the only ordering key between executions of the same instance;
/// `start_time`/`end_time` are wall clock and only set when work actually starts/ends.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Execution {
    pub id: ExecutionId,
    pub action_instance_id: ActionInstanceId,
    pub executor_id: ExecutorId,
    /// Who asked for this execution (a user, `ScheduledTrigger`, ...).
    pub initiator: Option<String>,
    pub created_time: CreatedTime,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<Status>,
    pub log: Vec<LogEntry>,
}

impl Execution {
    /// New unsaved execution; the store assigns `id`.
    pub fn new(executor_id: impl Into<String>, action_instance_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            action_instance_id: action_instance_id.into(),
            executor_id: executor_id.into(),
            initiator: None,
            created_time: next_created_time(),
            start_time: None,
            end_time: None,
            status: None,
            log: Vec::new(),
        }
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    /// Builds a status of `kind` tagged with this execution's initiator.
    pub fn status_of(&self, kind: StatusKind, message: impl Into<String>) -> Status {
        let status = Status::new(kind).with_message(message);
        match &self.initiator {
            Some(initiator) => status.with_initiator(initiator.clone()),
            None => status,
        }
    }

    pub fn is_before(&self, other: &Execution) -> bool {
        self.created_time < other.created_time
    }

    /// A missing status counts as incomplete.
    pub fn is_complete(&self) -> bool {
        self.status.as_ref().is_some_and(Status::is_complete)
    }

    pub fn status_kind(&self) -> Option<StatusKind> {
        self.status.as_ref().map(|s| s.kind)
    }

    /// Marks the execution terminal with `status` and stamps `end_time`.
    pub fn finish(&mut self, status: Status, now: DateTime<Utc>) {
        self.status = Some(status);
        self.end_time = Some(now);
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.log.push(LogEntry::new(LogLevel::Info, message));
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.log.push(LogEntry::new(LogLevel::Error, message));
    }

    /// Total order by `created_time`, for sorting listings.
    pub fn cmp_created(a: &Execution, b: &Execution) -> Ordering {
        a.created_time.cmp(&b.created_time)
    }
}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.id, self.created_time)
    }
}
