//! Cluster mediator contract: lifecycle message fan-out plus a short-lived execution lease.
//!
//! Messages are delivered at least once and may be read many times; consumers dedupe on
//! `message_id` and handle every message idempotently. The lease is advisory: it has no
//! fencing token, so a node that stalls past its TTL can still finish work another node
//! has since started.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cadence_kernel::{ActionInstanceId, ActionsError, Execution, ExecutionId};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionInstanceEvent {
    Created,
    Enabled,
    Disabled,
    Deleted,
}

impl fmt::Display for ActionInstanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionInstanceEvent::Created => "CREATED",
            ActionInstanceEvent::Enabled => "ENABLED",
            ActionInstanceEvent::Disabled => "DISABLED",
            ActionInstanceEvent::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionEvent {
    Canceled,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionInstanceMessage {
    pub message_id: String,
    pub action_instance_id: ActionInstanceId,
    pub status: ActionInstanceEvent,
    pub sent_at: DateTime<Utc>,
}

impl ActionInstanceMessage {
    pub fn new(action_instance_id: impl Into<ActionInstanceId>, status: ActionInstanceEvent) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            action_instance_id: action_instance_id.into(),
            status,
            sent_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionMessage {
    pub message_id: String,
    pub execution_id: ExecutionId,
    pub action_instance_id: ActionInstanceId,
    pub status: ExecutionEvent,
    pub sent_at: DateTime<Utc>,
}

impl ExecutionMessage {
    pub fn canceled(
        execution_id: impl Into<ExecutionId>,
        action_instance_id: impl Into<ActionInstanceId>,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            execution_id: execution_id.into(),
            action_instance_id: action_instance_id.into(),
            status: ExecutionEvent::Canceled,
            sent_at: Utc::now(),
        }
    }
}

pub trait ClusterMediator: Send + Sync {
    fn send_action_message(&self, message: ActionInstanceMessage) -> Result<(), ActionsError>;

    /// Every retained action message, oldest first.
    fn get_all_action_messages(&self) -> Result<Vec<ActionInstanceMessage>, ActionsError>;

    fn send_execution_message(&self, message: ExecutionMessage) -> Result<(), ActionsError>;

    /// Every retained execution message, oldest first.
    fn get_all_execution_messages(&self) -> Result<Vec<ExecutionMessage>, ActionsError>;

    /// Tries to take the exclusive, non-renewing lease for one execution of
    /// `action_instance_id`. `true` means this node should run it.
    fn should_execute_action(
        &self,
        action_instance_id: &str,
        lease_ttl_seconds: u64,
    ) -> Result<bool, ActionsError>;

    /// Whether this node started `execution_id`.
    fn is_executing_action(
        &self,
        execution_id: &str,
        action_instance_id: &str,
    ) -> Result<bool, ActionsError>;

    /// Called after a local execute so [ClusterMediator::is_executing_action] can answer.
    fn record_execution(&self, _execution: &Execution) -> Result<(), ActionsError> {
        Ok(())
    }

    /// Drops expired leases and returns how many went. Mediators whose lease store
    /// expires rows on its own keep the default.
    fn sweep_expired_leases(&self) -> Result<u64, ActionsError> {
        Ok(0)
    }
}
