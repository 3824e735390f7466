//! Action instance model: a registered binding of an action to a trigger and policy.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kernel::identity::{next_created_time, ActionInstanceId, CreatedTime, DEFAULT_GROUP};
use crate::kernel::trigger::Trigger;

/// Timeout value meaning "never time out".
pub const DEFAULT_EXECUTION_TIMEOUT_SECONDS: i64 = -1;

/// What to do when an execution is requested while earlier ones are still running.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConcurrentExecutionStrategy {
    /// Let overlapping executions coexist.
    Allow,
    /// Skip the new execution.
    #[default]
    Reject,
    /// Cancel the earlier executions and run the new one.
    Replace,
}

impl fmt::Display for ConcurrentExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConcurrentExecutionStrategy::Allow => "ALLOW",
            ConcurrentExecutionStrategy::Reject => "REJECT",
            ConcurrentExecutionStrategy::Replace => "REPLACE",
        })
    }
}

/// Identity and parameters handed to actions, listeners and trigger callbacks.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Context {
    pub action_instance_id: ActionInstanceId,
    pub name: String,
    pub group: String,
    pub parameters: BTreeMap<String, String>,
}

/// A registered unit of schedulable work.
///
/// `id` is empty until the instance is stored; the store assigns `{group}:{uuid}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionInstance {
    pub id: ActionInstanceId,
    pub name: String,
    pub group: String,
    /// Registry key of the action factory.
    pub action_type: String,
    /// Registry key of the execution listener factory; `None` uses the no-op listener.
    pub execution_listener_type: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub trigger: Option<Trigger>,
    pub owners: Vec<String>,
    pub watchers: Vec<String>,
    pub disabled: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub creation_time: CreatedTime,
    /// Values `<= 0` disable the timeout.
    pub execution_timeout_seconds: i64,
    pub concurrent_execution_strategy: ConcurrentExecutionStrategy,
}

impl ActionInstance {
    pub fn new(name: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            group: DEFAULT_GROUP.to_string(),
            action_type: action_type.into(),
            execution_listener_type: None,
            parameters: BTreeMap::new(),
            trigger: None,
            owners: Vec::new(),
            watchers: Vec::new(),
            disabled: false,
            last_updated: None,
            creation_time: next_created_time(),
            execution_timeout_seconds: DEFAULT_EXECUTION_TIMEOUT_SECONDS,
            concurrent_execution_strategy: ConcurrentExecutionStrategy::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_execution_listener(mut self, listener_type: impl Into<String>) -> Self {
        self.execution_listener_type = Some(listener_type.into());
        self
    }

    pub fn with_execution_timeout_seconds(mut self, seconds: i64) -> Self {
        self.execution_timeout_seconds = seconds;
        self
    }

    pub fn with_concurrent_execution_strategy(
        mut self,
        strategy: ConcurrentExecutionStrategy,
    ) -> Self {
        self.concurrent_execution_strategy = strategy;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owners.push(owner.into());
        self
    }

    pub fn with_watcher(mut self, watcher: impl Into<String>) -> Self {
        self.watchers.push(watcher.into());
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// Builds the context passed to actions and trigger callbacks.
    pub fn context(&self) -> Context {
        Context {
            action_instance_id: self.id.clone(),
            name: self.name.clone(),
            group: self.group.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Returns `Some(seconds)` when a timeout applies.
    pub fn timeout_seconds(&self) -> Option<u64> {
        (self.execution_timeout_seconds > 0).then_some(self.execution_timeout_seconds as u64)
    }
}

impl fmt::Display for ActionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_instance_uses_defaults() {
        let instance = ActionInstance::new("nightly-report", "report");
        assert_eq!(instance.group, DEFAULT_GROUP);
        assert_eq!(
            instance.concurrent_execution_strategy,
            ConcurrentExecutionStrategy::Reject
        );
        assert_eq!(instance.execution_timeout_seconds, -1);
        assert_eq!(instance.timeout_seconds(), None);
        assert!(!instance.has_id());
        assert!(instance.execution_listener_type.is_none());
    }

    #[test]
    fn context_carries_identity_and_parameters() {
        let instance = ActionInstance::new("sync", "sync-action")
            .with_id("g:1")
            .with_group("g")
            .with_parameter("region", "us-east-1");
        let ctx = instance.context();
        assert_eq!(ctx.action_instance_id, "g:1");
        assert_eq!(ctx.group, "g");
        assert_eq!(ctx.parameters.get("region").map(String::as_str), Some("us-east-1"));
    }

    #[test]
    fn creation_time_orders_instances_by_construction() {
        let first = ActionInstance::new("a", "t");
        let second = ActionInstance::new("b", "t");
        assert!(first.creation_time < second.creation_time);
    }

    #[test]
    fn zero_timeout_means_no_timeout() {
        let instance = ActionInstance::new("a", "t").with_execution_timeout_seconds(0);
        assert_eq!(instance.timeout_seconds(), None);
        let instance = instance.with_execution_timeout_seconds(5);
        assert_eq!(instance.timeout_seconds(), Some(5));
    }
}
