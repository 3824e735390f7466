//! Persistence contracts for action instances and executions.
//!
//! Rows are grouped by scope: action instances by group, executions by owning action
//! instance id. Ids are assigned by the store on create and encode the scope, so a row
//! can be located from its id alone (see [crate::kernel::identity::extract_group_from_id]).

use crate::kernel::error::ActionsError;
use crate::kernel::execution::Execution;
use crate::kernel::instance::ActionInstance;

/// Store for action instances.
pub trait ActionInstanceStore: Send + Sync {
    /// Stores a new instance, assigning `instance.id` when it has none.
    fn create_action_instance(&self, instance: &mut ActionInstance) -> Result<String, ActionsError>;

    /// Replaces the stored row (upsert).
    fn update_action_instance(&self, instance: &ActionInstance) -> Result<(), ActionsError>;

    fn get_action_instance(&self, id: &str) -> Result<Option<ActionInstance>, ActionsError>;

    fn delete_action_instance(&self, instance: &ActionInstance) -> Result<(), ActionsError>;

    fn get_action_instances_in_group(&self, group: &str)
        -> Result<Vec<ActionInstance>, ActionsError>;

    fn get_action_instances(&self) -> Result<Vec<ActionInstance>, ActionsError>;
}

/// Store for executions. Implementations may expire rows after a TTL.
pub trait ExecutionStore: Send + Sync {
    /// Stores a new execution, assigning `execution.id` under its action instance id.
    fn create_execution(&self, execution: &mut Execution) -> Result<String, ActionsError>;

    /// Replaces the stored row (upsert).
    fn update_execution(&self, execution: &Execution) -> Result<(), ActionsError>;

    fn get_execution(&self, id: &str) -> Result<Option<Execution>, ActionsError>;

    fn delete_execution(&self, execution: &Execution) -> Result<(), ActionsError>;

    /// All live executions of an action instance, in no particular order.
    fn get_executions(&self, action_instance_id: &str) -> Result<Vec<Execution>, ActionsError>;

    /// The `count` most recently created executions, newest first.
    fn get_recent_executions(
        &self,
        action_instance_id: &str,
        count: usize,
    ) -> Result<Vec<Execution>, ActionsError> {
        let mut executions = self.get_executions(action_instance_id)?;
        executions.sort_by(|a, b| Execution::cmp_created(b, a));
        executions.truncate(count);
        Ok(executions)
    }
}
