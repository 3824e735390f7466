//! Operations contract shared by the local and clustered delegates.
//!
//! Delegates decorate each other; the `*_by_id` forms are provided here so that every
//! layer resolves ids the same way and then dispatches to its own (possibly overridden)
//! instance-level operation.

use cadence_kernel::{
    ActionInstance, ActionInstanceId, ActionInstanceStore, ActionsError, Execution, ExecutionStore,
};

/// Initiator recorded when the caller does not name one.
pub const DEFAULT_INITIATOR: &str = "Unknown";

/// Initiator recorded for executions started by a trigger fire.
pub const SCHEDULED_TRIGGER_INITIATOR: &str = "ScheduledTrigger";

pub trait ActionOperations: Send + Sync {
    fn initialize(&self) -> Result<(), ActionsError>;

    fn destroy(&self) -> Result<(), ActionsError>;

    fn is_clustered(&self) -> bool {
        false
    }

    fn action_instance_store(&self) -> &dyn ActionInstanceStore;

    fn execution_store(&self) -> &dyn ExecutionStore;

    /// Validates, persists and schedules a new instance; assigns `instance.id`.
    fn register(&self, instance: &mut ActionInstance) -> Result<ActionInstanceId, ActionsError>;

    /// Replaces an existing instance, keeping its id.
    fn update(&self, instance: &mut ActionInstance) -> Result<(), ActionsError>;

    fn validate(&self, instance: &ActionInstance) -> Result<(), ActionsError>;

    fn enable(&self, instance: &mut ActionInstance) -> Result<(), ActionsError>;

    fn disable(&self, instance: &mut ActionInstance) -> Result<(), ActionsError>;

    fn delete(&self, instance: &ActionInstance) -> Result<(), ActionsError>;

    /// Starts an execution. `None` when nothing was created (disabled instance, or
    /// another node owns this run).
    fn execute(
        &self,
        instance: &ActionInstance,
        initiator: &str,
    ) -> Result<Option<Execution>, ActionsError>;

    /// Requests cancellation. Fire-and-forget; observe the execution row for the outcome.
    fn cancel(&self, execution: &Execution, instance: &ActionInstance) -> Result<(), ActionsError>;

    fn require_action_instance(&self, id: &str) -> Result<ActionInstance, ActionsError> {
        self.action_instance_store()
            .get_action_instance(id)?
            .ok_or_else(|| ActionsError::ActionInstanceNotFound(id.to_string()))
    }

    fn require_execution(&self, id: &str) -> Result<Execution, ActionsError> {
        self.execution_store()
            .get_execution(id)?
            .ok_or_else(|| ActionsError::ExecutionNotFound(id.to_string()))
    }

    fn execute_by_id(&self, id: &str, initiator: &str) -> Result<Option<Execution>, ActionsError> {
        let instance = self.require_action_instance(id)?;
        self.execute(&instance, initiator)
    }

    fn enable_by_id(&self, id: &str) -> Result<ActionInstance, ActionsError> {
        let mut instance = self.require_action_instance(id)?;
        self.enable(&mut instance)?;
        Ok(instance)
    }

    fn disable_by_id(&self, id: &str) -> Result<ActionInstance, ActionsError> {
        let mut instance = self.require_action_instance(id)?;
        self.disable(&mut instance)?;
        Ok(instance)
    }

    fn delete_by_id(&self, id: &str) -> Result<ActionInstance, ActionsError> {
        let instance = self.require_action_instance(id)?;
        self.delete(&instance)?;
        Ok(instance)
    }

    fn cancel_by_id(&self, execution_id: &str) -> Result<(), ActionsError> {
        let execution = self.require_execution(execution_id)?;
        let instance = self.require_action_instance(&execution.action_instance_id)?;
        self.cancel(&execution, &instance)
    }
}
