//! Reactions to lifecycle messages from other nodes.
//!
//! Every handler checks local state first, so applying the same message twice leaves the
//! node exactly as applying it once.

use std::sync::Arc;

use tracing::{debug, info};

use cadence_execution_runtime::{ActionOperations, LocalOperationsDelegate};
use cadence_kernel::{extract_group_from_id, ActionInstance, ActionsError};

use crate::mediator::ClusterMediator;

pub trait ActionStatusChangeListener: Send + Sync {
    fn on_create(&self, action_instance_id: &str) -> Result<(), ActionsError>;

    fn on_disable(&self, action_instance_id: &str) -> Result<(), ActionsError>;

    fn on_enable(&self, action_instance_id: &str) -> Result<(), ActionsError>;

    fn on_delete(&self, action_instance_id: &str) -> Result<(), ActionsError>;
}

pub trait ExecutionStatusChangeListener: Send + Sync {
    fn on_cancel(&self, execution_id: &str, action_instance_id: &str) -> Result<(), ActionsError>;
}

/// Keeps this node's trigger scheduler in step with the shared instance store.
pub struct DefaultActionStatusChangeListener {
    local: Arc<LocalOperationsDelegate>,
}

impl DefaultActionStatusChangeListener {
    pub fn new(local: Arc<LocalOperationsDelegate>) -> Self {
        Self { local }
    }

    fn lookup(&self, action_instance_id: &str) -> Result<Option<ActionInstance>, ActionsError> {
        let instance = self
            .local
            .action_instance_store()
            .get_action_instance(action_instance_id)?;
        if instance.is_none() {
            debug!(action_instance_id, "action instance no longer stored; ignoring message");
        }
        Ok(instance)
    }
}

impl ActionStatusChangeListener for DefaultActionStatusChangeListener {
    fn on_create(&self, action_instance_id: &str) -> Result<(), ActionsError> {
        let Some(instance) = self.lookup(action_instance_id)? else {
            return Ok(());
        };
        if !self.local.trigger_scheduler().is_scheduled(action_instance_id) {
            self.local.schedule_trigger(&instance)?;
            info!(action_instance_id, "scheduled trigger for remotely created instance");
        }
        Ok(())
    }

    fn on_disable(&self, action_instance_id: &str) -> Result<(), ActionsError> {
        let scheduler = self.local.trigger_scheduler();
        if scheduler.is_scheduled(action_instance_id) {
            scheduler.disable_trigger(action_instance_id)?;
            info!(action_instance_id, "disabled trigger for remotely disabled instance");
        }
        Ok(())
    }

    fn on_enable(&self, action_instance_id: &str) -> Result<(), ActionsError> {
        let Some(instance) = self.lookup(action_instance_id)? else {
            return Ok(());
        };
        if instance.disabled {
            debug!(action_instance_id, "instance disabled again since the message was sent");
            return Ok(());
        }
        let scheduler = self.local.trigger_scheduler();
        if scheduler.is_scheduled(action_instance_id) {
            return Ok(());
        }
        if scheduler.is_registered(action_instance_id) {
            scheduler.enable_trigger(action_instance_id)?;
        } else {
            self.local.schedule_trigger(&instance)?;
        }
        info!(action_instance_id, "enabled trigger for remotely enabled instance");
        Ok(())
    }

    fn on_delete(&self, action_instance_id: &str) -> Result<(), ActionsError> {
        // The row is already gone from the store; the trigger is found by id alone.
        if self.local.trigger_scheduler().is_registered(action_instance_id) {
            self.local
                .unschedule_trigger(extract_group_from_id(action_instance_id), action_instance_id)?;
            info!(action_instance_id, "removed trigger for remotely deleted instance");
        }
        Ok(())
    }
}

/// Cancels executions this node started when another node asks for it.
pub struct DefaultExecutionStatusChangeListener {
    local: Arc<LocalOperationsDelegate>,
    mediator: Arc<dyn ClusterMediator>,
}

impl DefaultExecutionStatusChangeListener {
    pub fn new(local: Arc<LocalOperationsDelegate>, mediator: Arc<dyn ClusterMediator>) -> Self {
        Self { local, mediator }
    }
}

impl ExecutionStatusChangeListener for DefaultExecutionStatusChangeListener {
    fn on_cancel(&self, execution_id: &str, action_instance_id: &str) -> Result<(), ActionsError> {
        if !self
            .mediator
            .is_executing_action(execution_id, action_instance_id)?
        {
            return Ok(());
        }
        let execution = self.local.require_execution(execution_id)?;
        let instance = self.local.require_action_instance(action_instance_id)?;
        self.local.cancel_local(&execution, &instance)
    }
}
