//! The facade applications hold.
//!
//! Reads go straight to the stores and work before [ActionsOperator::initialize]; every
//! mutating call requires an initialized operator and otherwise fails with
//! [ActionsError::NotInitialized].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use cadence_cluster::{ClusterMediator, ClusteredOperationsDelegate};
use cadence_execution_runtime::{
    ActionOperations, DelegateComponents, LocalOperationsDelegate, RuntimeConfig,
};
use cadence_kernel::{
    ActionInstance, ActionInstanceId, ActionRegistry, ActionsError, Execution,
};

pub struct ActionsOperator {
    delegate: Arc<dyn ActionOperations>,
    initialized: AtomicBool,
}

impl ActionsOperator {
    pub fn new(delegate: Arc<dyn ActionOperations>) -> Self {
        Self {
            delegate,
            initialized: AtomicBool::new(false),
        }
    }

    /// Single node with in-memory stores and a random delegate id.
    pub fn local(registry: Arc<ActionRegistry>, config: &RuntimeConfig) -> Self {
        let components = DelegateComponents::in_memory(registry, config);
        Self::new(LocalOperationsDelegate::new(
            uuid::Uuid::new_v4().to_string(),
            components,
            config,
        ))
    }

    /// One node of a cluster; `delegate_id` is recorded as the executor of its executions.
    pub fn clustered(
        delegate_id: impl Into<String>,
        components: DelegateComponents,
        mediator: Arc<dyn ClusterMediator>,
        config: &RuntimeConfig,
    ) -> Self {
        Self::new(ClusteredOperationsDelegate::new(
            delegate_id,
            components,
            mediator,
            config,
        ))
    }

    pub fn delegate(&self) -> &Arc<dyn ActionOperations> {
        &self.delegate
    }

    pub fn is_clustered(&self) -> bool {
        self.delegate.is_clustered()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Initializes the delegate once; later calls are no-ops.
    pub fn initialize(&self) -> Result<(), ActionsError> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        if let Err(e) = self.delegate.initialize() {
            self.initialized.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!(clustered = self.is_clustered(), "actions operator initialized");
        Ok(())
    }

    /// Tears the delegate down if it was initialized.
    pub fn destroy(&self) -> Result<(), ActionsError> {
        if self
            .initialized
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        self.delegate.destroy()?;
        info!("actions operator destroyed");
        Ok(())
    }

    fn check_initialized(&self) -> Result<(), ActionsError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ActionsError::NotInitialized)
        }
    }

    pub fn get_action_instance(&self, id: &str) -> Result<Option<ActionInstance>, ActionsError> {
        self.delegate.action_instance_store().get_action_instance(id)
    }

    /// Instances of `group`, oldest first.
    pub fn get_action_instances_in_group(
        &self,
        group: &str,
    ) -> Result<Vec<ActionInstance>, ActionsError> {
        let mut instances = self
            .delegate
            .action_instance_store()
            .get_action_instances_in_group(group)?;
        instances.sort_by_key(|instance| instance.creation_time);
        Ok(instances)
    }

    /// Every instance, oldest first.
    pub fn get_action_instances(&self) -> Result<Vec<ActionInstance>, ActionsError> {
        let mut instances = self.delegate.action_instance_store().get_action_instances()?;
        instances.sort_by_key(|instance| instance.creation_time);
        Ok(instances)
    }

    pub fn get_execution(&self, id: &str) -> Result<Option<Execution>, ActionsError> {
        self.delegate.execution_store().get_execution(id)
    }

    /// Executions of an instance, oldest first.
    pub fn get_executions(&self, action_instance_id: &str) -> Result<Vec<Execution>, ActionsError> {
        let mut executions = self.delegate.execution_store().get_executions(action_instance_id)?;
        executions.sort_by(Execution::cmp_created);
        Ok(executions)
    }

    /// The `count` newest executions of an instance, newest first.
    pub fn get_recent_executions(
        &self,
        action_instance_id: &str,
        count: usize,
    ) -> Result<Vec<Execution>, ActionsError> {
        self.delegate
            .execution_store()
            .get_recent_executions(action_instance_id, count)
    }

    pub fn register_action_instance(
        &self,
        instance: &mut ActionInstance,
    ) -> Result<ActionInstanceId, ActionsError> {
        self.check_initialized()?;
        self.delegate.register(instance)
    }

    pub fn update_action_instance(&self, instance: &mut ActionInstance) -> Result<(), ActionsError> {
        self.check_initialized()?;
        self.delegate.update(instance)
    }

    pub fn enable_action_instance(&self, id: &str) -> Result<ActionInstance, ActionsError> {
        self.check_initialized()?;
        self.delegate.enable_by_id(id)
    }

    pub fn enable_instance(&self, instance: &mut ActionInstance) -> Result<(), ActionsError> {
        self.check_initialized()?;
        self.delegate.enable(instance)
    }

    pub fn disable_action_instance(&self, id: &str) -> Result<ActionInstance, ActionsError> {
        self.check_initialized()?;
        self.delegate.disable_by_id(id)
    }

    pub fn disable_instance(&self, instance: &mut ActionInstance) -> Result<(), ActionsError> {
        self.check_initialized()?;
        self.delegate.disable(instance)
    }

    pub fn delete_action_instance(&self, id: &str) -> Result<ActionInstance, ActionsError> {
        self.check_initialized()?;
        self.delegate.delete_by_id(id)
    }

    pub fn delete_instance(&self, instance: &ActionInstance) -> Result<(), ActionsError> {
        self.check_initialized()?;
        self.delegate.delete(instance)
    }

    /// Executes the stored instance `id`. `None` when the instance is disabled or another
    /// node holds the execution lease.
    pub fn execute(&self, id: &str, initiator: &str) -> Result<Option<Execution>, ActionsError> {
        self.check_initialized()?;
        self.delegate.execute_by_id(id, initiator)
    }

    pub fn execute_instance(
        &self,
        instance: &ActionInstance,
        initiator: &str,
    ) -> Result<Option<Execution>, ActionsError> {
        self.check_initialized()?;
        self.delegate.execute(instance, initiator)
    }

    pub fn cancel(&self, execution_id: &str) -> Result<(), ActionsError> {
        self.check_initialized()?;
        self.delegate.cancel_by_id(execution_id)
    }

    pub fn cancel_execution(
        &self,
        execution: &Execution,
        instance: &ActionInstance,
    ) -> Result<(), ActionsError> {
        self.check_initialized()?;
        self.delegate.cancel(execution, instance)
    }
}

impl std::fmt::Debug for ActionsOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionsOperator")
            .field("clustered", &self.is_clustered())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
