//! Single-node operations delegate.
//!
//! Owns the stores, the trigger scheduler and the execution runtime. Trigger fires and
//! REPLACE cancellations are routed through the outermost delegate (held as a `Weak`),
//! so a clustered wrapper sees them as if the caller had invoked it directly.

use std::sync::{Arc, Weak};

use chrono::Utc;
use tracing::{debug, info, warn};

use cadence_kernel::{
    incomplete_before, rejected_message, resolve_concurrency, ActionInstance, ActionInstanceId,
    ActionInstanceStore, ActionRegistry, ActionsError, ConcurrencyDecision, Context, Execution,
    ExecutionListener, ExecutionStore, ExecutorId, InMemoryActionInstanceStore,
    InMemoryExecutionStore, NoopExecutionListener, StatusKind, DEFAULT_GROUP, ID_SEPARATOR,
};

use crate::config::RuntimeConfig;
use crate::executor::ExecutionRuntime;
use crate::operations::{ActionOperations, SCHEDULED_TRIGGER_INITIATOR};
use crate::trigger_scheduler::{LocalTriggerScheduler, TriggerFireHandler, TriggerScheduler};

/// Collaborators a delegate is built from.
#[derive(Clone)]
pub struct DelegateComponents {
    pub action_instance_store: Arc<dyn ActionInstanceStore>,
    pub execution_store: Arc<dyn ExecutionStore>,
    pub trigger_scheduler: Arc<dyn TriggerScheduler>,
    pub registry: Arc<ActionRegistry>,
}

impl DelegateComponents {
    /// In-memory stores and a local trigger scheduler.
    pub fn in_memory(registry: Arc<ActionRegistry>, config: &RuntimeConfig) -> Self {
        let ttl = chrono::Duration::from_std(config.execution_ttl).ok();
        Self {
            action_instance_store: Arc::new(InMemoryActionInstanceStore::new()),
            execution_store: Arc::new(InMemoryExecutionStore::with_ttl(ttl)),
            trigger_scheduler: Arc::new(LocalTriggerScheduler::new()),
            registry,
        }
    }

    pub fn with_action_instance_store(mut self, store: Arc<dyn ActionInstanceStore>) -> Self {
        self.action_instance_store = store;
        self
    }

    pub fn with_execution_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.execution_store = store;
        self
    }

    pub fn with_trigger_scheduler(mut self, scheduler: Arc<dyn TriggerScheduler>) -> Self {
        self.trigger_scheduler = scheduler;
        self
    }
}

/// Re-enters `execute_by_id` on the owning delegate when a trigger fires.
struct ExecuteOnFire {
    target: Weak<dyn ActionOperations>,
}

impl TriggerFireHandler for ExecuteOnFire {
    fn fire(&self, context: Context) {
        let Some(target) = self.target.upgrade() else {
            debug!(action_instance_id = %context.action_instance_id, "delegate gone; ignoring fire");
            return;
        };
        match target.execute_by_id(&context.action_instance_id, SCHEDULED_TRIGGER_INITIATOR) {
            Ok(Some(execution)) => {
                debug!(execution_id = %execution.id, "scheduled execution started")
            }
            Ok(None) => debug!(
                action_instance_id = %context.action_instance_id,
                "scheduled fire did not start an execution"
            ),
            Err(e) => warn!(
                action_instance_id = %context.action_instance_id,
                error = %e,
                "scheduled execution failed"
            ),
        }
    }
}

pub struct LocalOperationsDelegate {
    delegate_id: ExecutorId,
    components: DelegateComponents,
    runtime: ExecutionRuntime,
    outer: Weak<dyn ActionOperations>,
}

impl LocalOperationsDelegate {
    /// Standalone delegate that is its own outermost layer.
    pub fn new(
        delegate_id: impl Into<ExecutorId>,
        components: DelegateComponents,
        config: &RuntimeConfig,
    ) -> Arc<Self> {
        let delegate_id = delegate_id.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let outer: Weak<dyn ActionOperations> = weak.clone();
            Self::with_outer(delegate_id, components, config, outer)
        })
    }

    /// Delegate wrapped by `outer`, which receives trigger fires and REPLACE cancels.
    pub fn with_outer(
        delegate_id: impl Into<ExecutorId>,
        components: DelegateComponents,
        config: &RuntimeConfig,
        outer: Weak<dyn ActionOperations>,
    ) -> Self {
        let runtime = ExecutionRuntime::new(
            components.execution_store.clone(),
            config.thread_pool_size,
            config.cancel_pool_size(),
        );
        Self {
            delegate_id: delegate_id.into(),
            components,
            runtime,
            outer,
        }
    }

    pub fn delegate_id(&self) -> &str {
        &self.delegate_id
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.components.registry
    }

    pub fn trigger_scheduler(&self) -> &dyn TriggerScheduler {
        self.components.trigger_scheduler.as_ref()
    }

    pub fn runtime(&self) -> &ExecutionRuntime {
        &self.runtime
    }

    /// Registers the instance's trigger (if any) here; disabled instances stay paused.
    pub fn schedule_trigger(&self, instance: &ActionInstance) -> Result<(), ActionsError> {
        let Some(trigger) = &instance.trigger else {
            return Ok(());
        };
        let handler = Arc::new(ExecuteOnFire {
            target: self.outer.clone(),
        });
        let scheduler = &self.components.trigger_scheduler;
        scheduler.register_trigger(
            &instance.group,
            &instance.id,
            trigger,
            instance.context(),
            handler,
        )?;
        if instance.disabled {
            scheduler.disable_trigger(&instance.id)?;
        }
        Ok(())
    }

    /// Removes the trigger of `action_instance_id` if this node has one.
    pub fn unschedule_trigger(&self, group: &str, action_instance_id: &str) -> Result<(), ActionsError> {
        let scheduler = &self.components.trigger_scheduler;
        if scheduler.is_registered(action_instance_id) {
            scheduler.delete_trigger(group, action_instance_id)?;
        }
        Ok(())
    }

    /// Cancels on this node only: no-op when the execution is already terminal.
    pub fn cancel_local(
        &self,
        execution: &Execution,
        instance: &ActionInstance,
    ) -> Result<(), ActionsError> {
        let latest = self.require_execution(&execution.id)?;
        if latest.is_complete() {
            debug!(execution_id = %latest.id, "execution already terminal; skipping cancel");
            return Ok(());
        }
        let listener = self.new_listener(instance);
        self.runtime
            .submit_cancel(listener, instance.clone(), latest)?;
        info!(
            execution_id = %execution.id,
            action_instance_id = %instance.id,
            "cancellation submitted"
        );
        Ok(())
    }

    fn new_listener(&self, instance: &ActionInstance) -> Arc<dyn ExecutionListener> {
        match self
            .components
            .registry
            .new_listener(instance.execution_listener_type.as_deref())
        {
            Ok(listener) => listener,
            Err(e) => {
                warn!(action_instance_id = %instance.id, error = %e, "falling back to no-op listener");
                Arc::new(NoopExecutionListener)
            }
        }
    }

    fn fail_execution(&self, execution: &mut Execution, message: String) -> Result<(), ActionsError> {
        execution.log_error(message.clone());
        let status = execution.status_of(StatusKind::Failed, message);
        execution.finish(status, Utc::now());
        self.components.execution_store.update_execution(execution)
    }
}

impl ActionOperations for LocalOperationsDelegate {
    fn initialize(&self) -> Result<(), ActionsError> {
        self.components.trigger_scheduler.initialize()?;
        info!(delegate_id = %self.delegate_id, "local operations delegate initialized");
        Ok(())
    }

    fn destroy(&self) -> Result<(), ActionsError> {
        self.components.trigger_scheduler.destroy()?;
        info!(delegate_id = %self.delegate_id, "local operations delegate destroyed");
        Ok(())
    }

    fn action_instance_store(&self) -> &dyn ActionInstanceStore {
        self.components.action_instance_store.as_ref()
    }

    fn execution_store(&self) -> &dyn ExecutionStore {
        self.components.execution_store.as_ref()
    }

    fn register(&self, instance: &mut ActionInstance) -> Result<ActionInstanceId, ActionsError> {
        if instance.group.trim().is_empty() {
            instance.group = DEFAULT_GROUP.to_string();
        }
        self.validate(instance)?;
        instance.last_updated = Some(Utc::now());
        let id = self
            .components
            .action_instance_store
            .create_action_instance(instance)?;
        if let Err(e) = self.schedule_trigger(instance) {
            warn!(action_instance_id = %id, error = %e, "trigger registration failed; removing instance");
            self.components
                .action_instance_store
                .delete_action_instance(instance)?;
            return Err(e);
        }
        info!(
            action_instance_id = %id,
            action_type = %instance.action_type,
            "action instance registered"
        );
        Ok(id)
    }

    fn update(&self, instance: &mut ActionInstance) -> Result<(), ActionsError> {
        let existing = self
            .components
            .action_instance_store
            .get_action_instance(&instance.id)?
            .ok_or_else(|| {
                ActionsError::Operation(format!(
                    "No existing actionInstance with id {} found for the update operation",
                    instance.id
                ))
            })?;
        instance.id = existing.id.clone();
        self.validate(instance)?;
        match self.outer.upgrade() {
            Some(outer) => {
                outer.delete(&existing)?;
                outer.register(instance)?;
            }
            None => {
                self.delete(&existing)?;
                self.register(instance)?;
            }
        }
        info!(action_instance_id = %instance.id, "action instance updated");
        Ok(())
    }

    fn validate(&self, instance: &ActionInstance) -> Result<(), ActionsError> {
        if instance.name.trim().is_empty() {
            return Err(ActionsError::Validation(
                "name for the actionInstance cannot be empty".to_string(),
            ));
        }
        if instance.group.contains(ID_SEPARATOR) {
            return Err(ActionsError::Validation(format!(
                "group '{}' must not contain '{}'",
                instance.group,
                ID_SEPARATOR
            )));
        }
        if instance.action_type.trim().is_empty() {
            return Err(ActionsError::Validation(
                "No Action type specified for the actionInstance".to_string(),
            ));
        }
        if !self.components.registry.has_action(&instance.action_type) {
            return Err(ActionsError::Validation(format!(
                "No action registered for type '{}'",
                instance.action_type
            )));
        }
        if let Some(listener_type) = &instance.execution_listener_type {
            if !self.components.registry.has_listener(listener_type) {
                return Err(ActionsError::Validation(format!(
                    "No execution listener registered for type '{}'",
                    listener_type
                )));
            }
        }
        if let Some(trigger) = &instance.trigger {
            trigger.validate()?;
        }
        Ok(())
    }

    fn enable(&self, instance: &mut ActionInstance) -> Result<(), ActionsError> {
        instance.disabled = false;
        instance.last_updated = Some(Utc::now());
        self.components
            .action_instance_store
            .update_action_instance(instance)?;
        if instance.trigger.is_some() {
            let scheduler = &self.components.trigger_scheduler;
            if scheduler.is_registered(&instance.id) {
                scheduler.enable_trigger(&instance.id)?;
            } else {
                self.schedule_trigger(instance)?;
            }
        }
        info!(action_instance_id = %instance.id, "action instance enabled");
        Ok(())
    }

    fn disable(&self, instance: &mut ActionInstance) -> Result<(), ActionsError> {
        instance.disabled = true;
        instance.last_updated = Some(Utc::now());
        self.components
            .action_instance_store
            .update_action_instance(instance)?;
        let scheduler = &self.components.trigger_scheduler;
        if scheduler.is_registered(&instance.id) {
            scheduler.disable_trigger(&instance.id)?;
        }
        info!(action_instance_id = %instance.id, "action instance disabled");
        Ok(())
    }

    fn delete(&self, instance: &ActionInstance) -> Result<(), ActionsError> {
        self.components
            .action_instance_store
            .delete_action_instance(instance)?;
        self.unschedule_trigger(&instance.group, &instance.id)?;
        info!(action_instance_id = %instance.id, "action instance deleted");
        Ok(())
    }

    fn execute(
        &self,
        instance: &ActionInstance,
        initiator: &str,
    ) -> Result<Option<Execution>, ActionsError> {
        if instance.disabled {
            debug!(action_instance_id = %instance.id, "instance disabled; not executing");
            return Ok(None);
        }

        let store = &self.components.execution_store;
        let mut execution =
            Execution::new(self.delegate_id.clone(), instance.id.clone()).with_initiator(initiator);
        let execution_id = store.create_execution(&mut execution)?;
        execution.log_info(format!("Created execution {}", execution_id));
        info!(
            execution_id = %execution_id,
            action_instance_id = %instance.id,
            initiator,
            "execution created"
        );

        let prior = incomplete_before(&store.get_executions(&instance.id)?, &execution);
        let had_prior = !prior.is_empty();
        match resolve_concurrency(instance, &execution, prior) {
            ConcurrencyDecision::Skip => {
                execution.log_info(
                    "Concurrent execution strategy is: REJECT, skipping execution",
                );
                let now = Utc::now();
                execution.start_time = Some(now);
                let status = execution.status_of(StatusKind::Skipped, rejected_message(instance));
                execution.finish(status, now);
                store.update_execution(&execution)?;
                info!(execution_id = %execution_id, "execution skipped");
                return Ok(Some(execution));
            }
            ConcurrencyDecision::ProceedAfterCancelling(previous) => {
                execution.log_info(format!(
                    "Concurrent execution strategy is: REPLACE, cancelling {} prior execution(s)",
                    previous.len()
                ));
                let outer = self.outer.upgrade();
                for prior_execution in &previous {
                    let cancelled = match &outer {
                        Some(outer) => outer.cancel(prior_execution, instance),
                        None => self.cancel(prior_execution, instance),
                    };
                    if let Err(e) = cancelled {
                        warn!(
                            execution_id = %prior_execution.id,
                            error = %e,
                            "failed to cancel replaced execution"
                        );
                    }
                }
            }
            ConcurrencyDecision::Proceed if had_prior => {
                execution.log_info("Concurrent execution strategy is: ALLOW, allowing execution");
            }
            ConcurrencyDecision::Proceed => {}
        }

        let action = match self.components.registry.new_action(&instance.action_type) {
            Ok(action) => action,
            Err(e) => {
                self.fail_execution(
                    &mut execution,
                    format!(
                        "Exception occurred while executing action {}: {}",
                        instance.action_type, e
                    ),
                )?;
                return Ok(Some(execution));
            }
        };
        let listener = self.new_listener(instance);

        execution.log_info("Submitting execution to the runtime");
        if let Err(e) = self
            .runtime
            .submit_run(action, listener, instance.clone(), execution.clone())
        {
            self.fail_execution(
                &mut execution,
                format!(
                    "Exception occurred while executing action {}: {}",
                    instance.action_type, e
                ),
            )?;
            return Err(e);
        }
        Ok(Some(execution))
    }

    fn cancel(&self, execution: &Execution, instance: &ActionInstance) -> Result<(), ActionsError> {
        self.cancel_local(execution, instance)
    }
}

impl std::fmt::Debug for LocalOperationsDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalOperationsDelegate")
            .field("delegate_id", &self.delegate_id)
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}
