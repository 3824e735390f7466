//! Clustered operations delegate: the local delegate plus lifecycle fan-out and an
//! execution lease.
//!
//! Each mutating operation runs locally first, then tells the other nodes through the
//! mediator. Executes take the mediator's lease so that a trigger firing on every node
//! produces one execution.

use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use cadence_execution_runtime::{
    ActionOperations, DelegateComponents, LocalOperationsDelegate, RuntimeConfig,
};
use cadence_kernel::{
    ActionInstance, ActionInstanceId, ActionInstanceStore, ActionsError, Execution, ExecutionStore,
};

use crate::agents::{ActionStatusPollingAgent, ExecutionStatusPollingAgent, SeenSet};
use crate::listeners::{DefaultActionStatusChangeListener, DefaultExecutionStatusChangeListener};
use crate::mediator::{ActionInstanceEvent, ActionInstanceMessage, ClusterMediator, ExecutionMessage};

pub struct ClusteredOperationsDelegate {
    local: Arc<LocalOperationsDelegate>,
    mediator: Arc<dyn ClusterMediator>,
    action_agent: Arc<ActionStatusPollingAgent>,
    execution_agent: Arc<ExecutionStatusPollingAgent>,
    config: RuntimeConfig,
}

impl ClusteredOperationsDelegate {
    pub fn new(
        delegate_id: impl Into<String>,
        components: DelegateComponents,
        mediator: Arc<dyn ClusterMediator>,
        config: &RuntimeConfig,
    ) -> Arc<Self> {
        let delegate_id = delegate_id.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let outer: Weak<dyn ActionOperations> = weak.clone();
            let local = Arc::new(LocalOperationsDelegate::with_outer(
                delegate_id,
                components,
                config,
                outer,
            ));
            // Seen ids must outlive the messages they guard.
            let seen_ttl = config.message_retention * 2;
            let action_agent = Arc::new(ActionStatusPollingAgent::new(
                mediator.clone(),
                Arc::new(DefaultActionStatusChangeListener::new(local.clone())),
                SeenSet::new(config.seen_set_capacity, seen_ttl),
            ));
            let execution_agent = Arc::new(ExecutionStatusPollingAgent::new(
                mediator.clone(),
                Arc::new(DefaultExecutionStatusChangeListener::new(
                    local.clone(),
                    mediator.clone(),
                )),
                SeenSet::new(config.seen_set_capacity, seen_ttl),
            ));
            Self {
                local,
                mediator,
                action_agent,
                execution_agent,
                config: config.clone(),
            }
        })
    }

    pub fn local(&self) -> &Arc<LocalOperationsDelegate> {
        &self.local
    }

    pub fn mediator(&self) -> &Arc<dyn ClusterMediator> {
        &self.mediator
    }

    pub fn action_agent(&self) -> &Arc<ActionStatusPollingAgent> {
        &self.action_agent
    }

    pub fn execution_agent(&self) -> &Arc<ExecutionStatusPollingAgent> {
        &self.execution_agent
    }

    fn broadcast(&self, action_instance_id: &str, status: ActionInstanceEvent) -> Result<(), ActionsError> {
        self.mediator
            .send_action_message(ActionInstanceMessage::new(action_instance_id, status))?;
        debug!(action_instance_id, %status, "lifecycle message sent");
        Ok(())
    }
}

impl ActionOperations for ClusteredOperationsDelegate {
    fn initialize(&self) -> Result<(), ActionsError> {
        self.local.initialize()?;
        self.action_agent.start(self.config.action_poll_interval)?;
        self.execution_agent
            .start(self.config.execution_poll_interval)?;
        info!(delegate_id = %self.local.delegate_id(), "clustered operations delegate initialized");
        Ok(())
    }

    fn destroy(&self) -> Result<(), ActionsError> {
        self.action_agent.shutdown();
        self.execution_agent.shutdown();
        self.local.destroy()?;
        info!(delegate_id = %self.local.delegate_id(), "clustered operations delegate destroyed");
        Ok(())
    }

    fn is_clustered(&self) -> bool {
        true
    }

    fn action_instance_store(&self) -> &dyn ActionInstanceStore {
        self.local.action_instance_store()
    }

    fn execution_store(&self) -> &dyn ExecutionStore {
        self.local.execution_store()
    }

    fn register(&self, instance: &mut ActionInstance) -> Result<ActionInstanceId, ActionsError> {
        let id = self.local.register(instance)?;
        self.broadcast(&id, ActionInstanceEvent::Created)?;
        Ok(id)
    }

    fn update(&self, instance: &mut ActionInstance) -> Result<(), ActionsError> {
        self.local.update(instance)
    }

    fn validate(&self, instance: &ActionInstance) -> Result<(), ActionsError> {
        self.local.validate(instance)
    }

    fn enable(&self, instance: &mut ActionInstance) -> Result<(), ActionsError> {
        self.local.enable(instance)?;
        self.broadcast(&instance.id, ActionInstanceEvent::Enabled)
    }

    fn disable(&self, instance: &mut ActionInstance) -> Result<(), ActionsError> {
        self.local.disable(instance)?;
        self.broadcast(&instance.id, ActionInstanceEvent::Disabled)
    }

    fn delete(&self, instance: &ActionInstance) -> Result<(), ActionsError> {
        self.local.delete(instance)?;
        self.broadcast(&instance.id, ActionInstanceEvent::Deleted)
    }

    fn execute(
        &self,
        instance: &ActionInstance,
        initiator: &str,
    ) -> Result<Option<Execution>, ActionsError> {
        let lease_ttl = self.config.lease_ttl.as_secs();
        match self.mediator.should_execute_action(&instance.id, lease_ttl) {
            Ok(true) => {}
            Ok(false) => {
                debug!(action_instance_id = %instance.id, "execution lease held elsewhere");
                return Ok(None);
            }
            Err(e) => {
                warn!(action_instance_id = %instance.id, error = %e, "lease check failed; not executing");
                return Ok(None);
            }
        }
        let execution = self.local.execute(instance, initiator)?;
        if let Some(execution) = &execution {
            if let Err(e) = self.mediator.record_execution(execution) {
                warn!(execution_id = %execution.id, error = %e, "failed to record execution");
            }
        }
        Ok(execution)
    }

    fn cancel(&self, execution: &Execution, instance: &ActionInstance) -> Result<(), ActionsError> {
        let local = match self
            .mediator
            .is_executing_action(&execution.id, &instance.id)
        {
            Ok(local) => local,
            Err(e) => {
                warn!(execution_id = %execution.id, error = %e, "ownership check failed; forwarding cancel");
                false
            }
        };
        if local {
            return self.local.cancel_local(execution, instance);
        }
        self.mediator
            .send_execution_message(ExecutionMessage::canceled(&execution.id, &instance.id))?;
        info!(
            execution_id = %execution.id,
            action_instance_id = %instance.id,
            "cancel forwarded to the cluster"
        );
        Ok(())
    }
}
