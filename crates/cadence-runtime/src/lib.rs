//! Cadence: a scheduled actions engine.
//!
//! Applications hold an [ActionsOperator]. It wraps either a single-node
//! [LocalOperationsDelegate] or a [ClusteredOperationsDelegate] that coordinates several
//! nodes through a [ClusterMediator].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cadence_runtime::{ActionRegistry, ActionsOperator, RuntimeConfig};
//!
//! # async fn demo() -> Result<(), cadence_runtime::ActionsError> {
//! let registry = Arc::new(ActionRegistry::new());
//! let operator = ActionsOperator::local(registry, &RuntimeConfig::from_env().unwrap_or_default());
//! operator.initialize()?;
//! # Ok(())
//! # }
//! ```

pub mod operator;

pub use operator::ActionsOperator;

pub use cadence_cluster::{
    ClusterBus, ClusterMediator, ClusteredOperationsDelegate, InMemoryClusterMediator,
};
pub use cadence_execution_runtime::{
    ActionOperations, DelegateComponents, LocalOperationsDelegate, LocalTriggerScheduler,
    RuntimeConfig, TriggerScheduler, DEFAULT_INITIATOR, SCHEDULED_TRIGGER_INITIATOR,
};
pub use cadence_kernel::{
    Action, ActionContext, ActionError, ActionInstance, ActionRegistry, ActionResult,
    ActionsError, ConcurrentExecutionStrategy, Context, Execution, ExecutionListener, Status,
    IntervalUnit, StatusKind, Trigger,
};
