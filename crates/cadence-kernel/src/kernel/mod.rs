//! Cadence kernel: the action, execution and status model.
//!
//! Everything here is synchronous and runtime-agnostic apart from the [Action] trait,
//! which is async because actions run on the execution runtime's worker tasks.

pub mod action;
pub mod concurrency;
pub mod error;
pub mod execution;
pub mod execution_log;
pub mod identity;
pub mod in_memory_store;
pub mod instance;
pub mod registry;
pub mod status;
pub mod store;
pub mod trigger;

pub use action::{
    Action, ActionContext, ActionResult, ExecutionListener, NoopExecutionListener,
};
pub use concurrency::{
    incomplete_before, rejected_message, resolve_concurrency, ConcurrencyDecision,
};
pub use error::{ActionError, ActionsError};
pub use execution::Execution;
pub use execution_log::{ExecutionLogger, LogEntry, LogLevel};
pub use identity::{
    create_id, extract_group_from_id, is_id_format, next_created_time, ActionInstanceId,
    CreatedTime, ExecutionId, ExecutorId, DEFAULT_GROUP, ID_SEPARATOR,
};
pub use in_memory_store::{InMemoryActionInstanceStore, InMemoryExecutionStore};
pub use instance::{ActionInstance, ConcurrentExecutionStrategy, Context};
pub use registry::{ActionFactory, ActionRegistry, ListenerFactory};
pub use status::{Status, StatusKind};
pub use store::{ActionInstanceStore, ExecutionStore};
pub use trigger::{IntervalUnit, IsoInterval, Trigger};
