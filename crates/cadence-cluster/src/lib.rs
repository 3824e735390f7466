//! Cadence cluster support: the mediator contract nodes talk through, the clustered
//! operations delegate and the polling agents that keep every node's triggers and
//! cancellations in step.

pub mod agents;
pub mod delegate;
pub mod in_memory;
pub mod lease;
pub mod listeners;
pub mod mediator;

pub use agents::{
    ActionStatusPollingAgent, ExecutionStatusPollingAgent, PollReport, PollingAgent, SeenSet,
};
pub use delegate::ClusteredOperationsDelegate;
pub use in_memory::{ClusterBus, InMemoryClusterMediator, DEFAULT_EXECUTING_CAPACITY};
pub use lease::{LeaseManager, LeaseRecord, LeaseTable, LeaseTickResult};
pub use listeners::{
    ActionStatusChangeListener, DefaultActionStatusChangeListener,
    DefaultExecutionStatusChangeListener, ExecutionStatusChangeListener,
};
pub use mediator::{
    ActionInstanceEvent, ActionInstanceMessage, ClusterMediator, ExecutionEvent, ExecutionMessage,
};
