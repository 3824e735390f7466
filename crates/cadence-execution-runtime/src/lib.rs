//! Cadence execution runtime: the worker pools that run actions, trigger scheduling, and
//! the single-node operations delegate.

pub mod config;
pub mod executor;
pub mod local;
pub mod operations;
pub mod trigger_scheduler;

pub use config::RuntimeConfig;
pub use executor::ExecutionRuntime;
pub use local::{DelegateComponents, LocalOperationsDelegate};
pub use operations::{ActionOperations, DEFAULT_INITIATOR, SCHEDULED_TRIGGER_INITIATOR};
pub use trigger_scheduler::{
    LocalTriggerScheduler, TriggerError, TriggerFireHandler, TriggerScheduler,
};
