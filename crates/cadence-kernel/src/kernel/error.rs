//! Error types shared by the Cadence crates.

use std::fmt;

use crate::kernel::status::StatusKind;

/// Structural errors surfaced synchronously to callers.
///
/// Failures of the action itself are never reported through this type; they end up as
/// a terminal status on the execution record.
#[derive(Debug, thiserror::Error)]
pub enum ActionsError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("ActionInstance not found: {0}")]
    ActionInstanceNotFound(String),
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("Operation error: {0}")]
    Operation(String),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Cluster error: {0}")]
    Cluster(String),
    #[error(
        "ActionsOperator instance is not initialized; call initialize() before using it"
    )]
    NotInitialized,
}

/// Error returned by an action or a listener.
///
/// `status` lets the action pick the terminal status recorded for the execution;
/// when absent the runtime records FAILED.
#[derive(Clone, Debug)]
pub struct ActionError {
    pub status: Option<StatusKind>,
    pub message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: StatusKind, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActionError {}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        ActionError::new(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        ActionError::new(message)
    }
}
