//! Concurrency policy: decide what a new execution does about in-flight ones.

use crate::kernel::execution::Execution;
use crate::kernel::instance::{ActionInstance, ConcurrentExecutionStrategy};

/// Outcome of [resolve_concurrency].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConcurrencyDecision {
    Proceed,
    /// Request cancellation of these executions, then proceed without waiting.
    ProceedAfterCancelling(Vec<Execution>),
    /// Mark the new execution SKIPPED and do not run it.
    Skip,
}

/// Executions of the same instance created before `current` that have not finished.
pub fn incomplete_before(executions: &[Execution], current: &Execution) -> Vec<Execution> {
    executions
        .iter()
        .filter(|e| e.id != current.id && e.is_before(current) && !e.is_complete())
        .cloned()
        .collect()
}

/// Decides how `new_execution` proceeds given the unfinished executions before it.
///
/// `incomplete_prior` is filtered again against `new_execution`, so callers may pass a
/// superset read from the store.
pub fn resolve_concurrency(
    instance: &ActionInstance,
    new_execution: &Execution,
    incomplete_prior: Vec<Execution>,
) -> ConcurrencyDecision {
    let incomplete_prior = incomplete_before(&incomplete_prior, new_execution);
    if incomplete_prior.is_empty() {
        return ConcurrencyDecision::Proceed;
    }
    match instance.concurrent_execution_strategy {
        ConcurrentExecutionStrategy::Allow => ConcurrencyDecision::Proceed,
        ConcurrentExecutionStrategy::Reject => ConcurrencyDecision::Skip,
        ConcurrentExecutionStrategy::Replace => {
            ConcurrencyDecision::ProceedAfterCancelling(incomplete_prior)
        }
    }
}

/// Message recorded on a skipped execution.
pub fn rejected_message(instance: &ActionInstance) -> String {
    format!(
        "ConcurrentExecutionStrategy for ActionInstance {} is REJECT and it has incomplete executions",
        instance
    )
}
