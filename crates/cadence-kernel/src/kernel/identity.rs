//! Identity types for action instances and executions.
//!
//! Ids are scoped: an action instance id is `{group}:{uuid}` and an execution id is
//! `{action_instance_id}:{uuid}`, so the owning scope of any row can be recovered from
//! its id alone with [extract_group_from_id].

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Identifies a registered action instance (`{group}:{key}`).
pub type ActionInstanceId = String;

/// Identifies one execution (`{action_instance_id}:{key}`).
pub type ExecutionId = String;

/// Identifies a node or delegate instance that created an execution.
pub type ExecutorId = String;

/// Ordering key for executions; strictly increasing within a process.
pub type CreatedTime = u64;

/// Separator between the scope and the key of an id.
pub const ID_SEPARATOR: char = ':';

/// Group used when an action instance does not name one.
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

static LAST_CREATED_TIME: AtomicU64 = AtomicU64::new(0);

/// Builds a scoped id.
pub fn create_id(scope: &str, key: &str) -> String {
    format!("{}{}{}", scope, ID_SEPARATOR, key)
}

/// Builds a scoped id with a fresh v4 uuid as key.
pub fn new_scoped_id(scope: &str) -> String {
    create_id(scope, &uuid::Uuid::new_v4().to_string())
}

/// Returns the scope part of an id (everything before the last separator).
///
/// For an execution id this is the owning action instance id; for an action instance
/// id it is the group. Ids without a separator are their own scope.
pub fn extract_group_from_id(id: &str) -> &str {
    match id.rsplit_once(ID_SEPARATOR) {
        Some((scope, _)) => scope,
        None => id,
    }
}

/// Whether `id` already carries a scope.
pub fn is_id_format(id: &str) -> bool {
    id.contains(ID_SEPARATOR)
}

/// Returns the next ordering key.
///
/// Values are strictly increasing within a process. They start near wall-clock nanos so
/// rows written by a restarted process still sort after older ones, but they must only
/// be compared against each other, never against a clock.
pub fn next_created_time() -> CreatedTime {
    let now = Utc::now()
        .timestamp_nanos_opt()
        .map(|n| n.max(0) as u64)
        .unwrap_or(0);
    let mut last = LAST_CREATED_TIME.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_CREATED_TIME.compare_exchange_weak(
            last,
            next,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}
