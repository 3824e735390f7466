mod common;

use cadence_runtime::{
    ActionInstance, ActionsOperator, ConcurrentExecutionStrategy, RuntimeConfig, StatusKind,
    DEFAULT_INITIATOR,
};

use common::{init_tracing, registry, wait_for_status};

fn operator() -> ActionsOperator {
    init_tracing();
    let operator = ActionsOperator::local(registry(), &RuntimeConfig::default());
    operator.initialize().expect("initialize");
    operator
}

#[tokio::test]
async fn reject_skips_while_an_execution_is_running() {
    let operator = operator();
    let mut instance = ActionInstance::new("report", "wait")
        .with_concurrent_execution_strategy(ConcurrentExecutionStrategy::Reject);
    let id = operator
        .register_action_instance(&mut instance)
        .expect("register");

    let first = operator
        .execute(&id, DEFAULT_INITIATOR)
        .expect("execute")
        .expect("started");
    wait_for_status(&operator, &first.id, StatusKind::InProgress).await;

    let second = operator
        .execute(&id, "alice")
        .expect("execute")
        .expect("recorded");
    let stored = wait_for_status(&operator, &second.id, StatusKind::Skipped).await;
    assert_eq!(stored.start_time, stored.end_time);
    let status = stored.status.expect("status");
    assert!(status
        .message
        .as_deref()
        .is_some_and(|m| m.contains("REJECT")));
    assert_eq!(status.initiator.as_deref(), Some("alice"));

    operator.cancel(&first.id).expect("cancel");
    let cancelled = wait_for_status(&operator, &first.id, StatusKind::Cancelled).await;
    assert!(cancelled.end_time.is_some());

    let third = operator
        .execute(&id, DEFAULT_INITIATOR)
        .expect("execute")
        .expect("started");
    wait_for_status(&operator, &third.id, StatusKind::InProgress).await;
    operator.cancel(&third.id).expect("cancel");
    wait_for_status(&operator, &third.id, StatusKind::Cancelled).await;
    operator.destroy().expect("destroy");
}

#[tokio::test]
async fn replace_cancels_the_running_execution() {
    let operator = operator();
    let mut instance = ActionInstance::new("sync", "wait")
        .with_concurrent_execution_strategy(ConcurrentExecutionStrategy::Replace);
    let id = operator
        .register_action_instance(&mut instance)
        .expect("register");

    let first = operator
        .execute(&id, DEFAULT_INITIATOR)
        .expect("execute")
        .expect("started");
    wait_for_status(&operator, &first.id, StatusKind::InProgress).await;

    let second = operator
        .execute(&id, DEFAULT_INITIATOR)
        .expect("execute")
        .expect("started");
    wait_for_status(&operator, &first.id, StatusKind::Cancelled).await;
    wait_for_status(&operator, &second.id, StatusKind::InProgress).await;

    let executions = operator.get_executions(&id).expect("list");
    assert_eq!(executions.len(), 2);
    assert_eq!(executions[0].id, first.id);

    operator.cancel(&second.id).expect("cancel");
    wait_for_status(&operator, &second.id, StatusKind::Cancelled).await;
    operator.destroy().expect("destroy");
}

#[tokio::test]
async fn allow_runs_executions_side_by_side() {
    let operator = operator();
    let mut instance = ActionInstance::new("fanout", "wait")
        .with_concurrent_execution_strategy(ConcurrentExecutionStrategy::Allow);
    let id = operator
        .register_action_instance(&mut instance)
        .expect("register");

    let mut running = Vec::new();
    for _ in 0..3 {
        let execution = operator
            .execute(&id, DEFAULT_INITIATOR)
            .expect("execute")
            .expect("started");
        running.push(execution.id);
    }
    for execution_id in &running {
        wait_for_status(&operator, execution_id, StatusKind::InProgress).await;
    }
    for execution_id in &running {
        operator.cancel(execution_id).expect("cancel");
        wait_for_status(&operator, execution_id, StatusKind::Cancelled).await;
    }
    operator.destroy().expect("destroy");
}

#[tokio::test]
async fn disabled_instance_does_not_execute_until_enabled() {
    let operator = operator();
    let mut instance = ActionInstance::new("paused", "quick");
    let id = operator
        .register_action_instance(&mut instance)
        .expect("register");

    let disabled = operator.disable_action_instance(&id).expect("disable");
    assert!(disabled.disabled);
    assert!(operator
        .execute(&id, DEFAULT_INITIATOR)
        .expect("execute")
        .is_none());

    operator.enable_action_instance(&id).expect("enable");
    let execution = operator
        .execute(&id, DEFAULT_INITIATOR)
        .expect("execute")
        .expect("started");
    wait_for_status(&operator, &execution.id, StatusKind::Completed).await;

    let deleted = operator.delete_action_instance(&id).expect("delete");
    assert_eq!(deleted.id, id);
    assert!(operator.get_action_instance(&id).expect("get").is_none());
    operator.destroy().expect("destroy");
}
