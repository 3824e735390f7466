mod common;

use std::sync::Arc;
use std::time::Duration;

use cadence_runtime::{
    ActionInstance, ActionOperations, ActionsOperator, ClusterBus, ClusterMediator,
    ClusteredOperationsDelegate, DelegateComponents, IntervalUnit, LocalTriggerScheduler,
    RuntimeConfig, StatusKind, Trigger, DEFAULT_INITIATOR,
};
use cadence_kernel::{
    ActionInstanceStore, ExecutionStore, InMemoryActionInstanceStore, InMemoryExecutionStore,
};

use common::{init_tracing, registry, wait_for_status};

struct Node {
    delegate: Arc<ClusteredOperationsDelegate>,
    operator: ActionsOperator,
}

fn cluster(size: usize) -> Vec<Node> {
    init_tracing();
    let config = RuntimeConfig::default()
        .with_action_poll_interval(Duration::from_millis(20))
        .with_execution_poll_interval(Duration::from_millis(20));
    let registry = registry();
    let bus = ClusterBus::new(config.message_retention);
    let instances: Arc<dyn ActionInstanceStore> = Arc::new(InMemoryActionInstanceStore::new());
    let executions: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
    (0..size)
        .map(|n| {
            let node_id = format!("node-{}", n);
            let components = DelegateComponents::in_memory(registry.clone(), &config)
                .with_action_instance_store(instances.clone())
                .with_execution_store(executions.clone())
                .with_trigger_scheduler(Arc::new(LocalTriggerScheduler::new()));
            let mediator: Arc<dyn ClusterMediator> = Arc::new(bus.join(node_id.clone()));
            let delegate =
                ClusteredOperationsDelegate::new(node_id, components, mediator, &config);
            let operator = ActionsOperator::new(delegate.clone());
            operator.initialize().expect("initialize");
            Node { delegate, operator }
        })
        .collect()
}

fn shutdown(nodes: &[Node]) {
    for node in nodes {
        node.operator.destroy().expect("destroy");
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn registration_reaches_every_node() {
    let nodes = cluster(3);
    let mut instance =
        ActionInstance::new("nightly", "quick").with_trigger(Trigger::cron("0 3 * * *"));
    let id = nodes[0]
        .operator
        .register_action_instance(&mut instance)
        .expect("register");
    assert!(nodes[0].operator.is_clustered());

    for node in &nodes {
        let scheduler = node.delegate.local().trigger_scheduler();
        assert!(eventually(|| scheduler.is_scheduled(&id)).await);
    }

    nodes[1]
        .operator
        .disable_action_instance(&id)
        .expect("disable");
    for node in &nodes {
        let scheduler = node.delegate.local().trigger_scheduler();
        assert!(eventually(|| !scheduler.is_scheduled(&id)).await);
    }

    nodes[2]
        .operator
        .delete_action_instance(&id)
        .expect("delete");
    for node in &nodes {
        let scheduler = node.delegate.local().trigger_scheduler();
        assert!(eventually(|| !scheduler.is_registered(&id)).await);
    }
    shutdown(&nodes);
}

#[tokio::test]
async fn only_one_node_executes_under_the_lease() {
    let nodes = cluster(2);
    let mut instance = ActionInstance::new("job", "wait");
    let id = nodes[0]
        .operator
        .register_action_instance(&mut instance)
        .expect("register");

    let started: Vec<_> = nodes
        .iter()
        .filter_map(|node| node.operator.execute(&id, DEFAULT_INITIATOR).expect("execute"))
        .collect();
    assert_eq!(started.len(), 1);
    assert_eq!(nodes[0].operator.get_executions(&id).expect("list").len(), 1);

    let owner = nodes
        .iter()
        .find(|node| node.delegate.local().delegate_id() == started[0].executor_id)
        .expect("owner");
    owner.operator.cancel(&started[0].id).expect("cancel");
    wait_for_status(&owner.operator, &started[0].id, StatusKind::Cancelled).await;
    shutdown(&nodes);
}

#[tokio::test]
async fn trigger_fires_on_every_node_but_runs_once() {
    let nodes = cluster(2);
    let trigger = Trigger::interval(1, IntervalUnit::Seconds, 2, None).expect("interval");
    let mut instance = ActionInstance::new("tick", "quick").with_trigger(trigger);
    let id = nodes[0]
        .operator
        .register_action_instance(&mut instance)
        .expect("register");
    let scheduler = nodes[1].delegate.local().trigger_scheduler();
    assert!(eventually(|| scheduler.is_scheduled(&id)).await);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let executions = nodes[1].operator.get_executions(&id).expect("list");
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].initiator.as_deref(), Some("ScheduledTrigger"));
    shutdown(&nodes);
}

#[tokio::test]
async fn cancel_on_a_non_owner_is_applied_by_the_owner() {
    let nodes = cluster(2);
    let mut instance = ActionInstance::new("long", "wait");
    let id = nodes[0]
        .operator
        .register_action_instance(&mut instance)
        .expect("register");
    let execution = nodes[0]
        .operator
        .execute(&id, DEFAULT_INITIATOR)
        .expect("execute")
        .expect("started");
    wait_for_status(&nodes[0].operator, &execution.id, StatusKind::InProgress).await;

    nodes[1].operator.cancel(&execution.id).expect("forward cancel");
    let cancelled = wait_for_status(&nodes[1].operator, &execution.id, StatusKind::Cancelled).await;
    assert_eq!(cancelled.executor_id, "node-0");
    assert!(nodes[0].delegate.is_clustered());
    shutdown(&nodes);
}
