#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;

use cadence_runtime::{
    Action, ActionContext, ActionRegistry, ActionResult, ActionsOperator, Execution, StatusKind,
};

static TRACING: Once = Once::new();

/// Installs a fmt subscriber once per test binary; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cadence=debug,warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Runs until cancelled.
pub struct WaitForCancel;

#[async_trait]
impl Action for WaitForCancel {
    async fn execute(&self, ctx: &ActionContext) -> ActionResult {
        ctx.logger.info("waiting for cancellation");
        ctx.cancelled().await;
        Ok(None)
    }
}

/// Finishes immediately.
pub struct Quick;

#[async_trait]
impl Action for Quick {
    async fn execute(&self, ctx: &ActionContext) -> ActionResult {
        ctx.logger.info("done");
        Ok(None)
    }
}

pub fn registry() -> Arc<ActionRegistry> {
    let registry = Arc::new(ActionRegistry::new());
    registry
        .register_action("wait", || Arc::new(WaitForCancel) as Arc<dyn Action>)
        .expect("register wait");
    registry
        .register_action("quick", || Arc::new(Quick) as Arc<dyn Action>)
        .expect("register quick");
    registry
}

/// Polls the operator's store until `execution_id` reaches `kind`.
pub async fn wait_for_status(
    operator: &ActionsOperator,
    execution_id: &str,
    kind: StatusKind,
) -> Execution {
    for _ in 0..500 {
        let execution = operator
            .get_execution(execution_id)
            .expect("get execution")
            .expect("execution stored");
        if execution.status_kind() == Some(kind) {
            return execution;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {} never reached {}", execution_id, kind);
}
