//! Execution runtime: runs actions on a bounded worker pool and records terminal status.
//!
//! Every run persists IN_PROGRESS before the action starts and exactly one terminal
//! status afterwards. Cancellation and timeout both signal the action's
//! [CancellationToken]; the worker drops the action future at its next await point, but
//! code that never yields keeps running after its execution is already terminal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cadence_kernel::{
    Action, ActionContext, ActionError, ActionInstance, ActionsError, Execution,
    ExecutionListener, ExecutionLogger, ExecutionId, ExecutionStore, StatusKind,
};

/// How the worker ended, before it is mapped to a terminal status.
enum RunOutcome {
    Finished(Option<StatusKind>),
    Failed(ActionError),
    TimedOut(u64),
    Cancelled,
}

impl RunOutcome {
    fn from_join(joined: Result<Option<Result<Option<StatusKind>, ActionError>>, JoinError>) -> Self {
        match joined {
            Ok(Some(Ok(kind))) => RunOutcome::Finished(kind),
            Ok(Some(Err(err))) => RunOutcome::Failed(err),
            Ok(None) => RunOutcome::Cancelled,
            Err(err) if err.is_cancelled() => RunOutcome::Cancelled,
            Err(err) => RunOutcome::Failed(ActionError::new(format!("action panicked: {}", err))),
        }
    }
}

/// Bounded execute and cancel pools over tokio tasks, plus the live cancellation tokens.
#[derive(Clone)]
pub struct ExecutionRuntime {
    execution_store: Arc<dyn ExecutionStore>,
    execute_permits: Arc<Semaphore>,
    cancel_permits: Arc<Semaphore>,
    tokens: Arc<Mutex<HashMap<ExecutionId, CancellationToken>>>,
}

impl ExecutionRuntime {
    pub fn new(
        execution_store: Arc<dyn ExecutionStore>,
        thread_pool_size: usize,
        cancel_pool_size: usize,
    ) -> Self {
        Self {
            execution_store,
            execute_permits: Arc::new(Semaphore::new(thread_pool_size.max(1))),
            cancel_permits: Arc::new(Semaphore::new(cancel_pool_size.max(1))),
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of queued or running executions that still hold a cancellation token.
    pub fn active_executions(&self) -> usize {
        self.lock_tokens().len()
    }

    pub fn is_running(&self, execution_id: &str) -> bool {
        self.lock_tokens().contains_key(execution_id)
    }

    /// Queues `run` on the execute pool. Requires a tokio runtime.
    ///
    /// The cancellation token is registered before the task waits for a permit, so a
    /// cancel that lands while the execution is queued keeps it from ever starting.
    pub fn submit_run(
        &self,
        action: Arc<dyn Action>,
        listener: Arc<dyn ExecutionListener>,
        instance: ActionInstance,
        execution: Execution,
    ) -> Result<JoinHandle<Execution>, ActionsError> {
        let handle = current_handle()?;
        let token = self.register_token(&execution.id);
        let runtime = self.clone();
        Ok(handle.spawn(async move {
            let _permit = match runtime.execute_permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    runtime.lock_tokens().remove(&execution.id);
                    error!(execution_id = %execution.id, error = %e, "execute pool closed");
                    return execution;
                }
            };
            if let Some(terminal) = runtime.terminal_before_start(&token, &execution) {
                runtime.lock_tokens().remove(&execution.id);
                return terminal;
            }
            runtime
                .run_with_token(action, listener, instance, execution, token)
                .await
        }))
    }

    /// Queues `cancel` on the cancel pool. Requires a tokio runtime.
    pub fn submit_cancel(
        &self,
        listener: Arc<dyn ExecutionListener>,
        instance: ActionInstance,
        execution: Execution,
    ) -> Result<JoinHandle<Execution>, ActionsError> {
        let handle = current_handle()?;
        let runtime = self.clone();
        Ok(handle.spawn(async move {
            let _permit = match runtime.cancel_permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(execution_id = %execution.id, error = %e, "cancel pool closed");
                    return execution;
                }
            };
            runtime.cancel(listener, instance, execution).await
        }))
    }

    /// Runs one execution to a terminal status and returns the persisted record.
    pub async fn run(
        &self,
        action: Arc<dyn Action>,
        listener: Arc<dyn ExecutionListener>,
        instance: ActionInstance,
        execution: Execution,
    ) -> Execution {
        let token = self.register_token(&execution.id);
        self.run_with_token(action, listener, instance, execution, token)
            .await
    }

    async fn run_with_token(
        &self,
        action: Arc<dyn Action>,
        listener: Arc<dyn ExecutionListener>,
        instance: ActionInstance,
        mut execution: Execution,
        token: CancellationToken,
    ) -> Execution {
        let context = instance.context();
        let action_name = instance.action_type.clone();

        notify(listener.on_start(&context, &execution), "on_start", &execution.id);

        let logger = ExecutionLogger::from_entries(std::mem::take(&mut execution.log));
        execution.start_time = Some(Utc::now());
        execution.status = Some(execution.status_of(StatusKind::InProgress, "Execution started"));
        logger.info(format!("Executing action {}", action_name));
        self.persist(&mut execution, &logger);

        let action_ctx =
            ActionContext::new(context.clone(), execution.id.clone(), logger.clone(), token.clone());
        let worker_token = token.clone();
        let mut worker = tokio::spawn(async move {
            tokio::select! {
                result = action.execute(&action_ctx) => Some(result),
                _ = worker_token.cancelled() => None,
            }
        });

        let outcome = match instance.timeout_seconds() {
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), &mut worker).await {
                    Ok(joined) => RunOutcome::from_join(joined),
                    Err(_) => {
                        token.cancel();
                        RunOutcome::TimedOut(secs)
                    }
                }
            }
            None => RunOutcome::from_join((&mut worker).await),
        };
        self.lock_tokens().remove(&execution.id);

        let now = Utc::now();
        match outcome {
            RunOutcome::Finished(kind) => {
                let kind = match kind {
                    Some(kind) if kind.is_complete() => kind,
                    Some(kind) => {
                        warn!(
                            execution_id = %execution.id,
                            status = %kind,
                            "action reported a non-terminal status; recording COMPLETED"
                        );
                        StatusKind::Completed
                    }
                    None => StatusKind::Completed,
                };
                logger.info(format!("Action {} finished with status {}", action_name, kind));
                let status = execution.status_of(kind, format!("Action {} finished", action_name));
                execution.finish(status, now);
                self.persist(&mut execution, &logger);
                info!(execution_id = %execution.id, status = %kind, "execution finished");
                notify(listener.on_complete(&context, &execution), "on_complete", &execution.id);
            }
            RunOutcome::TimedOut(secs) => {
                let message = format!("Action {} timed out after {} seconds", action_name, secs);
                logger.error(message.clone());
                let status = execution.status_of(StatusKind::TimedOut, message);
                execution.finish(status, now);
                self.persist(&mut execution, &logger);
                warn!(execution_id = %execution.id, timeout_secs = secs, "execution timed out");
                notify(listener.on_error(&context, &execution), "on_error", &execution.id);
            }
            RunOutcome::Cancelled => {
                let message = format!("Action {} has been cancelled", action_name);
                logger.info(message.clone());
                let status = execution.status_of(StatusKind::Cancelled, message);
                execution.finish(status, now);
                self.persist(&mut execution, &logger);
                info!(execution_id = %execution.id, "execution cancelled");
            }
            RunOutcome::Failed(err) => {
                let kind = err
                    .status
                    .filter(|kind| kind.is_complete())
                    .unwrap_or(StatusKind::Failed);
                let message =
                    format!("Exception occurred in action {}: {}", action_name, err.message);
                logger.error(message.clone());
                let status = execution.status_of(kind, message);
                execution.finish(status, now);
                self.persist(&mut execution, &logger);
                warn!(execution_id = %execution.id, status = %kind, error = %err, "execution failed");
                notify(listener.on_error(&context, &execution), "on_error", &execution.id);
            }
        }
        execution
    }

    /// Signals a live execution and records it CANCELLED.
    ///
    /// Re-reads the row first; an execution that already reached a terminal status is
    /// returned untouched.
    pub async fn cancel(
        &self,
        listener: Arc<dyn ExecutionListener>,
        instance: ActionInstance,
        execution: Execution,
    ) -> Execution {
        let mut execution = match self.execution_store.get_execution(&execution.id) {
            Ok(Some(latest)) => latest,
            Ok(None) => execution,
            Err(e) => {
                warn!(execution_id = %execution.id, error = %e, "could not reload execution before cancel");
                execution
            }
        };
        if execution.is_complete() {
            debug!(execution_id = %execution.id, "execution already terminal; nothing to cancel");
            return execution;
        }

        notify(
            listener.before_cancel(&instance.context(), &execution),
            "before_cancel",
            &execution.id,
        );
        let token = self.lock_tokens().remove(&execution.id);
        match token {
            Some(token) => token.cancel(),
            None => debug!(execution_id = %execution.id, "no live worker for execution"),
        }

        let message = format!("Action {} has been cancelled", instance.action_type);
        execution.log_info(message.clone());
        let status = execution.status_of(StatusKind::Cancelled, message);
        execution.finish(status, Utc::now());
        if let Err(e) = self.execution_store.update_execution(&execution) {
            error!(execution_id = %execution.id, error = %e, "failed to persist cancellation");
        }
        info!(execution_id = %execution.id, "execution cancelled on request");
        execution
    }

    fn register_token(&self, execution_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock_tokens()
            .insert(execution_id.to_string(), token.clone());
        debug!(execution_id, "registered cancellation token");
        token
    }

    /// The stored record when the execution was cancelled or finished while queued.
    fn terminal_before_start(
        &self,
        token: &CancellationToken,
        execution: &Execution,
    ) -> Option<Execution> {
        let stored = match self.execution_store.get_execution(&execution.id) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(execution_id = %execution.id, error = %e, "could not reload queued execution");
                None
            }
        };
        match stored {
            Some(latest) if latest.is_complete() => {
                info!(execution_id = %latest.id, "execution reached a terminal status while queued; not starting");
                Some(latest)
            }
            _ if token.is_cancelled() => {
                info!(execution_id = %execution.id, "execution cancelled while queued; not starting");
                Some(execution.clone())
            }
            _ => None,
        }
    }

    fn persist(&self, execution: &mut Execution, logger: &ExecutionLogger) {
        execution.log = logger.snapshot();
        if let Err(e) = self.execution_store.update_execution(execution) {
            error!(execution_id = %execution.id, error = %e, "failed to persist execution");
        }
    }

    fn lock_tokens(&self) -> std::sync::MutexGuard<'_, HashMap<ExecutionId, CancellationToken>> {
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ExecutionRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRuntime")
            .field("available_execute_permits", &self.execute_permits.available_permits())
            .field("available_cancel_permits", &self.cancel_permits.available_permits())
            .field("active_executions", &self.active_executions())
            .finish_non_exhaustive()
    }
}

fn current_handle() -> Result<tokio::runtime::Handle, ActionsError> {
    tokio::runtime::Handle::try_current()
        .map_err(|e| ActionsError::Operation(format!("no tokio runtime available: {}", e)))
}

fn notify(result: Result<(), ActionError>, callback: &str, execution_id: &str) {
    if let Err(e) = result {
        warn!(execution_id, callback, error = %e, "execution listener failed");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use cadence_kernel::{
        ActionResult, Context, InMemoryExecutionStore, NoopExecutionListener, Status,
    };

    struct Returns(ActionResult);

    #[async_trait]
    impl Action for Returns {
        async fn execute(&self, ctx: &ActionContext) -> ActionResult {
            ctx.logger.info("working");
            self.0.clone()
        }
    }

    struct Sleeps(Duration);

    #[async_trait]
    impl Action for Sleeps {
        async fn execute(&self, _ctx: &ActionContext) -> ActionResult {
            tokio::time::sleep(self.0).await;
            Ok(None)
        }
    }

    struct Panics;

    #[async_trait]
    impl Action for Panics {
        async fn execute(&self, _ctx: &ActionContext) -> ActionResult {
            panic!("boom");
        }
    }

    #[derive(Clone, Default)]
    struct FakeListener {
        calls: Arc<Mutex<Vec<String>>>,
        fail_on_start: bool,
    }

    impl FakeListener {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls").clone()
        }

        fn record(&self, name: &str, execution: &Execution) {
            let status = execution
                .status_kind()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "-".to_string());
            self.calls
                .lock()
                .expect("calls")
                .push(format!("{}:{}", name, status));
        }
    }

    impl ExecutionListener for FakeListener {
        fn on_start(&self, _context: &Context, execution: &Execution) -> Result<(), ActionError> {
            self.record("start", execution);
            if self.fail_on_start {
                return Err(ActionError::new("listener down"));
            }
            Ok(())
        }

        fn on_complete(&self, _context: &Context, execution: &Execution) -> Result<(), ActionError> {
            self.record("complete", execution);
            Ok(())
        }

        fn on_error(&self, _context: &Context, execution: &Execution) -> Result<(), ActionError> {
            self.record("error", execution);
            Ok(())
        }

        fn before_cancel(&self, _context: &Context, execution: &Execution) -> Result<(), ActionError> {
            self.record("before_cancel", execution);
            Ok(())
        }
    }

    fn setup(timeout_seconds: i64) -> (Arc<InMemoryExecutionStore>, ExecutionRuntime, ActionInstance, Execution) {
        let store = Arc::new(InMemoryExecutionStore::new());
        let runtime = ExecutionRuntime::new(store.clone(), 4, 2);
        let instance = ActionInstance::new("job", "test")
            .with_id("g:1")
            .with_execution_timeout_seconds(timeout_seconds);
        let mut execution = Execution::new("node", "g:1").with_initiator("tester");
        store.create_execution(&mut execution).expect("create");
        (store, runtime, instance, execution)
    }

    fn stored(store: &InMemoryExecutionStore, id: &str) -> Execution {
        store.get_execution(id).expect("get").expect("present")
    }

    #[tokio::test]
    async fn successful_run_records_completed_and_notifies_listener() {
        let (store, runtime, instance, execution) = setup(-1);
        let listener = FakeListener::default();
        let done = runtime
            .run(Arc::new(Returns(Ok(None))), Arc::new(listener.clone()), instance, execution)
            .await;

        assert_eq!(done.status_kind(), Some(StatusKind::Completed));
        assert!(done.start_time.is_some() && done.end_time.is_some());
        let persisted = stored(&store, &done.id);
        assert_eq!(persisted.status_kind(), Some(StatusKind::Completed));
        assert_eq!(
            persisted.status.as_ref().and_then(|s| s.initiator.as_deref()),
            Some("tester")
        );
        assert!(persisted.log.iter().any(|entry| entry.message == "working"));
        assert_eq!(listener.calls(), vec!["start:-", "complete:COMPLETED"]);
        assert_eq!(runtime.active_executions(), 0);
    }

    #[tokio::test]
    async fn action_chosen_status_and_error_status_are_honoured() {
        let (store, runtime, instance, execution) = setup(-1);
        let done = runtime
            .run(
                Arc::new(Returns(Ok(Some(StatusKind::Skipped)))),
                Arc::new(NoopExecutionListener),
                instance.clone(),
                execution,
            )
            .await;
        assert_eq!(stored(&store, &done.id).status_kind(), Some(StatusKind::Skipped));

        let mut second = Execution::new("node", "g:1");
        store.create_execution(&mut second).expect("create");
        let done = runtime
            .run(
                Arc::new(Returns(Err(ActionError::with_status(StatusKind::Cancelled, "stop")))),
                Arc::new(NoopExecutionListener),
                instance,
                second,
            )
            .await;
        assert_eq!(done.status_kind(), Some(StatusKind::Cancelled));
    }

    #[tokio::test]
    async fn failure_records_failed_with_message() {
        let (store, runtime, instance, execution) = setup(-1);
        let listener = FakeListener {
            fail_on_start: true,
            ..FakeListener::default()
        };
        let done = runtime
            .run(
                Arc::new(Returns(Err(ActionError::new("disk full")))),
                Arc::new(listener.clone()),
                instance,
                execution,
            )
            .await;
        let persisted = stored(&store, &done.id);
        assert_eq!(persisted.status_kind(), Some(StatusKind::Failed));
        assert_eq!(
            persisted.status.and_then(|s| s.message).as_deref(),
            Some("Exception occurred in action test: disk full")
        );
        assert_eq!(listener.calls(), vec!["start:-", "error:FAILED"]);
    }

    #[tokio::test]
    async fn panic_in_action_is_recorded_as_failure() {
        let (store, runtime, instance, execution) = setup(-1);
        let done = runtime
            .run(Arc::new(Panics), Arc::new(NoopExecutionListener), instance, execution)
            .await;
        assert_eq!(stored(&store, &done.id).status_kind(), Some(StatusKind::Failed));
    }

    #[tokio::test]
    async fn slow_action_times_out() {
        let (store, runtime, instance, execution) = setup(1);
        let listener = FakeListener::default();
        let done = runtime
            .run(
                Arc::new(Sleeps(Duration::from_secs(30))),
                Arc::new(listener.clone()),
                instance,
                execution,
            )
            .await;
        let persisted = stored(&store, &done.id);
        assert_eq!(persisted.status_kind(), Some(StatusKind::TimedOut));
        assert_eq!(
            persisted.status.and_then(|s| s.message).as_deref(),
            Some("Action test timed out after 1 seconds")
        );
        assert_eq!(listener.calls(), vec!["start:-", "error:TIMED_OUT"]);

        let started = persisted.start_time.expect("start time");
        let ended = persisted.end_time.expect("end time");
        let elapsed = ended - started;
        assert!(elapsed >= chrono::Duration::seconds(1), "ended early: {}", elapsed);
        assert!(elapsed < chrono::Duration::milliseconds(1500), "ended late: {}", elapsed);
    }

    #[tokio::test]
    async fn non_positive_timeout_never_times_out() {
        let (store, runtime, instance, execution) = setup(0);
        let done = runtime
            .run(
                Arc::new(Sleeps(Duration::from_millis(1200))),
                Arc::new(NoopExecutionListener),
                instance,
                execution,
            )
            .await;
        assert_eq!(stored(&store, &done.id).status_kind(), Some(StatusKind::Completed));
    }

    #[tokio::test]
    async fn cancel_signals_running_worker() {
        let (store, runtime, instance, execution) = setup(-1);
        let execution_id = execution.id.clone();
        let handle = runtime
            .submit_run(
                Arc::new(Sleeps(Duration::from_secs(30))),
                Arc::new(NoopExecutionListener),
                instance.clone(),
                execution,
            )
            .expect("submit");

        for _ in 0..100 {
            if stored(&store, &execution_id).status_kind() == Some(StatusKind::InProgress) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(runtime.is_running(&execution_id));

        let listener = FakeListener::default();
        let current = stored(&store, &execution_id);
        let cancelled = runtime
            .submit_cancel(Arc::new(listener.clone()), instance, current)
            .expect("submit cancel")
            .await
            .expect("cancel task");
        assert_eq!(cancelled.status_kind(), Some(StatusKind::Cancelled));
        assert_eq!(listener.calls(), vec!["before_cancel:IN_PROGRESS"]);

        let finished = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker stops")
            .expect("join");
        assert_eq!(finished.status_kind(), Some(StatusKind::Cancelled));
        assert_eq!(stored(&store, &execution_id).status_kind(), Some(StatusKind::Cancelled));
    }

    #[tokio::test]
    async fn execution_cancelled_while_queued_never_starts() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let runtime = ExecutionRuntime::new(store.clone(), 1, 1);
        let instance = ActionInstance::new("job", "test")
            .with_id("g:1")
            .with_execution_timeout_seconds(-1);
        let mut first = Execution::new("node", "g:1");
        store.create_execution(&mut first).expect("create");
        let mut second = Execution::new("node", "g:1");
        store.create_execution(&mut second).expect("create");

        let first_handle = runtime
            .submit_run(
                Arc::new(Sleeps(Duration::from_secs(30))),
                Arc::new(NoopExecutionListener),
                instance.clone(),
                first.clone(),
            )
            .expect("submit first");
        for _ in 0..100 {
            if stored(&store, &first.id).status_kind() == Some(StatusKind::InProgress) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored(&store, &first.id).status_kind(), Some(StatusKind::InProgress));

        let queued_listener = FakeListener::default();
        let second_handle = runtime
            .submit_run(
                Arc::new(Returns(Ok(None))),
                Arc::new(queued_listener.clone()),
                instance.clone(),
                second.clone(),
            )
            .expect("submit second");
        assert!(runtime.is_running(&second.id));

        let cancelled = runtime
            .cancel(Arc::new(NoopExecutionListener), instance.clone(), second.clone())
            .await;
        assert_eq!(cancelled.status_kind(), Some(StatusKind::Cancelled));

        runtime
            .cancel(Arc::new(NoopExecutionListener), instance, first.clone())
            .await;
        tokio::time::timeout(Duration::from_secs(5), first_handle)
            .await
            .expect("first stops")
            .expect("join first");
        let second_done = tokio::time::timeout(Duration::from_secs(5), second_handle)
            .await
            .expect("second resolves")
            .expect("join second");

        assert_eq!(second_done.status_kind(), Some(StatusKind::Cancelled));
        let persisted = stored(&store, &second.id);
        assert_eq!(persisted.status_kind(), Some(StatusKind::Cancelled));
        assert!(persisted.start_time.is_none());
        assert!(queued_listener.calls().is_empty());
        assert_eq!(runtime.active_executions(), 0);
    }

    #[tokio::test]
    async fn cancel_of_terminal_execution_is_a_no_op() {
        let (store, runtime, instance, mut execution) = setup(-1);
        execution.finish(Status::new(StatusKind::Completed), Utc::now());
        store.update_execution(&execution).expect("update");
        let listener = FakeListener::default();
        let result = runtime
            .cancel(Arc::new(listener.clone()), instance, execution.clone())
            .await;
        assert_eq!(result.status_kind(), Some(StatusKind::Completed));
        assert!(listener.calls().is_empty());
    }

    #[test]
    fn submit_without_runtime_is_an_operation_error() {
        let (_store, runtime, instance, execution) = setup(-1);
        let err = runtime
            .submit_run(
                Arc::new(Returns(Ok(None))),
                Arc::new(NoopExecutionListener),
                instance,
                execution,
            )
            .expect_err("no runtime");
        assert!(matches!(err, ActionsError::Operation(_)));
    }
}
