//! Action and ExecutionListener: the capabilities users plug into the engine.
//!
//! Cancellation is cooperative. The runtime signals [ActionContext::cancellation_token]
//! on cancel and on timeout; an action that never reaches an `.await` and never checks
//! [ActionContext::is_cancelled] keeps running even though its execution is already
//! marked terminal.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::kernel::error::ActionError;
use crate::kernel::execution::Execution;
use crate::kernel::execution_log::ExecutionLogger;
use crate::kernel::identity::ExecutionId;
use crate::kernel::instance::Context;
use crate::kernel::status::StatusKind;

/// Outcome of an action. `Ok(Some(kind))` overrides the recorded terminal status.
pub type ActionResult = Result<Option<StatusKind>, ActionError>;

/// Execution context handed to a running action.
#[derive(Clone)]
pub struct ActionContext {
    pub context: Context,
    pub execution_id: ExecutionId,
    pub logger: ExecutionLogger,
    pub cancellation_token: CancellationToken,
}

impl ActionContext {
    pub fn new(
        context: Context,
        execution_id: impl Into<ExecutionId>,
        logger: ExecutionLogger,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            context,
            execution_id: execution_id.into(),
            logger,
            cancellation_token,
        }
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.context.parameters.get(key).map(String::as_str)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Completes when cancellation (or timeout) is signalled.
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("action_instance_id", &self.context.action_instance_id)
            .field("execution_id", &self.execution_id)
            .finish_non_exhaustive()
    }
}

/// User-supplied unit of work.
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, ctx: &ActionContext) -> ActionResult;

    /// Notification metadata; not interpreted by the engine.
    fn owners(&self) -> Vec<String> {
        Vec::new()
    }

    fn watchers(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Lifecycle callbacks around one execution.
///
/// Errors are logged by the runtime and never change the execution's state transition.
pub trait ExecutionListener: Send + Sync {
    fn on_start(&self, _context: &Context, _execution: &Execution) -> Result<(), ActionError> {
        Ok(())
    }

    fn on_complete(&self, _context: &Context, _execution: &Execution) -> Result<(), ActionError> {
        Ok(())
    }

    fn on_error(&self, _context: &Context, _execution: &Execution) -> Result<(), ActionError> {
        Ok(())
    }

    fn before_cancel(&self, _context: &Context, _execution: &Execution) -> Result<(), ActionError> {
        Ok(())
    }
}

/// Listener used when an instance names none.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopExecutionListener;

impl ExecutionListener for NoopExecutionListener {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Action for Echo {
        async fn execute(&self, ctx: &ActionContext) -> ActionResult {
            ctx.logger.info(format!(
                "echo {}",
                ctx.parameter("word").unwrap_or_default()
            ));
            if ctx.is_cancelled() {
                return Ok(Some(StatusKind::Cancelled));
            }
            Ok(None)
        }
    }

    fn ctx(token: CancellationToken) -> ActionContext {
        let mut context = Context::default();
        context.parameters.insert("word".into(), "hi".into());
        ActionContext::new(context, "g:1:e", ExecutionLogger::new(), token)
    }

    #[tokio::test]
    async fn action_sees_parameters_and_logger() {
        let ctx = ctx(CancellationToken::new());
        let result = Echo.execute(&ctx).await.expect("echo runs");
        assert!(result.is_none());
        assert_eq!(ctx.logger.snapshot()[0].message, "echo hi");
    }

    #[tokio::test]
    async fn action_observes_cancellation_token() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ctx(token);
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
        let result = Echo.execute(&ctx).await.expect("echo runs");
        assert_eq!(result, Some(StatusKind::Cancelled));
    }

    #[test]
    fn noop_listener_accepts_every_callback() {
        let listener = NoopExecutionListener;
        let execution = Execution::new("n", "g:1");
        let context = Context::default();
        assert!(listener.on_start(&context, &execution).is_ok());
        assert!(listener.on_complete(&context, &execution).is_ok());
        assert!(listener.on_error(&context, &execution).is_ok());
        assert!(listener.before_cancel(&context, &execution).is_ok());
    }
}
