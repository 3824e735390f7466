//! Trigger scheduling contract and a tokio-driven local implementation.
//!
//! The scheduler owns no execution semantics: when a trigger fires it hands the
//! instance [Context] to a [TriggerFireHandler], which decides what to run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cadence_kernel::{ActionsError, Context, Trigger};

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("no trigger registered for action instance {0}")]
    NotFound(String),
    #[error("invalid trigger: {0}")]
    Invalid(String),
    #[error("trigger scheduler unavailable: {0}")]
    Unavailable(String),
}

impl From<TriggerError> for ActionsError {
    fn from(err: TriggerError) -> Self {
        ActionsError::Operation(err.to_string())
    }
}

/// Callback invoked on every trigger fire.
pub trait TriggerFireHandler: Send + Sync {
    fn fire(&self, context: Context);
}

/// Schedules triggers keyed by action instance id.
pub trait TriggerScheduler: Send + Sync {
    fn initialize(&self) -> Result<(), TriggerError> {
        Ok(())
    }

    /// Stops every registered trigger.
    fn destroy(&self) -> Result<(), TriggerError>;

    /// Registers (or replaces) the trigger of `action_instance_id`, enabled.
    fn register_trigger(
        &self,
        group: &str,
        action_instance_id: &str,
        trigger: &Trigger,
        context: Context,
        handler: Arc<dyn TriggerFireHandler>,
    ) -> Result<(), TriggerError>;

    fn enable_trigger(&self, action_instance_id: &str) -> Result<(), TriggerError>;

    fn disable_trigger(&self, action_instance_id: &str) -> Result<(), TriggerError>;

    fn delete_trigger(&self, group: &str, action_instance_id: &str) -> Result<(), TriggerError>;

    /// Registered, whether enabled or not.
    fn is_registered(&self, action_instance_id: &str) -> bool;

    /// Registered and enabled.
    fn is_scheduled(&self, action_instance_id: &str) -> bool;
}

struct ScheduledTrigger {
    group: String,
    enabled: Arc<AtomicBool>,
    fired: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

/// In-process scheduler: one tokio task per trigger sleeping until the next fire time.
///
/// Fires missed while a trigger is disabled are dropped, not replayed.
#[derive(Default)]
pub struct LocalTriggerScheduler {
    triggers: Mutex<HashMap<String, ScheduledTrigger>>,
}

impl LocalTriggerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fires delivered to the handler so far.
    pub fn fire_count(&self, action_instance_id: &str) -> Option<u64> {
        self.lock()
            .ok()?
            .get(action_instance_id)
            .map(|t| t.fired.load(Ordering::Acquire))
    }

    pub fn group_of(&self, action_instance_id: &str) -> Option<String> {
        self.lock()
            .ok()?
            .get(action_instance_id)
            .map(|t| t.group.clone())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, ScheduledTrigger>>, TriggerError> {
        self.triggers
            .lock()
            .map_err(|e| TriggerError::Unavailable(e.to_string()))
    }

    fn set_enabled(&self, action_instance_id: &str, enabled: bool) -> Result<(), TriggerError> {
        let triggers = self.lock()?;
        let scheduled = triggers
            .get(action_instance_id)
            .ok_or_else(|| TriggerError::NotFound(action_instance_id.to_string()))?;
        scheduled.enabled.store(enabled, Ordering::Release);
        Ok(())
    }
}

impl TriggerScheduler for LocalTriggerScheduler {
    fn destroy(&self) -> Result<(), TriggerError> {
        let mut triggers = self.lock()?;
        for (_, scheduled) in triggers.drain() {
            scheduled.task.abort();
        }
        info!("local trigger scheduler stopped");
        Ok(())
    }

    fn register_trigger(
        &self,
        group: &str,
        action_instance_id: &str,
        trigger: &Trigger,
        context: Context,
        handler: Arc<dyn TriggerFireHandler>,
    ) -> Result<(), TriggerError> {
        trigger
            .validate()
            .map_err(|e| TriggerError::Invalid(e.to_string()))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TriggerError::Unavailable(e.to_string()))?;

        let enabled = Arc::new(AtomicBool::new(true));
        let fired = Arc::new(AtomicU64::new(0));
        let task = runtime.spawn(drive_trigger(
            action_instance_id.to_string(),
            trigger.clone(),
            context,
            handler,
            enabled.clone(),
            fired.clone(),
        ));

        let previous = self.lock()?.insert(
            action_instance_id.to_string(),
            ScheduledTrigger {
                group: group.to_string(),
                enabled,
                fired,
                task,
            },
        );
        if let Some(previous) = previous {
            previous.task.abort();
            debug!(action_instance_id, "replaced existing trigger");
        }
        info!(action_instance_id, group, "trigger registered");
        Ok(())
    }

    fn enable_trigger(&self, action_instance_id: &str) -> Result<(), TriggerError> {
        self.set_enabled(action_instance_id, true)
    }

    fn disable_trigger(&self, action_instance_id: &str) -> Result<(), TriggerError> {
        self.set_enabled(action_instance_id, false)
    }

    fn delete_trigger(&self, group: &str, action_instance_id: &str) -> Result<(), TriggerError> {
        let removed = self.lock()?.remove(action_instance_id);
        match removed {
            Some(scheduled) => {
                scheduled.task.abort();
                info!(action_instance_id, group, "trigger deleted");
                Ok(())
            }
            None => Err(TriggerError::NotFound(action_instance_id.to_string())),
        }
    }

    fn is_registered(&self, action_instance_id: &str) -> bool {
        self.lock()
            .map(|t| t.contains_key(action_instance_id))
            .unwrap_or(false)
    }

    fn is_scheduled(&self, action_instance_id: &str) -> bool {
        self.lock()
            .map(|t| {
                t.get(action_instance_id)
                    .is_some_and(|s| s.enabled.load(Ordering::Acquire))
            })
            .unwrap_or(false)
    }
}

impl Drop for LocalTriggerScheduler {
    fn drop(&mut self) {
        if let Ok(triggers) = self.triggers.get_mut() {
            for scheduled in triggers.values() {
                scheduled.task.abort();
            }
        }
    }
}

async fn drive_trigger(
    action_instance_id: String,
    trigger: Trigger,
    context: Context,
    handler: Arc<dyn TriggerFireHandler>,
    enabled: Arc<AtomicBool>,
    fired: Arc<AtomicU64>,
) {
    let anchor = Utc::now();
    let mut after = anchor;
    let mut elapsed_fires = 0u64;
    loop {
        let next = match trigger.next_fire_after(after, anchor, elapsed_fires) {
            Ok(Some(next)) => next,
            Ok(None) => {
                debug!(action_instance_id = %action_instance_id, "trigger exhausted");
                return;
            }
            Err(e) => {
                warn!(action_instance_id = %action_instance_id, error = %e, "trigger stopped");
                return;
            }
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        after = next;
        elapsed_fires += 1;
        if enabled.load(Ordering::Acquire) {
            fired.fetch_add(1, Ordering::AcqRel);
            debug!(action_instance_id = %action_instance_id, fire_time = %next, "trigger fired");
            handler.fire(context.clone());
        }
    }
}
