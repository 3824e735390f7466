//! Registry of action and listener factories, keyed by type name.
//!
//! Action instances only store the type name; the registry turns it into a fresh
//! capability object for every execution or cancellation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::kernel::action::{Action, ExecutionListener, NoopExecutionListener};
use crate::kernel::error::ActionsError;

pub type ActionFactory = Arc<dyn Fn() -> Arc<dyn Action> + Send + Sync>;
pub type ListenerFactory = Arc<dyn Fn() -> Arc<dyn ExecutionListener> + Send + Sync>;

#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, ActionFactory>>,
    listeners: RwLock<HashMap<String, ListenerFactory>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_action<F>(&self, action_type: impl Into<String>, factory: F) -> Result<(), ActionsError>
    where
        F: Fn() -> Arc<dyn Action> + Send + Sync + 'static,
    {
        self.actions
            .write()
            .map_err(|e| ActionsError::Store(e.to_string()))?
            .insert(action_type.into(), Arc::new(factory));
        Ok(())
    }

    pub fn register_listener<F>(
        &self,
        listener_type: impl Into<String>,
        factory: F,
    ) -> Result<(), ActionsError>
    where
        F: Fn() -> Arc<dyn ExecutionListener> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .map_err(|e| ActionsError::Store(e.to_string()))?
            .insert(listener_type.into(), Arc::new(factory));
        Ok(())
    }

    pub fn has_action(&self, action_type: &str) -> bool {
        self.actions
            .read()
            .map(|m| m.contains_key(action_type))
            .unwrap_or(false)
    }

    pub fn has_listener(&self, listener_type: &str) -> bool {
        self.listeners
            .read()
            .map(|m| m.contains_key(listener_type))
            .unwrap_or(false)
    }

    pub fn new_action(&self, action_type: &str) -> Result<Arc<dyn Action>, ActionsError> {
        let factory = self
            .actions
            .read()
            .map_err(|e| ActionsError::Store(e.to_string()))?
            .get(action_type)
            .cloned()
            .ok_or_else(|| {
                ActionsError::Validation(format!("No action registered for type '{}'", action_type))
            })?;
        Ok(factory())
    }

    /// Instantiates the listener, falling back to the no-op listener when unnamed.
    pub fn new_listener(
        &self,
        listener_type: Option<&str>,
    ) -> Result<Arc<dyn ExecutionListener>, ActionsError> {
        let Some(listener_type) = listener_type else {
            return Ok(Arc::new(NoopExecutionListener));
        };
        let factory = self
            .listeners
            .read()
            .map_err(|e| ActionsError::Store(e.to_string()))?
            .get(listener_type)
            .cloned()
            .ok_or_else(|| {
                ActionsError::Validation(format!(
                    "No execution listener registered for type '{}'",
                    listener_type
                ))
            })?;
        Ok(factory())
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let actions: Vec<String> = self
            .actions
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("ActionRegistry")
            .field("actions", &actions)
            .finish_non_exhaustive()
    }
}
