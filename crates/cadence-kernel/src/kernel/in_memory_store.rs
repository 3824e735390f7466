//! In-memory stores for action instances and executions.
//!
//! Both keep `scope -> id -> row` maps behind an `RwLock`. The execution store expires
//! rows after a TTL; expired rows are invisible to reads and pruned on writes.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

use crate::kernel::error::ActionsError;
use crate::kernel::execution::Execution;
use crate::kernel::identity::{create_id, extract_group_from_id, is_id_format, new_scoped_id};
use crate::kernel::instance::ActionInstance;
use crate::kernel::store::{ActionInstanceStore, ExecutionStore};

/// Default retention of execution rows.
pub const DEFAULT_EXECUTION_TTL_SECONDS: i64 = 24 * 60 * 60;

struct Row<T> {
    value: T,
    expires_at: Option<DateTime<Utc>>,
}

impl<T> Row<T> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// `scope -> id -> row` table shared by both stores.
struct ScopedTable<T> {
    rows: RwLock<HashMap<String, HashMap<String, Row<T>>>>,
    ttl: Option<Duration>,
}

impl<T: Clone> ScopedTable<T> {
    fn new(ttl: Option<Duration>) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn put(&self, scope: &str, id: &str, value: T) -> Result<(), ActionsError> {
        let now = Utc::now();
        let mut rows = self
            .rows
            .write()
            .map_err(|e| ActionsError::Store(e.to_string()))?;
        if self.ttl.is_some() {
            for scoped in rows.values_mut() {
                scoped.retain(|_, row| row.is_live(now));
            }
            rows.retain(|_, scoped| !scoped.is_empty());
        }
        rows.entry(scope.to_string()).or_default().insert(
            id.to_string(),
            Row {
                value,
                expires_at: self.ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    fn get(&self, scope: &str, id: &str) -> Result<Option<T>, ActionsError> {
        let now = Utc::now();
        let rows = self
            .rows
            .read()
            .map_err(|e| ActionsError::Store(e.to_string()))?;
        Ok(rows
            .get(scope)
            .and_then(|scoped| scoped.get(id))
            .filter(|row| row.is_live(now))
            .map(|row| row.value.clone()))
    }

    fn delete(&self, scope: &str, id: &str) -> Result<(), ActionsError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|e| ActionsError::Store(e.to_string()))?;
        if let Some(scoped) = rows.get_mut(scope) {
            scoped.remove(id);
            if scoped.is_empty() {
                rows.remove(scope);
            }
        }
        Ok(())
    }

    fn list(&self, scope: Option<&str>) -> Result<Vec<T>, ActionsError> {
        let now = Utc::now();
        let rows = self
            .rows
            .read()
            .map_err(|e| ActionsError::Store(e.to_string()))?;
        let live = |scoped: &HashMap<String, Row<T>>| -> Vec<T> {
            scoped
                .values()
                .filter(|row| row.is_live(now))
                .map(|row| row.value.clone())
                .collect()
        };
        Ok(match scope {
            Some(scope) => rows.get(scope).map(live).unwrap_or_default(),
            None => rows.values().flat_map(live).collect(),
        })
    }
}

/// In-memory action instance store.
pub struct InMemoryActionInstanceStore {
    table: ScopedTable<ActionInstance>,
}

impl InMemoryActionInstanceStore {
    pub fn new() -> Self {
        Self {
            table: ScopedTable::new(None),
        }
    }
}

impl Default for InMemoryActionInstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionInstanceStore for InMemoryActionInstanceStore {
    fn create_action_instance(&self, instance: &mut ActionInstance) -> Result<String, ActionsError> {
        if !instance.has_id() {
            instance.id = new_scoped_id(&instance.group);
        } else if !is_id_format(&instance.id) {
            instance.id = create_id(&instance.group, &instance.id);
        }
        self.table.put(
            extract_group_from_id(&instance.id),
            &instance.id,
            instance.clone(),
        )?;
        Ok(instance.id.clone())
    }

    fn update_action_instance(&self, instance: &ActionInstance) -> Result<(), ActionsError> {
        self.table.put(
            extract_group_from_id(&instance.id),
            &instance.id,
            instance.clone(),
        )
    }

    fn get_action_instance(&self, id: &str) -> Result<Option<ActionInstance>, ActionsError> {
        self.table.get(extract_group_from_id(id), id)
    }

    fn delete_action_instance(&self, instance: &ActionInstance) -> Result<(), ActionsError> {
        self.table.delete(extract_group_from_id(&instance.id), &instance.id)
    }

    fn get_action_instances_in_group(
        &self,
        group: &str,
    ) -> Result<Vec<ActionInstance>, ActionsError> {
        self.table.list(Some(group))
    }

    fn get_action_instances(&self) -> Result<Vec<ActionInstance>, ActionsError> {
        self.table.list(None)
    }
}

/// In-memory execution store with per-row TTL.
pub struct InMemoryExecutionStore {
    table: ScopedTable<Execution>,
}

impl InMemoryExecutionStore {
    /// Store with the default 24h retention.
    pub fn new() -> Self {
        Self::with_ttl(Some(Duration::seconds(DEFAULT_EXECUTION_TTL_SECONDS)))
    }

    /// `None` keeps rows forever.
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            table: ScopedTable::new(ttl),
        }
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn create_execution(&self, execution: &mut Execution) -> Result<String, ActionsError> {
        execution.id = new_scoped_id(&execution.action_instance_id);
        self.table.put(
            &execution.action_instance_id,
            &execution.id,
            execution.clone(),
        )?;
        Ok(execution.id.clone())
    }

    fn update_execution(&self, execution: &Execution) -> Result<(), ActionsError> {
        self.table.put(
            extract_group_from_id(&execution.id),
            &execution.id,
            execution.clone(),
        )
    }

    fn get_execution(&self, id: &str) -> Result<Option<Execution>, ActionsError> {
        self.table.get(extract_group_from_id(id), id)
    }

    fn delete_execution(&self, execution: &Execution) -> Result<(), ActionsError> {
        self.table
            .delete(extract_group_from_id(&execution.id), &execution.id)
    }

    fn get_executions(&self, action_instance_id: &str) -> Result<Vec<Execution>, ActionsError> {
        self.table.list(Some(action_instance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::identity::DEFAULT_GROUP;

    #[test]
    fn create_assigns_group_scoped_id() {
        let store = InMemoryActionInstanceStore::new();
        let mut instance = ActionInstance::new("a", "t").with_group("billing");
        let id = store.create_action_instance(&mut instance).expect("create");
        assert_eq!(instance.id, id);
        assert_eq!(extract_group_from_id(&id), "billing");
        let loaded = store.get_action_instance(&id).expect("get").expect("present");
        assert_eq!(loaded.name, "a");
    }

    #[test]
    fn caller_supplied_plain_id_is_prefixed_with_group() {
        let store = InMemoryActionInstanceStore::new();
        let mut instance = ActionInstance::new("a", "t").with_id("nightly");
        store.create_action_instance(&mut instance).expect("create");
        assert_eq!(instance.id, format!("{}:nightly", DEFAULT_GROUP));
    }

    #[test]
    fn group_listing_only_returns_that_group() {
        let store = InMemoryActionInstanceStore::new();
        for group in ["a", "a", "b"] {
            let mut instance = ActionInstance::new("x", "t").with_group(group);
            store.create_action_instance(&mut instance).expect("create");
        }
        assert_eq!(store.get_action_instances_in_group("a").expect("list").len(), 2);
        assert_eq!(store.get_action_instances_in_group("c").expect("list").len(), 0);
        assert_eq!(store.get_action_instances().expect("list").len(), 3);
    }

    #[test]
    fn delete_removes_instance() {
        let store = InMemoryActionInstanceStore::new();
        let mut instance = ActionInstance::new("x", "t");
        let id = store.create_action_instance(&mut instance).expect("create");
        store.delete_action_instance(&instance).expect("delete");
        assert!(store.get_action_instance(&id).expect("get").is_none());
    }

    #[test]
    fn execution_ids_are_scoped_under_action_instance() {
        let store = InMemoryExecutionStore::new();
        let mut execution = Execution::new("node", "g:1");
        let id = store.create_execution(&mut execution).expect("create");
        assert_eq!(extract_group_from_id(&id), "g:1");
        execution.log_info("updated");
        store.update_execution(&execution).expect("update");
        let loaded = store.get_execution(&id).expect("get").expect("present");
        assert_eq!(loaded.log.len(), 1);
        assert_eq!(store.get_executions("g:1").expect("list").len(), 1);
    }

    #[test]
    fn expired_executions_are_invisible() {
        let store = InMemoryExecutionStore::with_ttl(Some(Duration::milliseconds(-1)));
        let mut execution = Execution::new("node", "g:1");
        let id = store.create_execution(&mut execution).expect("create");
        assert!(store.get_execution(&id).expect("get").is_none());
        assert!(store.get_executions("g:1").expect("list").is_empty());
    }

    #[test]
    fn recent_executions_are_newest_first_and_bounded() {
        let store = InMemoryExecutionStore::with_ttl(None);
        let mut ids = Vec::new();
        for _ in 0..5 {
            let mut execution = Execution::new("node", "g:1");
            ids.push(store.create_execution(&mut execution).expect("create"));
        }
        let recent = store.get_recent_executions("g:1", 2).expect("recent");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, ids[4]);
        assert_eq!(recent[1].id, ids[3]);
    }
}
