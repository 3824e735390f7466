//! In-process cluster: a shared [ClusterBus] and one [InMemoryClusterMediator] per node.
//!
//! Messages cross the bus as JSON so every node decodes its own copy. The bus keeps an
//! append-only log trimmed by retention age; readers always see every retained message.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use cadence_kernel::{ActionInstanceId, ActionsError, Execution, ExecutionId};

use crate::lease::{LeaseManager, LeaseTable, LeaseTickResult};
use crate::mediator::{ActionInstanceMessage, ClusterMediator, ExecutionMessage};

/// Default number of executions each node remembers as its own.
pub const DEFAULT_EXECUTING_CAPACITY: usize = 1024;

struct Envelope {
    sent_at: DateTime<Utc>,
    payload: String,
}

struct MessageLog {
    entries: RwLock<Vec<Envelope>>,
}

impl MessageLog {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn append<T: Serialize>(
        &self,
        sent_at: DateTime<Utc>,
        message: &T,
        retention: Duration,
    ) -> Result<(), ActionsError> {
        let payload =
            serde_json::to_string(message).map_err(|e| ActionsError::Cluster(e.to_string()))?;
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ActionsError::Cluster(e.to_string()))?;
        let cutoff = Utc::now() - retention;
        entries.retain(|entry| entry.sent_at > cutoff);
        entries.push(Envelope { sent_at, payload });
        Ok(())
    }

    fn read_all<T: DeserializeOwned>(&self, retention: Duration) -> Result<Vec<T>, ActionsError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ActionsError::Cluster(e.to_string()))?;
        let cutoff = Utc::now() - retention;
        entries
            .iter()
            .filter(|entry| entry.sent_at > cutoff)
            .map(|entry| {
                serde_json::from_str(&entry.payload).map_err(|e| ActionsError::Cluster(e.to_string()))
            })
            .collect()
    }
}

/// State shared by every node of an in-process cluster.
pub struct ClusterBus {
    action_messages: MessageLog,
    execution_messages: MessageLog,
    leases: LeaseTable,
    retention: Duration,
}

impl ClusterBus {
    pub fn new(retention: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            action_messages: MessageLog::new(),
            execution_messages: MessageLog::new(),
            leases: LeaseTable::new(),
            retention: Duration::from_std(retention).unwrap_or_else(|_| Duration::days(36_500)),
        })
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    /// Sweeps expired leases; driven by each node's action polling agent.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<LeaseTickResult, ActionsError> {
        self.leases.tick(now)
    }

    /// A mediator for `node_id` over this bus.
    pub fn join(self: &Arc<Self>, node_id: impl Into<String>) -> InMemoryClusterMediator {
        InMemoryClusterMediator::new(node_id, self.clone())
    }
}

pub struct InMemoryClusterMediator {
    node_id: String,
    bus: Arc<ClusterBus>,
    executing: Mutex<VecDeque<(ExecutionId, ActionInstanceId)>>,
    executing_capacity: usize,
}

impl InMemoryClusterMediator {
    pub fn new(node_id: impl Into<String>, bus: Arc<ClusterBus>) -> Self {
        Self {
            node_id: node_id.into(),
            bus,
            executing: Mutex::new(VecDeque::new()),
            executing_capacity: DEFAULT_EXECUTING_CAPACITY,
        }
    }

    /// Oldest remembered executions are forgotten past `capacity`.
    pub fn with_executing_capacity(mut self, capacity: usize) -> Self {
        self.executing_capacity = capacity.max(1);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn bus(&self) -> &Arc<ClusterBus> {
        &self.bus
    }
}

impl ClusterMediator for InMemoryClusterMediator {
    fn send_action_message(&self, message: ActionInstanceMessage) -> Result<(), ActionsError> {
        debug!(
            node_id = %self.node_id,
            action_instance_id = %message.action_instance_id,
            status = %message.status,
            "sending action message"
        );
        self.bus
            .action_messages
            .append(message.sent_at, &message, self.bus.retention)
    }

    fn get_all_action_messages(&self) -> Result<Vec<ActionInstanceMessage>, ActionsError> {
        self.bus.action_messages.read_all(self.bus.retention)
    }

    fn send_execution_message(&self, message: ExecutionMessage) -> Result<(), ActionsError> {
        debug!(
            node_id = %self.node_id,
            execution_id = %message.execution_id,
            "sending execution message"
        );
        self.bus
            .execution_messages
            .append(message.sent_at, &message, self.bus.retention)
    }

    fn get_all_execution_messages(&self) -> Result<Vec<ExecutionMessage>, ActionsError> {
        self.bus.execution_messages.read_all(self.bus.retention)
    }

    fn should_execute_action(
        &self,
        action_instance_id: &str,
        lease_ttl_seconds: u64,
    ) -> Result<bool, ActionsError> {
        let ttl = Duration::seconds(lease_ttl_seconds.min(i64::MAX as u64) as i64);
        let granted = self
            .bus
            .leases
            .try_acquire(action_instance_id, &self.node_id, ttl, Utc::now())?;
        Ok(granted.is_some())
    }

    fn is_executing_action(
        &self,
        execution_id: &str,
        action_instance_id: &str,
    ) -> Result<bool, ActionsError> {
        let executing = self
            .executing
            .lock()
            .map_err(|e| ActionsError::Cluster(e.to_string()))?;
        Ok(executing
            .iter()
            .any(|(e, a)| e == execution_id && a == action_instance_id))
    }

    fn record_execution(&self, execution: &Execution) -> Result<(), ActionsError> {
        let mut executing = self
            .executing
            .lock()
            .map_err(|e| ActionsError::Cluster(e.to_string()))?;
        executing.push_back((execution.id.clone(), execution.action_instance_id.clone()));
        while executing.len() > self.executing_capacity {
            executing.pop_front();
        }
        Ok(())
    }

    fn sweep_expired_leases(&self) -> Result<u64, ActionsError> {
        Ok(self.bus.tick(Utc::now())?.expired)
    }
}
