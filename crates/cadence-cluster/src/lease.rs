//! Execution leases: one owner per action instance until the lease expires.
//!
//! Leases are never renewed. Acquisition fails while any unexpired lease exists, even for
//! the node that holds it; expired rows are replaced on the next acquire and swept by
//! [LeaseManager::tick], which the action polling agent drives through
//! `ClusterMediator::sweep_expired_leases` so rows of deleted instances do not linger.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use cadence_kernel::{ActionInstanceId, ActionsError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseRecord {
    pub lease_id: String,
    pub action_instance_id: ActionInstanceId,
    pub node_id: String,
    pub acquired_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.lease_expires_at
    }

    pub fn is_held_by(&self, node_id: &str) -> bool {
        self.node_id == node_id
    }
}

/// Result of a periodic lease tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaseTickResult {
    pub expired: u64,
}

/// Lease sweeping abstraction.
pub trait LeaseManager: Send + Sync {
    fn tick(&self, now: DateTime<Utc>) -> Result<LeaseTickResult, ActionsError>;
}

#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: Mutex<HashMap<ActionInstanceId, LeaseRecord>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants a lease to `node_id` unless a live one exists.
    pub fn try_acquire(
        &self,
        action_instance_id: &str,
        node_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<LeaseRecord>, ActionsError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|e| ActionsError::Cluster(e.to_string()))?;
        if leases
            .get(action_instance_id)
            .is_some_and(|current| !current.is_expired(now))
        {
            return Ok(None);
        }
        let record = LeaseRecord {
            lease_id: uuid::Uuid::new_v4().to_string(),
            action_instance_id: action_instance_id.to_string(),
            node_id: node_id.to_string(),
            acquired_at: now,
            lease_expires_at: now + ttl,
        };
        leases.insert(action_instance_id.to_string(), record.clone());
        Ok(Some(record))
    }

    /// The live lease for `action_instance_id`, if any.
    pub fn current(
        &self,
        action_instance_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LeaseRecord>, ActionsError> {
        let leases = self
            .leases
            .lock()
            .map_err(|e| ActionsError::Cluster(e.to_string()))?;
        Ok(leases
            .get(action_instance_id)
            .filter(|lease| !lease.is_expired(now))
            .cloned())
    }
}

impl LeaseManager for LeaseTable {
    fn tick(&self, now: DateTime<Utc>) -> Result<LeaseTickResult, ActionsError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|e| ActionsError::Cluster(e.to_string()))?;
        let before = leases.len();
        leases.retain(|_, lease| !lease.is_expired(now));
        Ok(LeaseTickResult {
            expired: (before - leases.len()) as u64,
        })
    }
}
