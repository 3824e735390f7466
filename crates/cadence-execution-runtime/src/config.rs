//! Runtime tuning knobs, loadable from `CADENCE_*` environment variables.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_THREAD_POOL_SIZE: usize = 10;
pub const DEFAULT_EXECUTION_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_LEASE_TTL_SECS: u64 = 60;
pub const DEFAULT_ACTION_POLL_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_EXECUTION_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_MESSAGE_RETENTION_SECS: u64 = 300;
pub const DEFAULT_SEEN_SET_CAPACITY: usize = 10_000;

const ENV_KEYS: [&str; 7] = [
    "CADENCE_THREAD_POOL_SIZE",
    "CADENCE_EXECUTION_TTL_SECS",
    "CADENCE_LEASE_TTL_SECS",
    "CADENCE_ACTION_POLL_INTERVAL_MS",
    "CADENCE_EXECUTION_POLL_INTERVAL_MS",
    "CADENCE_MESSAGE_RETENTION_SECS",
    "CADENCE_SEEN_SET_CAPACITY",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Upper bound on concurrently running actions.
    pub thread_pool_size: usize,
    pub execution_ttl: Duration,
    /// Lease length handed to the cluster mediator before each clustered execute.
    pub lease_ttl: Duration,
    pub action_poll_interval: Duration,
    pub execution_poll_interval: Duration,
    /// How long lifecycle messages stay readable on the in-memory bus.
    pub message_retention: Duration,
    pub seen_set_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: DEFAULT_THREAD_POOL_SIZE,
            execution_ttl: Duration::from_secs(DEFAULT_EXECUTION_TTL_SECS),
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECS),
            action_poll_interval: Duration::from_millis(DEFAULT_ACTION_POLL_INTERVAL_MS),
            execution_poll_interval: Duration::from_millis(DEFAULT_EXECUTION_POLL_INTERVAL_MS),
            message_retention: Duration::from_secs(DEFAULT_MESSAGE_RETENTION_SECS),
            seen_set_capacity: DEFAULT_SEEN_SET_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, String> {
        let mut envs = HashMap::new();
        for key in ENV_KEYS {
            if let Ok(value) = std::env::var(key) {
                envs.insert(key.to_string(), value);
            }
        }
        Self::from_env_map(&envs)
    }

    pub fn from_env_map(envs: &HashMap<String, String>) -> Result<Self, String> {
        let defaults = Self::default();
        let thread_pool_size = parse_env(envs, "CADENCE_THREAD_POOL_SIZE")?
            .map(|n| n as usize)
            .unwrap_or(defaults.thread_pool_size);
        if thread_pool_size == 0 {
            return Err("CADENCE_THREAD_POOL_SIZE must be at least 1".to_string());
        }
        let seen_set_capacity = parse_env(envs, "CADENCE_SEEN_SET_CAPACITY")?
            .map(|n| n as usize)
            .unwrap_or(defaults.seen_set_capacity);
        let secs = |key: &str, default: Duration| -> Result<Duration, String> {
            Ok(parse_env(envs, key)?
                .map(Duration::from_secs)
                .unwrap_or(default))
        };
        let millis = |key: &str, default: Duration| -> Result<Duration, String> {
            Ok(parse_env(envs, key)?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };

        Ok(Self {
            thread_pool_size,
            execution_ttl: secs("CADENCE_EXECUTION_TTL_SECS", defaults.execution_ttl)?,
            lease_ttl: secs("CADENCE_LEASE_TTL_SECS", defaults.lease_ttl)?,
            action_poll_interval: millis(
                "CADENCE_ACTION_POLL_INTERVAL_MS",
                defaults.action_poll_interval,
            )?,
            execution_poll_interval: millis(
                "CADENCE_EXECUTION_POLL_INTERVAL_MS",
                defaults.execution_poll_interval,
            )?,
            message_retention: secs("CADENCE_MESSAGE_RETENTION_SECS", defaults.message_retention)?,
            seen_set_capacity,
        })
    }

    pub fn with_thread_pool_size(mut self, size: usize) -> Self {
        self.thread_pool_size = size.max(1);
        self
    }

    pub fn with_execution_ttl(mut self, ttl: Duration) -> Self {
        self.execution_ttl = ttl;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_action_poll_interval(mut self, interval: Duration) -> Self {
        self.action_poll_interval = interval;
        self
    }

    pub fn with_execution_poll_interval(mut self, interval: Duration) -> Self {
        self.execution_poll_interval = interval;
        self
    }

    pub fn with_message_retention(mut self, retention: Duration) -> Self {
        self.message_retention = retention;
        self
    }

    pub fn with_seen_set_capacity(mut self, capacity: usize) -> Self {
        self.seen_set_capacity = capacity;
        self
    }

    /// Cancellations get about half the execute pool, never less than one permit.
    pub fn cancel_pool_size(&self) -> usize {
        if self.thread_pool_size > 1 {
            self.thread_pool_size / 2
        } else {
            self.thread_pool_size.max(1)
        }
    }
}

fn parse_env(envs: &HashMap<String, String>, key: &str) -> Result<Option<u64>, String> {
    let Some(raw) = envs.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| format!("invalid {}='{}'. expected a non-negative integer", key, raw))
}
