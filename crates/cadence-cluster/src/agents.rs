//! Polling agents that apply lifecycle messages from other nodes.
//!
//! Each tick reads every retained message, skips ids already in a bounded, expiring
//! seen-set and dispatches the rest to a listener. A failing message is logged and
//! marked seen; the batch carries on. Cancel messages for executions this node does not
//! (yet) own stay unseen, so they are retried until the owner records the execution or
//! the message ages out of retention.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cadence_kernel::ActionsError;

use crate::listeners::{ActionStatusChangeListener, ExecutionStatusChangeListener};
use crate::mediator::{ActionInstanceEvent, ClusterMediator, ExecutionEvent};

/// Message ids already handled, forgotten after `ttl` or once `capacity` is exceeded.
#[derive(Debug)]
pub struct SeenSet {
    capacity: usize,
    ttl: chrono::Duration,
    ids: HashSet<String>,
    order: VecDeque<(DateTime<Utc>, String)>,
}

impl SeenSet {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            ids: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns `false` when `id` was already seen.
    pub fn insert(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        self.evict(now);
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back((now, id.to_string()));
        while self.order.len() > self.capacity {
            self.pop_oldest();
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        while self
            .order
            .front()
            .is_some_and(|(seen_at, _)| now - *seen_at >= self.ttl)
        {
            self.pop_oldest();
        }
    }

    fn pop_oldest(&mut self) {
        if let Some((_, id)) = self.order.pop_front() {
            self.ids.remove(&id);
        }
    }
}

/// Counts from one poll.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    pub received: usize,
    pub handled: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Left unseen for a later poll.
    pub deferred: usize,
}

/// One pass over the mediator's messages.
pub trait PollingAgent: Send + Sync {
    fn name(&self) -> &'static str;

    fn poll_once(&self) -> Result<PollReport, ActionsError>;
}

/// Background loop driving a [PollingAgent] until shut down.
#[derive(Default)]
struct AgentRunner {
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl AgentRunner {
    fn start<A: PollingAgent + 'static>(&self, agent: Weak<A>, every: Duration) -> Result<(), ActionsError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| ActionsError::Operation(format!("no tokio runtime available: {}", e)))?;
        let mut running = self
            .running
            .lock()
            .map_err(|e| ActionsError::Cluster(e.to_string()))?;
        if running.is_some() {
            return Ok(());
        }
        let token = CancellationToken::new();
        let stop = token.clone();
        let task = handle.spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(agent) = agent.upgrade() else { break };
                        match agent.poll_once() {
                            Ok(report) if report.received > 0 => {
                                debug!(agent = agent.name(), ?report, "poll finished")
                            }
                            Ok(_) => {}
                            Err(e) => warn!(agent = agent.name(), error = %e, "poll failed"),
                        }
                    }
                }
            }
        });
        *running = Some((token, task));
        Ok(())
    }

    fn shutdown(&self) {
        let running = match self.running.lock() {
            Ok(mut running) => running.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some((token, _task)) = running {
            token.cancel();
        }
    }

    fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }
}

/// Applies CREATED / ENABLED / DISABLED / DELETED messages to this node's triggers and
/// sweeps expired execution leases on every poll.
pub struct ActionStatusPollingAgent {
    mediator: Arc<dyn ClusterMediator>,
    listener: Arc<dyn ActionStatusChangeListener>,
    seen: Mutex<SeenSet>,
    runner: AgentRunner,
}

impl ActionStatusPollingAgent {
    pub fn new(
        mediator: Arc<dyn ClusterMediator>,
        listener: Arc<dyn ActionStatusChangeListener>,
        seen: SeenSet,
    ) -> Self {
        Self {
            mediator,
            listener,
            seen: Mutex::new(seen),
            runner: AgentRunner::default(),
        }
    }

    pub fn start(self: &Arc<Self>, every: Duration) -> Result<(), ActionsError> {
        self.runner.start(Arc::downgrade(self), every)?;
        info!(agent = self.name(), interval_ms = every.as_millis() as u64, "polling agent started");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.runner.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }
}

impl PollingAgent for ActionStatusPollingAgent {
    fn name(&self) -> &'static str {
        "action-status"
    }

    fn poll_once(&self) -> Result<PollReport, ActionsError> {
        match self.mediator.sweep_expired_leases() {
            Ok(0) => {}
            Ok(expired) => debug!(expired, "swept expired execution leases"),
            Err(e) => warn!(error = %e, "lease sweep failed"),
        }
        let messages = self.mediator.get_all_action_messages()?;
        let mut report = PollReport {
            received: messages.len(),
            ..PollReport::default()
        };
        let now = Utc::now();
        for message in messages {
            let fresh = self
                .seen
                .lock()
                .map_err(|e| ActionsError::Cluster(e.to_string()))?
                .insert(&message.message_id, now);
            if !fresh {
                report.duplicates += 1;
                continue;
            }
            let id = message.action_instance_id.as_str();
            let applied = match message.status {
                ActionInstanceEvent::Created => self.listener.on_create(id),
                ActionInstanceEvent::Deleted => self.listener.on_delete(id),
                ActionInstanceEvent::Enabled => self.listener.on_enable(id),
                ActionInstanceEvent::Disabled => self.listener.on_disable(id),
            };
            match applied {
                Ok(()) => report.handled += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        message_id = %message.message_id,
                        action_instance_id = id,
                        status = %message.status,
                        error = %e,
                        "failed to apply action message"
                    );
                }
            }
        }
        Ok(report)
    }
}

/// Applies CANCELED messages to executions this node started.
pub struct ExecutionStatusPollingAgent {
    mediator: Arc<dyn ClusterMediator>,
    listener: Arc<dyn ExecutionStatusChangeListener>,
    seen: Mutex<SeenSet>,
    runner: AgentRunner,
}

impl ExecutionStatusPollingAgent {
    pub fn new(
        mediator: Arc<dyn ClusterMediator>,
        listener: Arc<dyn ExecutionStatusChangeListener>,
        seen: SeenSet,
    ) -> Self {
        Self {
            mediator,
            listener,
            seen: Mutex::new(seen),
            runner: AgentRunner::default(),
        }
    }

    pub fn start(self: &Arc<Self>, every: Duration) -> Result<(), ActionsError> {
        self.runner.start(Arc::downgrade(self), every)?;
        info!(agent = self.name(), interval_ms = every.as_millis() as u64, "polling agent started");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.runner.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }
}

impl PollingAgent for ExecutionStatusPollingAgent {
    fn name(&self) -> &'static str {
        "execution-status"
    }

    fn poll_once(&self) -> Result<PollReport, ActionsError> {
        let messages = self.mediator.get_all_execution_messages()?;
        let mut report = PollReport {
            received: messages.len(),
            ..PollReport::default()
        };
        let now = Utc::now();
        for message in messages {
            let already_seen = self
                .seen
                .lock()
                .map_err(|e| ActionsError::Cluster(e.to_string()))?
                .contains(&message.message_id);
            if already_seen {
                report.duplicates += 1;
                continue;
            }
            let owned = match self
                .mediator
                .is_executing_action(&message.execution_id, &message.action_instance_id)
            {
                Ok(owned) => owned,
                Err(e) => {
                    warn!(execution_id = %message.execution_id, error = %e, "ownership check failed");
                    false
                }
            };
            if !owned {
                report.deferred += 1;
                continue;
            }
            self.seen
                .lock()
                .map_err(|e| ActionsError::Cluster(e.to_string()))?
                .insert(&message.message_id, now);
            let applied = match message.status {
                ExecutionEvent::Canceled => self
                    .listener
                    .on_cancel(&message.execution_id, &message.action_instance_id),
            };
            match applied {
                Ok(()) => report.handled += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        message_id = %message.message_id,
                        execution_id = %message.execution_id,
                        error = %e,
                        "failed to apply execution message"
                    );
                }
            }
        }
        Ok(report)
    }
}
