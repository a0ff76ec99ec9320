//! Named at-least-once task queues.
//!
//! Delivery is serialized per entry by a visibility lease: a claimed entry is
//! invisible to other pollers until it is acknowledged, returned, or its lease
//! window elapses, after which it is delivered again.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::backoff::Transient;
use crate::domain::activity::{ActivityTask, CommandId};
use crate::domain::execution::{RunId, WorkflowId};
use crate::errors::ErrorClass;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowTaskReason {
    Started,
    ActivityResolved { command_id: CommandId },
    CancelRequested,
    TimeoutCheck,
    Resume,
}

/// Request to advance one execution by replaying its history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub workflow_id: WorkflowId,
    pub run_id: RunId,
    pub reason: WorkflowTaskReason,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueuedTask {
    Workflow(WorkflowTask),
    Activity(ActivityTask),
}

impl QueuedTask {
    pub fn workflow_id(&self) -> &WorkflowId {
        match self {
            Self::Workflow(task) => &task.workflow_id,
            Self::Activity(task) => &task.workflow_id,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Workflow(_) => "workflow",
            Self::Activity(_) => "activity",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub String);

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A claimed entry. Must be acknowledged or returned before the window elapses.
#[derive(Clone, Debug, PartialEq)]
pub struct Lease {
    pub delivery_id: DeliveryId,
    pub queue: String,
    pub task: QueuedTask,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
    pub claim_token: String,
}

impl Lease {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("task queue unavailable: {0}")]
    Unavailable(String),
    #[error("lease on delivery `{0}` expired or was claimed by another worker")]
    LeaseExpired(DeliveryId),
    #[error("could not encode or decode queued task: {0}")]
    Codec(String),
}

impl QueueError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable(_) | Self::LeaseExpired(_) => ErrorClass::QueueUnavailable,
            Self::Codec(_) => ErrorClass::InvalidPayload,
        }
    }
}

impl Transient for QueueError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue_after(
        &self,
        queue: &str,
        task: QueuedTask,
        delay: Duration,
    ) -> Result<DeliveryId, QueueError>;

    async fn enqueue(&self, queue: &str, task: QueuedTask) -> Result<DeliveryId, QueueError> {
        self.enqueue_after(queue, task, Duration::ZERO).await
    }

    /// Claims the oldest visible entry, if any, without waiting.
    async fn try_claim(&self, queue: &str, worker_id: &str) -> Result<Option<Lease>, QueueError>;

    /// Waits until an entry can be claimed. Dropping the future cancels the wait.
    async fn poll(&self, queue: &str, worker_id: &str) -> Result<Lease, QueueError> {
        loop {
            if let Some(lease) = self.try_claim(queue, worker_id).await? {
                return Ok(lease);
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Releases the claim so the entry becomes visible again after `delay`.
    async fn nack(&self, lease: &Lease, delay: Duration) -> Result<(), QueueError>;

    /// Pushes the claim's expiry one lease window past now. Fails with
    /// `LeaseExpired` once another worker holds the entry.
    async fn extend(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Entries on the queue, claimed or not.
    async fn depth(&self, queue: &str) -> Result<usize, QueueError>;

    /// How long a claim stays invisible without an ack or extension.
    fn lease_window(&self) -> Duration;

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(100)
    }
}

struct Claim {
    token: String,
    worker_id: String,
    until: Instant,
}

struct Entry {
    delivery_id: DeliveryId,
    sequence: u64,
    task: QueuedTask,
    available_at: Instant,
    delivery_count: u32,
    claim: Option<Claim>,
}

impl Entry {
    fn visible(&self, now: Instant) -> bool {
        self.available_at <= now && self.claim.as_ref().map(|claim| claim.until <= now).unwrap_or(true)
    }
}

#[derive(Default)]
struct QueueState {
    queues: HashMap<String, Vec<Entry>>,
    next_sequence: u64,
}

pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
    lease_window: Duration,
    poll_interval: Duration,
    notify: Notify,
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl InMemoryTaskQueue {
    pub fn new(lease_window: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            lease_window,
            poll_interval: Duration::from_millis(25),
            notify: Notify::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue_after(
        &self,
        queue: &str,
        task: QueuedTask,
        delay: Duration,
    ) -> Result<DeliveryId, QueueError> {
        let delivery_id = DeliveryId(Uuid::new_v4().to_string());
        {
            let mut state = self.state.lock().await;
            state.next_sequence += 1;
            let sequence = state.next_sequence;
            state.queues.entry(queue.to_string()).or_default().push(Entry {
                delivery_id: delivery_id.clone(),
                sequence,
                task,
                available_at: Instant::now() + delay,
                delivery_count: 0,
                claim: None,
            });
        }
        self.notify.notify_waiters();
        Ok(delivery_id)
    }

    async fn try_claim(&self, queue: &str, worker_id: &str) -> Result<Option<Lease>, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let Some(entries) = state.queues.get_mut(queue) else {
            return Ok(None);
        };

        let next = entries
            .iter_mut()
            .filter(|entry| entry.visible(now))
            .min_by_key(|entry| (entry.available_at, entry.sequence));
        let Some(entry) = next else {
            return Ok(None);
        };

        if let Some(expired) = &entry.claim {
            warn!(
                event_name = "queue.lease.expired",
                queue,
                delivery_id = %entry.delivery_id,
                previous_worker = %expired.worker_id,
                delivery_count = entry.delivery_count,
                "lease window elapsed without ack; redelivering"
            );
        }

        let token = Uuid::new_v4().to_string();
        entry.delivery_count += 1;
        entry.claim = Some(Claim {
            token: token.clone(),
            worker_id: worker_id.to_string(),
            until: now + self.lease_window,
        });

        Ok(Some(Lease {
            delivery_id: entry.delivery_id.clone(),
            queue: queue.to_string(),
            task: entry.task.clone(),
            delivery_count: entry.delivery_count,
            claim_token: token,
        }))
    }

    async fn poll(&self, queue: &str, worker_id: &str) -> Result<Lease, QueueError> {
        loop {
            if let Some(lease) = self.try_claim(queue, worker_id).await? {
                return Ok(lease);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let entries = state
            .queues
            .get_mut(&lease.queue)
            .ok_or_else(|| QueueError::LeaseExpired(lease.delivery_id.clone()))?;

        let position = entries.iter().position(|entry| {
            entry.delivery_id == lease.delivery_id
                && entry.claim.as_ref().map(|claim| claim.token == lease.claim_token).unwrap_or(false)
        });
        match position {
            Some(index) => {
                entries.remove(index);
                Ok(())
            }
            None => Err(QueueError::LeaseExpired(lease.delivery_id.clone())),
        }
    }

    async fn nack(&self, lease: &Lease, delay: Duration) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            let entry = state.queues.get_mut(&lease.queue).and_then(|entries| {
                entries.iter_mut().find(|entry| {
                    entry.delivery_id == lease.delivery_id
                        && entry
                            .claim
                            .as_ref()
                            .map(|claim| claim.token == lease.claim_token)
                            .unwrap_or(false)
                })
            });
            let Some(entry) = entry else {
                return Err(QueueError::LeaseExpired(lease.delivery_id.clone()));
            };
            entry.claim = None;
            entry.available_at = Instant::now() + delay;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn extend(&self, lease: &Lease) -> Result<(), QueueError> {
        let until = Instant::now() + self.lease_window;
        let mut state = self.state.lock().await;
        let claim = state
            .queues
            .get_mut(&lease.queue)
            .and_then(|entries| entries.iter_mut().find(|entry| entry.delivery_id == lease.delivery_id))
            .and_then(|entry| entry.claim.as_mut())
            .filter(|claim| claim.token == lease.claim_token);
        match claim {
            Some(claim) => {
                claim.until = until;
                Ok(())
            }
            None => Err(QueueError::LeaseExpired(lease.delivery_id.clone())),
        }
    }

    async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.queues.get(queue).map(Vec::len).unwrap_or(0))
    }

    fn lease_window(&self) -> Duration {
        self.lease_window
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{InMemoryTaskQueue, QueueError, QueuedTask, TaskQueue, WorkflowTask, WorkflowTaskReason};
    use crate::domain::execution::{RunId, WorkflowId};

    fn workflow_task(id: &str) -> QueuedTask {
        QueuedTask::Workflow(WorkflowTask {
            workflow_id: WorkflowId::from(id),
            run_id: RunId("run-1".to_string()),
            reason: WorkflowTaskReason::Started,
        })
    }

    #[tokio::test]
    async fn entries_are_delivered_in_fifo_order_per_queue() {
        let queue = InMemoryTaskQueue::default();
        queue.enqueue("a", workflow_task("first")).await.expect("enqueue");
        queue.enqueue("b", workflow_task("other-queue")).await.expect("enqueue");
        queue.enqueue("a", workflow_task("second")).await.expect("enqueue");

        let first = queue.try_claim("a", "w1").await.expect("claim").expect("entry");
        let second = queue.try_claim("a", "w1").await.expect("claim").expect("entry");
        assert_eq!(first.task.workflow_id().0, "first");
        assert_eq!(second.task.workflow_id().0, "second");
        assert!(queue.try_claim("a", "w1").await.expect("claim").is_none());
        assert_eq!(queue.depth("a").await.expect("depth"), 2);

        queue.ack(&first).await.expect("ack");
        queue.ack(&second).await.expect("ack");
        assert_eq!(queue.depth("a").await.expect("depth"), 0);
        assert_eq!(queue.depth("b").await.expect("depth"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_entries_are_redelivered_after_the_lease_window() {
        let queue = InMemoryTaskQueue::new(Duration::from_secs(10));
        queue.enqueue("q", workflow_task("wf")).await.expect("enqueue");

        let first = queue.try_claim("q", "crashed-worker").await.expect("claim").expect("entry");
        assert_eq!(first.delivery_count, 1);
        assert!(queue.try_claim("q", "w2").await.expect("claim").is_none());

        tokio::time::advance(Duration::from_secs(11)).await;

        let second = queue.try_claim("q", "w2").await.expect("claim").expect("redelivered");
        assert_eq!(second.delivery_id, first.delivery_id);
        assert_eq!(second.delivery_count, 2);
        assert!(second.is_redelivery());

        assert_eq!(
            queue.ack(&first).await.expect_err("stale ack"),
            QueueError::LeaseExpired(first.delivery_id.clone())
        );
        queue.ack(&second).await.expect("current holder acks");
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_entries_stay_invisible_until_due() {
        let queue = InMemoryTaskQueue::default();
        queue
            .enqueue_after("q", workflow_task("later"), Duration::from_secs(3))
            .await
            .expect("enqueue");

        assert!(queue.try_claim("q", "w").await.expect("claim").is_none());
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(queue.try_claim("q", "w").await.expect("claim").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn nack_returns_the_entry_for_redelivery() {
        let queue = InMemoryTaskQueue::default();
        queue.enqueue("q", workflow_task("wf")).await.expect("enqueue");

        let lease = queue.try_claim("q", "w").await.expect("claim").expect("entry");
        queue.nack(&lease, Duration::from_secs(1)).await.expect("nack");
        assert!(queue.try_claim("q", "w").await.expect("claim").is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        let again = queue.try_claim("q", "w").await.expect("claim").expect("entry");
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn extended_claims_stay_hidden_past_the_original_window() {
        let queue = InMemoryTaskQueue::new(Duration::from_secs(10));
        queue.enqueue("q", workflow_task("wf")).await.expect("enqueue");
        let lease = queue.try_claim("q", "busy-worker").await.expect("claim").expect("entry");

        tokio::time::advance(Duration::from_secs(8)).await;
        queue.extend(&lease).await.expect("extend");
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(queue.try_claim("q", "w2").await.expect("claim").is_none(), "still claimed");

        tokio::time::advance(Duration::from_secs(3)).await;
        let stolen = queue.try_claim("q", "w2").await.expect("claim").expect("redelivered");
        assert_eq!(
            queue.extend(&lease).await.expect_err("lost claim"),
            QueueError::LeaseExpired(lease.delivery_id.clone())
        );
        queue.ack(&stolen).await.expect("ack");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pollers_receive_each_entry_once() {
        let queue = Arc::new(InMemoryTaskQueue::default());
        for index in 0..20 {
            queue.enqueue("q", workflow_task(&format!("wf-{index}"))).await.expect("enqueue");
        }

        let mut pollers = Vec::new();
        for worker in 0..4 {
            let queue = Arc::clone(&queue);
            pollers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(lease) =
                    queue.try_claim("q", &format!("w{worker}")).await.expect("claim")
                {
                    seen.push(lease.task.workflow_id().0.clone());
                    queue.ack(&lease).await.expect("ack");
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for poller in pollers {
            all.extend(poller.await.expect("poller"));
        }
        assert_eq!(all.len(), 20);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20, "no entry may be delivered twice");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_waits_for_new_work() {
        let queue = Arc::new(InMemoryTaskQueue::default());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.poll("q", "w").await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.enqueue("q", workflow_task("wf")).await.expect("enqueue");

        let lease = waiter.await.expect("join").expect("poll");
        assert_eq!(lease.task.workflow_id().0, "wf");
    }
}
