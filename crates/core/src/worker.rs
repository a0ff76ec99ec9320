//! Stateless worker process.
//!
//! A worker owns nothing durable. It claims tasks from its queues, replays
//! workflow histories to decide the next step, runs activity attempts, and
//! writes every result back through the event log and task queue. Any number
//! of workers may serve the same queues; a task whose worker dies is
//! redelivered once its queue lease elapses.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::activity::ActivityRegistry;
use crate::backoff::{infrastructure_policy, retry_transient};
use crate::domain::activity::{ActivityOutcome, ActivityTask, RetryPolicy};
use crate::domain::event::{EventKind, HistoryEvent, SequenceNo};
use crate::domain::execution::{WorkflowExecution, WorkflowId};
use crate::errors::ErrorClass;
use crate::event_log::{EventLog, LeaseToken, LogError};
use crate::executor::{ActivityExecutor, Resolution};
use crate::queue::{
    DeliveryId, Lease, QueueError, QueuedTask, TaskQueue, WorkflowTask, WorkflowTaskReason,
};
use crate::workflow::{ReplayState, WorkflowDecision, WorkflowEngine, WorkflowRegistry};

#[derive(Clone, Debug, PartialEq)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub task_queues: Vec<String>,
    pub max_concurrent_tasks: usize,
    /// How long one workflow task may hold an execution's history lease.
    pub history_lease_ttl: Duration,
    pub infra_retry: RetryPolicy,
    /// Delay before a task that failed for infrastructure reasons is retried.
    pub redelivery_delay: Duration,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>, task_queue: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_queues: vec![task_queue.into()],
            max_concurrent_tasks: 16,
            history_lease_ttl: Duration::from_secs(30),
            infra_retry: infrastructure_policy(),
            redelivery_delay: Duration::from_secs(1),
        }
    }

    pub fn with_queue(mut self, task_queue: impl Into<String>) -> Self {
        let task_queue = task_queue.into();
        if !self.task_queues.contains(&task_queue) {
            self.task_queues.push(task_queue);
        }
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    pub fn with_history_lease_ttl(mut self, ttl: Duration) -> Self {
        self.history_lease_ttl = ttl;
        self
    }

    pub fn with_infra_retry(mut self, policy: RetryPolicy) -> Self {
        self.infra_retry = policy;
        self
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl WorkerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Log(error) => error.class(),
            Self::Queue(error) => error.class(),
        }
    }
}

/// How an activity outcome write ended.
enum Recorded {
    Appended,
    /// Another delivery already recorded an outcome for this command.
    Duplicate,
    /// The execution closed first; the outcome is dropped.
    Closed,
}

#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    config: WorkerConfig,
    log: Arc<dyn EventLog>,
    queue: Arc<dyn TaskQueue>,
    engine: WorkflowEngine,
    executor: ActivityExecutor,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        log: Arc<dyn EventLog>,
        queue: Arc<dyn TaskQueue>,
        workflows: Arc<WorkflowRegistry>,
        activities: Arc<ActivityRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                config,
                log,
                queue,
                engine: WorkflowEngine::new(workflows),
                executor: ActivityExecutor::new(activities),
            }),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Polls every configured queue until `shutdown` flips to `true` (or its
    /// sender is dropped), then waits for in-flight tasks to finish.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let config = &self.inner.config;
        let slots = u32::try_from(config.max_concurrent_tasks).unwrap_or(u32::MAX).max(1);
        let semaphore = Arc::new(Semaphore::new(slots as usize));

        info!(
            event_name = "worker.started",
            worker_id = %config.worker_id,
            queues = ?config.task_queues,
            max_concurrent_tasks = slots,
            workflows = ?self.inner.engine.registry().workflow_types(),
            activities = ?self.inner.executor.registry().activity_types(),
            "worker polling"
        );

        let mut pollers = JoinSet::new();
        for queue in &config.task_queues {
            pollers.spawn(poll_queue(
                Arc::clone(&self.inner),
                queue.clone(),
                Arc::clone(&semaphore),
                shutdown.clone(),
            ));
        }
        while let Some(joined) = pollers.join_next().await {
            if let Err(join_error) = joined {
                error!(event_name = "worker.poller.crashed", error = %join_error, "queue poller died");
            }
        }

        // Every in-flight task holds one permit.
        if let Ok(drained) = semaphore.acquire_many(slots).await {
            drop(drained);
        }
        info!(event_name = "worker.stopped", worker_id = %config.worker_id, "worker stopped");
    }

    /// Claims and processes at most one task from `queue` without waiting.
    pub async fn run_once(&self, queue: &str) -> Result<bool, QueueError> {
        match self.inner.queue.try_claim(queue, &self.inner.config.worker_id).await? {
            Some(lease) => {
                self.inner.process(lease).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Handles one claimed task and acknowledges or returns it.
    pub async fn process(&self, lease: Lease) {
        self.inner.process(lease).await;
    }
}

async fn poll_queue(
    inner: Arc<WorkerInner>,
    queue: String,
    semaphore: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let claimed = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            claimed = inner.queue.poll(&queue, &inner.config.worker_id) => claimed,
        };

        match claimed {
            Ok(lease) => {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    inner.process(lease).await;
                    drop(permit);
                });
            }
            Err(error) => {
                drop(permit);
                warn!(
                    event_name = "worker.poll.failed",
                    queue = %queue,
                    error = %error,
                    "could not claim a task"
                );
                tokio::time::sleep(inner.queue.poll_interval()).await;
            }
        }
    }
}

impl WorkerInner {
    async fn process(&self, lease: Lease) {
        debug!(
            event_name = "worker.task.claimed",
            kind = lease.task.describe(),
            workflow_id = %lease.task.workflow_id(),
            delivery_id = %lease.delivery_id,
            delivery_count = lease.delivery_count,
            "processing task"
        );

        let result = match &lease.task {
            QueuedTask::Workflow(task) => self.run_workflow_task(task, lease.is_redelivery()).await,
            QueuedTask::Activity(task) => self.run_activity_task(task, &lease).await,
        };

        match result {
            Ok(()) => {
                let acked = retry_transient(&self.config.infra_retry, "queue.ack", || {
                    self.queue.ack(&lease)
                })
                .await;
                if let Err(error) = acked {
                    // The entry comes back after its lease window; handlers are idempotent.
                    warn!(
                        event_name = "worker.ack.failed",
                        delivery_id = %lease.delivery_id,
                        error = %error,
                        "could not acknowledge task"
                    );
                }
            }
            Err(failure) => {
                warn!(
                    event_name = "worker.task.failed",
                    kind = lease.task.describe(),
                    workflow_id = %lease.task.workflow_id(),
                    class = failure.class().as_str(),
                    error = %failure,
                    "task failed on infrastructure; returning it to the queue"
                );
                let delay = self.config.redelivery_delay;
                let returned = retry_transient(&self.config.infra_retry, "queue.nack", || {
                    self.queue.nack(&lease, delay)
                })
                .await;
                if let Err(error) = returned {
                    warn!(
                        event_name = "worker.nack.failed",
                        delivery_id = %lease.delivery_id,
                        error = %error,
                        "could not return task; it will reappear after its lease window"
                    );
                }
            }
        }
    }

    async fn run_workflow_task(
        &self,
        task: &WorkflowTask,
        redelivered: bool,
    ) -> Result<(), WorkerError> {
        let Some(execution) = self.find_execution(&task.workflow_id).await? else {
            warn!(
                event_name = "workflow.task.orphaned",
                workflow_id = %task.workflow_id,
                "no execution for workflow task; dropping"
            );
            return Ok(());
        };
        if execution.run_id != task.run_id || execution.status.is_terminal() {
            debug!(
                event_name = "workflow.task.skipped",
                workflow_id = %task.workflow_id,
                status = execution.status.as_str(),
                "execution already closed or belongs to another run"
            );
            return Ok(());
        }

        let lease = self.acquire(&execution.workflow_id).await?;
        let advanced = self.advance(&lease, &execution, task, redelivered).await;
        self.release(&lease).await;

        for activity in advanced? {
            let queue = activity.task_queue.clone();
            self.enqueue(&queue, QueuedTask::Activity(activity), Duration::ZERO).await?;
        }
        Ok(())
    }

    /// Replays and writes the decision. Returns the activity tasks to enqueue
    /// once the history lease is released.
    async fn advance(
        &self,
        lease: &LeaseToken,
        execution: &WorkflowExecution,
        task: &WorkflowTask,
        redelivered: bool,
    ) -> Result<Vec<ActivityTask>, WorkerError> {
        let history = self.read_history(&execution.workflow_id).await?;
        // A fired timeout check is authoritative; otherwise consult the wall clock.
        let deadline_exceeded = task.reason == WorkflowTaskReason::TimeoutCheck
            || execution.deadline_exceeded(Utc::now());
        let decision = self.engine.decide(&execution.workflow_id, &history, deadline_exceeded);

        match decision {
            WorkflowDecision::Closed(_) => Ok(Vec::new()),
            WorkflowDecision::Await { commands } => {
                let mut activities: Vec<ActivityTask> = Vec::new();
                if !commands.is_empty() {
                    let events =
                        commands.iter().map(|command| command.to_event(&execution.run_id)).collect();
                    self.append(lease, events).await?;
                    info!(
                        event_name = "workflow.commands.scheduled",
                        workflow_id = %execution.workflow_id,
                        count = commands.len(),
                        "activities scheduled"
                    );
                    activities.extend(commands.iter().map(|command| {
                        command.first_attempt(
                            &execution.workflow_id,
                            &execution.run_id,
                            &execution.task_queue,
                        )
                    }));
                }

                if redelivered || task.reason == WorkflowTaskReason::Resume {
                    if let Ok(replay) = ReplayState::from_history(&history) {
                        let recovered: Vec<ActivityTask> = replay
                            .unstarted_commands()
                            .into_iter()
                            .map(|command| {
                                command.first_attempt(
                                    &execution.workflow_id,
                                    &execution.run_id,
                                    &execution.task_queue,
                                )
                            })
                            .collect();
                        if !recovered.is_empty() {
                            info!(
                                event_name = "workflow.commands.recovered",
                                workflow_id = %execution.workflow_id,
                                count = recovered.len(),
                                "re-enqueuing scheduled activities with no recorded start"
                            );
                        }
                        activities.extend(recovered);
                    }
                }
                Ok(activities)
            }
            closing => {
                if let WorkflowDecision::Fail(failure) = &closing {
                    if failure.class() == ErrorClass::DeterminismViolation {
                        error!(
                            event_name = "workflow.determinism_violation",
                            workflow_id = %execution.workflow_id,
                            workflow_type = %execution.workflow_type,
                            error = %failure,
                            "replay diverged from recorded history"
                        );
                    }
                }
                if let Some(event) = closing.closing_event() {
                    self.append(lease, vec![event]).await?;
                }
                info!(
                    event_name = "workflow.closed",
                    workflow_id = %execution.workflow_id,
                    decision = closing.as_str(),
                    "workflow execution closed"
                );
                Ok(Vec::new())
            }
        }
    }

    async fn run_activity_task(&self, task: &ActivityTask, lease: &Lease) -> Result<(), WorkerError> {
        let Some(execution) = self.find_execution(&task.workflow_id).await? else {
            warn!(
                event_name = "activity.task.orphaned",
                workflow_id = %task.workflow_id,
                task_id = %task.task_id,
                "no execution for activity task; dropping"
            );
            return Ok(());
        };
        if execution.run_id != task.run_id || execution.status.is_terminal() {
            debug!(
                event_name = "activity.task.skipped",
                workflow_id = %task.workflow_id,
                task_id = %task.task_id,
                "execution closed before the attempt started"
            );
            return Ok(());
        }

        // A redelivery after the outcome was written only owes the wake-up.
        let history = self.read_history(&task.workflow_id).await?;
        if history.iter().any(|recorded| recorded.kind.resolved_command() == Some(task.command_id)) {
            debug!(
                event_name = "activity.task.already_resolved",
                workflow_id = %task.workflow_id,
                command_id = %task.command_id,
                "outcome already recorded; re-sending the wake-up only"
            );
            return self.wake(task, &execution.task_queue).await;
        }

        let started = EventKind::ActivityStarted {
            command_id: task.command_id,
            attempt: task.attempt,
            worker_id: self.config.worker_id.clone(),
        };
        if !self.append_unless_closed(&task.workflow_id, started).await? {
            return Ok(());
        }

        let outcome = self.execute_with_heartbeat(task, lease).await;
        let event = match self.executor.resolve(task, outcome) {
            Resolution::Retry { next, delay, .. } => {
                // Cancellation closes the execution; no new attempts after that.
                let still_open = self
                    .find_execution(&task.workflow_id)
                    .await?
                    .map(|execution| !execution.status.is_terminal())
                    .unwrap_or(false);
                if still_open {
                    let queue = next.task_queue.clone();
                    self.enqueue(&queue, QueuedTask::Activity(next), delay).await?;
                }
                return Ok(());
            }
            Resolution::Completed(result) => {
                info!(
                    event_name = "activity.completed",
                    workflow_id = %task.workflow_id,
                    activity_type = %task.activity_type,
                    attempt = task.attempt,
                    "activity completed"
                );
                EventKind::ActivityCompleted {
                    command_id: task.command_id,
                    attempt: task.attempt,
                    result,
                }
            }
            Resolution::Failed(error) => {
                warn!(
                    event_name = "activity.failed",
                    workflow_id = %task.workflow_id,
                    activity_type = %task.activity_type,
                    attempt = task.attempt,
                    error = %error,
                    "activity failed permanently"
                );
                EventKind::ActivityFailed { command_id: task.command_id, attempt: task.attempt, error }
            }
            Resolution::TimedOut { timeout } => {
                let timeout_ms = timeout.as_millis() as u64;
                warn!(
                    event_name = "activity.timed_out",
                    workflow_id = %task.workflow_id,
                    activity_type = %task.activity_type,
                    attempt = task.attempt,
                    timeout_ms,
                    "activity timed out on its last attempt"
                );
                EventKind::ActivityTimedOut {
                    command_id: task.command_id,
                    attempt: task.attempt,
                    timeout_ms,
                }
            }
        };

        match self.record_outcome(task, event).await? {
            Recorded::Closed => {
                info!(
                    event_name = "activity.outcome.discarded",
                    workflow_id = %task.workflow_id,
                    command_id = %task.command_id,
                    "execution closed before the outcome arrived"
                );
                Ok(())
            }
            Recorded::Appended | Recorded::Duplicate => self.wake(task, &execution.task_queue).await,
        }
    }

    /// Runs one attempt while extending its queue claim every half lease
    /// window, so a slow attempt is not redelivered to another worker.
    async fn execute_with_heartbeat(&self, task: &ActivityTask, lease: &Lease) -> ActivityOutcome {
        let every = (self.queue.lease_window() / 2).max(Duration::from_millis(10));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + every, every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let attempt = self.executor.execute(task);
        tokio::pin!(attempt);
        loop {
            tokio::select! {
                outcome = &mut attempt => return outcome,
                _ = heartbeat.tick() => {
                    if let Err(error) = self.queue.extend(lease).await {
                        warn!(
                            event_name = "activity.heartbeat.failed",
                            workflow_id = %task.workflow_id,
                            delivery_id = %lease.delivery_id,
                            error = %error,
                            "could not extend the queue claim of a running attempt"
                        );
                    }
                }
            }
        }
    }

    /// Tells the workflow that one of its commands resolved.
    async fn wake(&self, task: &ActivityTask, queue: &str) -> Result<(), WorkerError> {
        let wake = WorkflowTask {
            workflow_id: task.workflow_id.clone(),
            run_id: task.run_id.clone(),
            reason: WorkflowTaskReason::ActivityResolved { command_id: task.command_id },
        };
        self.enqueue(queue, QueuedTask::Workflow(wake), Duration::ZERO).await?;
        Ok(())
    }

    async fn record_outcome(
        &self,
        task: &ActivityTask,
        event: EventKind,
    ) -> Result<Recorded, WorkerError> {
        let lease = self.acquire(&task.workflow_id).await?;
        let written: Result<Recorded, WorkerError> = async {
            let history = self.read_history(&task.workflow_id).await?;
            let resolved = history
                .iter()
                .any(|recorded| recorded.kind.resolved_command() == Some(task.command_id));
            if resolved {
                debug!(
                    event_name = "activity.outcome.duplicate",
                    workflow_id = %task.workflow_id,
                    command_id = %task.command_id,
                    "outcome already recorded by another delivery"
                );
                return Ok(Recorded::Duplicate);
            }
            self.append(&lease, vec![event]).await?;
            Ok(Recorded::Appended)
        }
        .await;
        self.release(&lease).await;

        match written {
            Err(WorkerError::Log(LogError::ExecutionClosed { .. })) => Ok(Recorded::Closed),
            other => other,
        }
    }

    /// Appends one event under a short-lived lease. `false` if the execution closed.
    async fn append_unless_closed(
        &self,
        workflow_id: &WorkflowId,
        event: EventKind,
    ) -> Result<bool, WorkerError> {
        let lease = match self.acquire(workflow_id).await {
            Ok(lease) => lease,
            Err(WorkerError::Log(LogError::NotFound(_))) => return Ok(false),
            Err(error) => return Err(error),
        };
        let appended = self.append(&lease, vec![event]).await;
        self.release(&lease).await;

        match appended {
            Ok(_) => Ok(true),
            Err(WorkerError::Log(LogError::ExecutionClosed { .. })) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn find_execution(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowExecution>, WorkerError> {
        Ok(retry_transient(&self.config.infra_retry, "log.find_execution", || {
            self.log.find_execution(workflow_id)
        })
        .await?)
    }

    async fn read_history(&self, workflow_id: &WorkflowId) -> Result<Vec<HistoryEvent>, WorkerError> {
        Ok(retry_transient(&self.config.infra_retry, "log.read_from", || {
            self.log.read_from(workflow_id, 1)
        })
        .await?)
    }

    async fn acquire(&self, workflow_id: &WorkflowId) -> Result<LeaseToken, WorkerError> {
        Ok(retry_transient(&self.config.infra_retry, "log.acquire_lease", || {
            self.log.acquire_lease(workflow_id, &self.config.worker_id, self.config.history_lease_ttl)
        })
        .await?)
    }

    async fn append(
        &self,
        lease: &LeaseToken,
        events: Vec<EventKind>,
    ) -> Result<Vec<SequenceNo>, WorkerError> {
        Ok(retry_transient(&self.config.infra_retry, "log.append_batch", || {
            self.log.append_batch(lease, events.clone())
        })
        .await?)
    }

    async fn release(&self, lease: &LeaseToken) {
        if let Err(error) = self.log.release_lease(lease).await {
            // Expires on its own.
            warn!(
                event_name = "log.lease.release_failed",
                workflow_id = %lease.workflow_id,
                error = %error,
                "could not release history lease"
            );
        }
    }

    async fn enqueue(
        &self,
        queue: &str,
        task: QueuedTask,
        delay: Duration,
    ) -> Result<DeliveryId, WorkerError> {
        Ok(retry_transient(&self.config.infra_retry, "queue.enqueue", || {
            self.queue.enqueue_after(queue, task.clone(), delay)
        })
        .await?)
    }
}
