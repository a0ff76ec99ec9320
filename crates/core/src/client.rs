//! Caller-side API: start executions, wait for results, request cancellation.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::backoff::{infrastructure_policy, retry_transient};
use crate::domain::activity::RetryPolicy;
use crate::domain::event::{EventKind, HistoryEvent};
use crate::domain::execution::{
    RunId, WorkflowExecution, WorkflowId, WorkflowOptions, WorkflowStatus,
};
use crate::domain::payload::{Payload, PayloadError};
use crate::errors::{ErrorClass, WorkflowError};
use crate::event_log::{EventLog, LogError};
use crate::queue::{QueueError, QueuedTask, TaskQueue, WorkflowTask, WorkflowTaskReason};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("workflow `{0}` is already running")]
    AlreadyRunning(WorkflowId),
    #[error("workflow `{workflow_id}` already exists and is {status}")]
    AlreadyExists { workflow_id: WorkflowId, status: WorkflowStatus },
    #[error("workflow `{0}` not found")]
    NotFound(WorkflowId),
    #[error(transparent)]
    Workflow(WorkflowError),
    #[error(transparent)]
    Log(LogError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl ClientError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyRunning(_) | Self::AlreadyExists { .. } => ErrorClass::Conflict,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Workflow(error) => error.class(),
            Self::Log(error) => error.class(),
            Self::Queue(error) => error.class(),
            Self::Payload(_) => ErrorClass::InvalidPayload,
        }
    }
}

impl From<LogError> for ClientError {
    fn from(error: LogError) -> Self {
        match error {
            LogError::NotFound(id) => Self::NotFound(id),
            other => Self::Log(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub identity: String,
    pub result_poll_interval: Duration,
    /// Lease TTL used when the client itself appends (cancellation).
    pub history_lease_ttl: Duration,
    pub infra_retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            identity: "client".to_string(),
            result_poll_interval: Duration::from_millis(200),
            history_lease_ttl: Duration::from_secs(10),
            infra_retry: infrastructure_policy(),
        }
    }
}

#[derive(Clone)]
pub struct WorkflowClient {
    log: Arc<dyn EventLog>,
    queue: Arc<dyn TaskQueue>,
    config: ClientConfig,
}

impl WorkflowClient {
    pub fn new(log: Arc<dyn EventLog>, queue: Arc<dyn TaskQueue>) -> Self {
        Self::with_config(log, queue, ClientConfig::default())
    }

    pub fn with_config(
        log: Arc<dyn EventLog>,
        queue: Arc<dyn TaskQueue>,
        config: ClientConfig,
    ) -> Self {
        Self { log, queue, config }
    }

    /// Records `WorkflowStarted` and enqueues the first workflow task.
    ///
    /// Ids are unique for all time: an id whose execution has closed cannot be
    /// reused and fails with [`ClientError::AlreadyExists`].
    pub async fn start_workflow(
        &self,
        workflow_type: &str,
        workflow_id: impl Into<WorkflowId>,
        input: Payload,
        options: WorkflowOptions,
    ) -> Result<WorkflowHandle, ClientError> {
        let workflow_id = workflow_id.into();
        let execution = WorkflowExecution::new(workflow_id.clone(), workflow_type, input.clone(), &options);
        let run_id = execution.run_id.clone();
        let started = EventKind::WorkflowStarted {
            workflow_type: workflow_type.to_string(),
            run_id: run_id.clone(),
            input,
        };

        let created = retry_transient(&self.config.infra_retry, "log.create_execution", || {
            self.log.create_execution(execution.clone(), started.clone())
        })
        .await;
        match created {
            Ok(_) => {}
            Err(LogError::ExecutionExists { workflow_id, status }) => {
                return Err(if status == WorkflowStatus::Running {
                    ClientError::AlreadyRunning(workflow_id)
                } else {
                    ClientError::AlreadyExists { workflow_id, status }
                });
            }
            Err(error) => return Err(error.into()),
        }

        let first = WorkflowTask {
            workflow_id: workflow_id.clone(),
            run_id: run_id.clone(),
            reason: WorkflowTaskReason::Started,
        };
        self.enqueue(&options.task_queue, first, Duration::ZERO).await?;

        if let Some(timeout) = options.execution_timeout {
            let check = WorkflowTask {
                workflow_id: workflow_id.clone(),
                run_id: run_id.clone(),
                reason: WorkflowTaskReason::TimeoutCheck,
            };
            self.enqueue(&options.task_queue, check, timeout).await?;
        }

        info!(
            event_name = "workflow.started",
            workflow_id = %workflow_id,
            run_id = %run_id,
            workflow_type,
            task_queue = %options.task_queue,
            "workflow execution started"
        );
        Ok(self.handle_for(workflow_id, Some(run_id)))
    }

    pub async fn start_typed<I: Serialize>(
        &self,
        workflow_type: &str,
        workflow_id: impl Into<WorkflowId>,
        input: &I,
        options: WorkflowOptions,
    ) -> Result<WorkflowHandle, ClientError> {
        let input = Payload::encode(input)?;
        self.start_workflow(workflow_type, workflow_id, input, options).await
    }

    /// Handle to an existing execution; does not check that it exists.
    pub fn handle(&self, workflow_id: impl Into<WorkflowId>) -> WorkflowHandle {
        self.handle_for(workflow_id.into(), None)
    }

    /// Enqueues a workflow task for a running execution. Repairs executions
    /// whose first task was never enqueued or whose scheduled activities were
    /// lost before reaching the queue.
    pub async fn resume(&self, workflow_id: impl Into<WorkflowId>) -> Result<(), ClientError> {
        let workflow_id = workflow_id.into();
        let execution = self.execution(&workflow_id).await?;
        if execution.status.is_terminal() {
            return Err(ClientError::AlreadyExists { workflow_id, status: execution.status });
        }
        let task = WorkflowTask {
            workflow_id: workflow_id.clone(),
            run_id: execution.run_id.clone(),
            reason: WorkflowTaskReason::Resume,
        };
        self.enqueue(&execution.task_queue, task, Duration::ZERO).await?;
        info!(event_name = "workflow.resumed", workflow_id = %workflow_id, "workflow task enqueued");
        Ok(())
    }

    fn handle_for(&self, workflow_id: WorkflowId, run_id: Option<RunId>) -> WorkflowHandle {
        WorkflowHandle { client: self.clone(), workflow_id, run_id }
    }

    async fn execution(&self, workflow_id: &WorkflowId) -> Result<WorkflowExecution, ClientError> {
        retry_transient(&self.config.infra_retry, "log.find_execution", || {
            self.log.find_execution(workflow_id)
        })
        .await?
        .ok_or_else(|| ClientError::NotFound(workflow_id.clone()))
    }

    async fn history(&self, workflow_id: &WorkflowId) -> Result<Vec<HistoryEvent>, ClientError> {
        Ok(retry_transient(&self.config.infra_retry, "log.read_from", || {
            self.log.read_from(workflow_id, 1)
        })
        .await?)
    }

    async fn enqueue(
        &self,
        queue: &str,
        task: WorkflowTask,
        delay: Duration,
    ) -> Result<(), ClientError> {
        let task = QueuedTask::Workflow(task);
        retry_transient(&self.config.infra_retry, "queue.enqueue", || {
            self.queue.enqueue_after(queue, task.clone(), delay)
        })
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct WorkflowHandle {
    client: WorkflowClient,
    workflow_id: WorkflowId,
    run_id: Option<RunId>,
}

impl std::fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("workflow_id", &self.workflow_id)
            .field("run_id", &self.run_id)
            .finish()
    }
}

impl WorkflowHandle {
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    pub async fn status(&self) -> Result<WorkflowStatus, ClientError> {
        Ok(self.client.execution(&self.workflow_id).await?.status)
    }

    pub async fn history(&self) -> Result<Vec<HistoryEvent>, ClientError> {
        // Surface NotFound rather than an empty history.
        self.client.execution(&self.workflow_id).await?;
        self.client.history(&self.workflow_id).await
    }

    /// Waits until the execution closes. Completed runs yield their result;
    /// every other terminal state yields [`ClientError::Workflow`].
    pub async fn result(&self) -> Result<Payload, ClientError> {
        loop {
            let execution = self.client.execution(&self.workflow_id).await?;
            if execution.status.is_terminal() {
                return self.closing_outcome().await;
            }
            tokio::time::sleep(self.client.config.result_poll_interval).await;
        }
    }

    pub async fn result_as<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(self.result().await?.decode()?)
    }

    /// Records a cancellation request and wakes the workflow so it can close.
    /// Requests against closed executions are ignored.
    pub async fn cancel(&self, reason: impl Into<String>) -> Result<(), ClientError> {
        let reason = reason.into();
        let execution = self.client.execution(&self.workflow_id).await?;
        if execution.status.is_terminal() {
            return Ok(());
        }

        let config = &self.client.config;
        let lease = retry_transient(&config.infra_retry, "log.acquire_lease", || {
            self.client.log.acquire_lease(&self.workflow_id, &config.identity, config.history_lease_ttl)
        })
        .await?;
        let event = EventKind::CancelRequested { reason: reason.clone() };
        let appended = retry_transient(&config.infra_retry, "log.append", || {
            self.client.log.append(&lease, event.clone())
        })
        .await;
        if let Err(error) = self.client.log.release_lease(&lease).await {
            // Expires on its own.
            warn!(
                event_name = "log.lease.release_failed",
                workflow_id = %self.workflow_id,
                error = %error,
                "could not release history lease after cancel request"
            );
        }

        match appended {
            Ok(_) => {}
            Err(LogError::ExecutionClosed { .. }) => return Ok(()),
            Err(error) => return Err(error.into()),
        }

        let task = WorkflowTask {
            workflow_id: self.workflow_id.clone(),
            run_id: execution.run_id.clone(),
            reason: WorkflowTaskReason::CancelRequested,
        };
        self.client.enqueue(&execution.task_queue, task, Duration::ZERO).await?;
        info!(
            event_name = "workflow.cancel.requested",
            workflow_id = %self.workflow_id,
            reason = %reason,
            "cancellation requested"
        );
        Ok(())
    }

    async fn closing_outcome(&self) -> Result<Payload, ClientError> {
        let history = self.client.history(&self.workflow_id).await?;
        let closing = history.iter().rev().find(|event| event.kind.terminal_status().is_some());
        match closing.map(|event| &event.kind) {
            Some(EventKind::WorkflowCompleted { result }) => Ok(result.clone()),
            Some(EventKind::WorkflowFailed { error }) => Err(ClientError::Workflow(error.clone())),
            Some(EventKind::WorkflowTimedOut) => Err(ClientError::Workflow(WorkflowError::TimedOut)),
            Some(EventKind::WorkflowCanceled { reason }) => {
                Err(ClientError::Workflow(WorkflowError::Canceled { reason: reason.clone() }))
            }
            _ => Err(ClientError::Log(LogError::Corrupt(format!(
                "execution `{}` is closed but its history has no closing event",
                self.workflow_id
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::{ClientError, WorkflowClient};
    use crate::domain::event::{EventKind, HistoryEvent, SequenceNo};
    use crate::domain::execution::{WorkflowExecution, WorkflowId, WorkflowOptions, WorkflowStatus};
    use crate::domain::payload::Payload;
    use crate::errors::ErrorClass;
    use crate::event_log::{EventLog, InMemoryEventLog, LeaseToken, LogError};
    use crate::queue::{InMemoryTaskQueue, QueuedTask, TaskQueue, WorkflowTaskReason};

    /// Delegates to the in-memory log but can never release a lease.
    struct StuckRelease(InMemoryEventLog);

    #[async_trait]
    impl EventLog for StuckRelease {
        async fn create_execution(
            &self,
            execution: WorkflowExecution,
            started: EventKind,
        ) -> Result<HistoryEvent, LogError> {
            self.0.create_execution(execution, started).await
        }

        async fn find_execution(&self, id: &WorkflowId) -> Result<Option<WorkflowExecution>, LogError> {
            self.0.find_execution(id).await
        }

        async fn acquire_lease(
            &self,
            id: &WorkflowId,
            owner: &str,
            ttl: Duration,
        ) -> Result<LeaseToken, LogError> {
            self.0.acquire_lease(id, owner, ttl).await
        }

        async fn release_lease(&self, _lease: &LeaseToken) -> Result<(), LogError> {
            Err(LogError::Unavailable("release refused".to_string()))
        }

        async fn append_batch(
            &self,
            lease: &LeaseToken,
            events: Vec<EventKind>,
        ) -> Result<Vec<SequenceNo>, LogError> {
            self.0.append_batch(lease, events).await
        }

        async fn read_from(
            &self,
            id: &WorkflowId,
            from: SequenceNo,
        ) -> Result<Vec<HistoryEvent>, LogError> {
            self.0.read_from(id, from).await
        }
    }

    fn client() -> (WorkflowClient, Arc<InMemoryTaskQueue>) {
        let queue = Arc::new(InMemoryTaskQueue::default());
        let client = WorkflowClient::new(Arc::new(InMemoryEventLog::new()), queue.clone());
        (client, queue)
    }

    #[tokio::test]
    async fn start_records_history_and_enqueues_the_first_task() {
        let (client, queue) = client();
        let handle = client
            .start_workflow("demo", "wf-1", Payload::from(json!({ "n": 1 })), WorkflowOptions::on_queue("q"))
            .await
            .expect("started");

        assert_eq!(handle.status().await.expect("status"), WorkflowStatus::Running);
        let history = handle.history().await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind.as_str(), "workflow_started");

        let lease = queue.try_claim("q", "test").await.expect("claim").expect("task");
        match lease.task {
            QueuedTask::Workflow(task) => assert_eq!(task.reason, WorkflowTaskReason::Started),
            other => panic!("unexpected task {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_start_of_a_running_workflow_is_rejected() {
        let (client, _queue) = client();
        let options = WorkflowOptions::on_queue("q");
        client.start_workflow("demo", "wf-1", Payload::empty(), options.clone()).await.expect("first");

        let error = client
            .start_workflow("demo", "wf-1", Payload::empty(), options)
            .await
            .expect_err("duplicate");
        assert!(matches!(error, ClientError::AlreadyRunning(_)));
        assert_eq!(error.class(), ErrorClass::Conflict);
    }

    #[tokio::test]
    async fn execution_timeout_schedules_a_delayed_check() {
        let (client, queue) = client();
        client
            .start_workflow(
                "demo",
                "wf-1",
                Payload::empty(),
                WorkflowOptions::on_queue("q").with_execution_timeout(Duration::from_secs(60)),
            )
            .await
            .expect("started");

        assert_eq!(queue.depth("q").await.expect("depth"), 2);
        queue.try_claim("q", "test").await.expect("claim").expect("first task");
        assert!(queue.try_claim("q", "test").await.expect("claim").is_none(), "check is delayed");
    }

    #[tokio::test]
    async fn unknown_workflows_are_not_found() {
        let (client, _queue) = client();
        let handle = client.handle("missing");
        assert!(matches!(handle.status().await, Err(ClientError::NotFound(_))));
        assert!(matches!(handle.cancel("no").await, Err(ClientError::NotFound(_))));
        assert!(matches!(client.resume("missing").await, Err(ClientError::NotFound(_))));
    }

    #[tokio::test]
    async fn cancel_appends_a_request_and_wakes_the_workflow() {
        let (client, queue) = client();
        let handle = client
            .start_workflow("demo", "wf-1", Payload::empty(), WorkflowOptions::on_queue("q"))
            .await
            .expect("started");
        let first = queue.try_claim("q", "test").await.expect("claim").expect("start task");
        queue.ack(&first).await.expect("ack");

        handle.cancel("operator").await.expect("cancel");
        let history = handle.history().await.expect("history");
        assert_eq!(history.last().map(|event| event.kind.as_str()), Some("cancel_requested"));

        let wake = queue.try_claim("q", "test").await.expect("claim").expect("cancel task");
        assert!(matches!(
            wake.task,
            QueuedTask::Workflow(ref task) if task.reason == WorkflowTaskReason::CancelRequested
        ));
    }

    #[tokio::test]
    async fn cancel_still_wakes_the_workflow_when_the_lease_cannot_be_released() {
        let queue = Arc::new(InMemoryTaskQueue::default());
        let client = WorkflowClient::new(Arc::new(StuckRelease(InMemoryEventLog::new())), queue.clone());
        let handle = client
            .start_workflow("demo", "wf-stuck", Payload::empty(), WorkflowOptions::on_queue("q"))
            .await
            .expect("started");
        let first = queue.try_claim("q", "test").await.expect("claim").expect("start task");
        queue.ack(&first).await.expect("ack");

        handle.cancel("operator").await.expect("cancel despite release failure");
        let history = handle.history().await.expect("history");
        assert_eq!(history.last().map(|event| event.kind.as_str()), Some("cancel_requested"));
        assert!(queue.try_claim("q", "test").await.expect("claim").is_some(), "wake task enqueued");
    }
}
