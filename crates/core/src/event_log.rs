//! Append-only history per workflow execution.
//!
//! The log is the only durable source of truth for replay. Appends are guarded
//! by a single-writer lease so at most one engine advances an execution at a
//! time; reads are side-effect free and may start from any sequence number.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::backoff::Transient;
use crate::domain::event::{EventKind, HistoryEvent, SequenceNo};
use crate::domain::execution::{WorkflowExecution, WorkflowId, WorkflowStatus};
use crate::errors::ErrorClass;

/// Proof of exclusive write access to one execution's history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseToken {
    pub workflow_id: WorkflowId,
    pub owner: String,
    pub token: String,
}

impl LeaseToken {
    pub fn issue(workflow_id: &WorkflowId, owner: &str) -> Self {
        Self {
            workflow_id: workflow_id.clone(),
            owner: owner.to_string(),
            token: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("event log unavailable: {0}")]
    Unavailable(String),
    #[error("workflow `{workflow_id}` already exists with status {status}")]
    ExecutionExists { workflow_id: WorkflowId, status: WorkflowStatus },
    #[error("workflow `{0}` not found")]
    NotFound(WorkflowId),
    #[error("history of `{workflow_id}` is leased by `{owner}`")]
    LeaseHeld { workflow_id: WorkflowId, owner: String },
    #[error("lease on `{0}` expired or was taken over")]
    LeaseLost(WorkflowId),
    #[error("workflow `{workflow_id}` is closed ({status})")]
    ExecutionClosed { workflow_id: WorkflowId, status: WorkflowStatus },
    #[error("corrupt history record: {0}")]
    Corrupt(String),
}

impl LogError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable(_) | Self::LeaseHeld { .. } | Self::LeaseLost(_) => {
                ErrorClass::LogUnavailable
            }
            Self::ExecutionExists { .. } | Self::ExecutionClosed { .. } => ErrorClass::Conflict,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Corrupt(_) => ErrorClass::DeterminismViolation,
        }
    }
}

impl Transient for LogError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::LeaseHeld { .. })
    }
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Creates the execution record and appends `started` as sequence 1.
    async fn create_execution(
        &self,
        execution: WorkflowExecution,
        started: EventKind,
    ) -> Result<HistoryEvent, LogError>;

    async fn find_execution(&self, id: &WorkflowId) -> Result<Option<WorkflowExecution>, LogError>;

    async fn acquire_lease(
        &self,
        id: &WorkflowId,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseToken, LogError>;

    async fn release_lease(&self, lease: &LeaseToken) -> Result<(), LogError>;

    /// Appends all events atomically, in order. Closing events also move the
    /// execution to its terminal status in the same write.
    async fn append_batch(
        &self,
        lease: &LeaseToken,
        events: Vec<EventKind>,
    ) -> Result<Vec<SequenceNo>, LogError>;

    async fn append(&self, lease: &LeaseToken, event: EventKind) -> Result<SequenceNo, LogError> {
        let sequences = self.append_batch(lease, vec![event]).await?;
        sequences.last().copied().ok_or_else(|| LogError::Corrupt("empty append".to_string()))
    }

    /// Events with `sequence >= from`, ordered by sequence.
    async fn read_from(
        &self,
        id: &WorkflowId,
        from: SequenceNo,
    ) -> Result<Vec<HistoryEvent>, LogError>;
}

/// Checks a batch against the execution's state before it is written.
pub fn check_appendable(
    workflow_id: &WorkflowId,
    status: WorkflowStatus,
    events: &[EventKind],
) -> Result<(), LogError> {
    if status.is_terminal() {
        return Err(LogError::ExecutionClosed { workflow_id: workflow_id.clone(), status });
    }
    let closing = events.iter().position(|event| event.terminal_status().is_some());
    if let Some(index) = closing {
        if index + 1 != events.len() {
            return Err(LogError::Corrupt(format!(
                "closing event `{}` must be the last event of a batch",
                events[index].as_str()
            )));
        }
    }
    Ok(())
}

struct HeldLease {
    owner: String,
    token: String,
    expires_at: Instant,
}

struct ExecutionRecord {
    execution: WorkflowExecution,
    events: Vec<HistoryEvent>,
    lease: Option<HeldLease>,
}

#[derive(Default)]
pub struct InMemoryEventLog {
    executions: RwLock<HashMap<WorkflowId, ExecutionRecord>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn create_execution(
        &self,
        execution: WorkflowExecution,
        started: EventKind,
    ) -> Result<HistoryEvent, LogError> {
        let mut executions = self.executions.write().await;
        if let Some(existing) = executions.get(&execution.workflow_id) {
            return Err(LogError::ExecutionExists {
                workflow_id: execution.workflow_id.clone(),
                status: existing.execution.status,
            });
        }

        let event = HistoryEvent { sequence: 1, recorded_at: Utc::now(), kind: started };
        executions.insert(
            execution.workflow_id.clone(),
            ExecutionRecord { execution, events: vec![event.clone()], lease: None },
        );
        Ok(event)
    }

    async fn find_execution(&self, id: &WorkflowId) -> Result<Option<WorkflowExecution>, LogError> {
        Ok(self.executions.read().await.get(id).map(|record| record.execution.clone()))
    }

    async fn acquire_lease(
        &self,
        id: &WorkflowId,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseToken, LogError> {
        let mut executions = self.executions.write().await;
        let record = executions.get_mut(id).ok_or_else(|| LogError::NotFound(id.clone()))?;

        let now = Instant::now();
        if let Some(held) = &record.lease {
            if held.expires_at > now {
                return Err(LogError::LeaseHeld { workflow_id: id.clone(), owner: held.owner.clone() });
            }
        }

        let lease = LeaseToken::issue(id, owner);
        record.lease = Some(HeldLease {
            owner: lease.owner.clone(),
            token: lease.token.clone(),
            expires_at: now + ttl,
        });
        Ok(lease)
    }

    async fn release_lease(&self, lease: &LeaseToken) -> Result<(), LogError> {
        let mut executions = self.executions.write().await;
        if let Some(record) = executions.get_mut(&lease.workflow_id) {
            let matches = record.lease.as_ref().map(|held| held.token == lease.token).unwrap_or(false);
            if matches {
                record.lease = None;
            }
        }
        Ok(())
    }

    async fn append_batch(
        &self,
        lease: &LeaseToken,
        events: Vec<EventKind>,
    ) -> Result<Vec<SequenceNo>, LogError> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(&lease.workflow_id)
            .ok_or_else(|| LogError::NotFound(lease.workflow_id.clone()))?;

        let valid = record
            .lease
            .as_ref()
            .map(|held| held.token == lease.token && held.expires_at > Instant::now())
            .unwrap_or(false);
        if !valid {
            return Err(LogError::LeaseLost(lease.workflow_id.clone()));
        }
        check_appendable(&lease.workflow_id, record.execution.status, &events)?;

        let now = Utc::now();
        let mut next = record.events.last().map(|event| event.sequence).unwrap_or(0) + 1;
        let mut sequences = Vec::with_capacity(events.len());
        for kind in events {
            if let Some(status) = kind.terminal_status() {
                record.execution.status = status;
                record.execution.closed_at = Some(now);
            }
            record.events.push(HistoryEvent { sequence: next, recorded_at: now, kind });
            sequences.push(next);
            next += 1;
        }
        record.execution.updated_at = now;
        Ok(sequences)
    }

    async fn read_from(
        &self,
        id: &WorkflowId,
        from: SequenceNo,
    ) -> Result<Vec<HistoryEvent>, LogError> {
        let executions = self.executions.read().await;
        let record = executions.get(id).ok_or_else(|| LogError::NotFound(id.clone()))?;
        Ok(record.events.iter().filter(|event| event.sequence >= from).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{EventLog, InMemoryEventLog, LogError};
    use crate::domain::event::EventKind;
    use crate::domain::execution::{WorkflowExecution, WorkflowId, WorkflowOptions, WorkflowStatus};
    use crate::domain::payload::Payload;

    const TTL: Duration = Duration::from_secs(30);

    async fn started_log(id: &str) -> (InMemoryEventLog, WorkflowExecution) {
        let log = InMemoryEventLog::new();
        let execution = WorkflowExecution::new(
            WorkflowId::from(id),
            "demo",
            Payload::empty(),
            &WorkflowOptions::on_queue("q"),
        );
        let started = EventKind::WorkflowStarted {
            workflow_type: "demo".to_string(),
            run_id: execution.run_id.clone(),
            input: Payload::empty(),
        };
        log.create_execution(execution.clone(), started).await.expect("create execution");
        (log, execution)
    }

    fn cancel(reason: &str) -> EventKind {
        EventKind::CancelRequested { reason: reason.to_string() }
    }

    #[tokio::test]
    async fn duplicate_creation_reports_existing_status() {
        let (log, execution) = started_log("wf-dup").await;
        let started = EventKind::WorkflowStarted {
            workflow_type: "demo".to_string(),
            run_id: execution.run_id.clone(),
            input: Payload::empty(),
        };

        let error = log.create_execution(execution.clone(), started).await.expect_err("duplicate");
        assert_eq!(
            error,
            LogError::ExecutionExists {
                workflow_id: execution.workflow_id.clone(),
                status: WorkflowStatus::Running
            }
        );
    }

    #[tokio::test]
    async fn appends_require_the_current_lease_and_sequences_increase() {
        let (log, execution) = started_log("wf-seq").await;
        let id = execution.workflow_id.clone();

        let lease = log.acquire_lease(&id, "worker-a", TTL).await.expect("lease");
        let held = log.acquire_lease(&id, "worker-b", TTL).await.expect_err("second lease");
        assert!(matches!(held, LogError::LeaseHeld { ref owner, .. } if owner == "worker-a"));

        let sequences =
            log.append_batch(&lease, vec![cancel("a"), cancel("b")]).await.expect("append batch");
        assert_eq!(sequences, vec![2, 3]);

        log.release_lease(&lease).await.expect("release");
        let stale = log.append(&lease, cancel("c")).await.expect_err("released lease");
        assert_eq!(stale, LogError::LeaseLost(id.clone()));

        let history = log.read_from(&id, 0).await.expect("read");
        let sequences: Vec<u64> = history.iter().map(|event| event.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(log.read_from(&id, 3).await.expect("read tail").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_leases_can_be_taken_over() {
        let (log, execution) = started_log("wf-expire").await;
        let id = execution.workflow_id.clone();

        let first = log.acquire_lease(&id, "worker-a", TTL).await.expect("lease");
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        let second = log.acquire_lease(&id, "worker-b", TTL).await.expect("take over");
        assert_eq!(
            log.append(&first, cancel("late")).await.expect_err("old holder"),
            LogError::LeaseLost(id.clone())
        );
        assert_eq!(log.append(&second, cancel("fresh")).await.expect("new holder"), 2);
    }

    #[tokio::test]
    async fn closing_event_updates_status_and_rejects_later_appends() {
        let (log, execution) = started_log("wf-close").await;
        let id = execution.workflow_id.clone();
        let lease = log.acquire_lease(&id, "worker-a", TTL).await.expect("lease");

        log.append(&lease, EventKind::WorkflowCompleted { result: Payload::empty() })
            .await
            .expect("complete");

        let stored = log.find_execution(&id).await.expect("find").expect("exists");
        assert_eq!(stored.status, WorkflowStatus::Completed);
        assert!(stored.closed_at.is_some());

        let error = log.append(&lease, cancel("too late")).await.expect_err("closed");
        assert!(matches!(error, LogError::ExecutionClosed { status: WorkflowStatus::Completed, .. }));
    }

    #[tokio::test]
    async fn closing_event_must_end_its_batch() {
        let (log, execution) = started_log("wf-batch").await;
        let lease =
            log.acquire_lease(&execution.workflow_id, "worker-a", TTL).await.expect("lease");

        let error = log
            .append_batch(&lease, vec![EventKind::WorkflowTimedOut, cancel("after close")])
            .await
            .expect_err("closing event in the middle");
        assert!(matches!(error, LogError::Corrupt(_)));
        assert_eq!(log.read_from(&execution.workflow_id, 0).await.expect("read").len(), 1);
    }
}
