use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::payload::Payload;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkflowId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
    Canceled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-facing knobs for a new execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowOptions {
    pub task_queue: String,
    pub execution_timeout: Option<Duration>,
}

impl WorkflowOptions {
    pub fn on_queue(task_queue: impl Into<String>) -> Self {
        Self { task_queue: task_queue.into(), execution_timeout: None }
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: WorkflowId,
    pub run_id: RunId,
    pub workflow_type: String,
    pub task_queue: String,
    pub input: Payload,
    pub status: WorkflowStatus,
    pub execution_timeout: Option<Duration>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn new(
        workflow_id: WorkflowId,
        workflow_type: impl Into<String>,
        input: Payload,
        options: &WorkflowOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            run_id: RunId::generate(),
            workflow_type: workflow_type.into(),
            task_queue: options.task_queue.clone(),
            input,
            status: WorkflowStatus::Running,
            execution_timeout: options.execution_timeout,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Wall-clock instant after which the execution is timed out, if bounded.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let timeout = self.execution_timeout?;
        let timeout = chrono::Duration::from_std(timeout).ok()?;
        self.created_at.checked_add_signed(timeout)
    }

    pub fn deadline_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.deadline().map(|deadline| now >= deadline).unwrap_or(false)
    }
}
