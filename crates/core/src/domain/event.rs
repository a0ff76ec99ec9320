use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::activity::{ActivityError, ActivityOptions, ActivityTaskId, CommandId};
use crate::domain::execution::{RunId, WorkflowStatus};
use crate::domain::payload::Payload;
use crate::errors::WorkflowError;

pub type SequenceNo = u64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStarted {
        workflow_type: String,
        run_id: RunId,
        input: Payload,
    },
    ActivityScheduled {
        command_id: CommandId,
        task_id: ActivityTaskId,
        activity_type: String,
        input: Payload,
        options: ActivityOptions,
    },
    ActivityStarted {
        command_id: CommandId,
        attempt: u32,
        worker_id: String,
    },
    ActivityCompleted {
        command_id: CommandId,
        attempt: u32,
        result: Payload,
    },
    ActivityFailed {
        command_id: CommandId,
        attempt: u32,
        error: ActivityError,
    },
    ActivityTimedOut {
        command_id: CommandId,
        attempt: u32,
        timeout_ms: u64,
    },
    CancelRequested {
        reason: String,
    },
    WorkflowCompleted {
        result: Payload,
    },
    WorkflowFailed {
        error: WorkflowError,
    },
    WorkflowTimedOut,
    WorkflowCanceled {
        reason: String,
    },
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::ActivityScheduled { .. } => "activity_scheduled",
            Self::ActivityStarted { .. } => "activity_started",
            Self::ActivityCompleted { .. } => "activity_completed",
            Self::ActivityFailed { .. } => "activity_failed",
            Self::ActivityTimedOut { .. } => "activity_timed_out",
            Self::CancelRequested { .. } => "cancel_requested",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
            Self::WorkflowTimedOut => "workflow_timed_out",
            Self::WorkflowCanceled { .. } => "workflow_canceled",
        }
    }

    /// Status the execution enters when this event is appended, if it closes it.
    pub fn terminal_status(&self) -> Option<WorkflowStatus> {
        match self {
            Self::WorkflowCompleted { .. } => Some(WorkflowStatus::Completed),
            Self::WorkflowFailed { .. } => Some(WorkflowStatus::Failed),
            Self::WorkflowTimedOut => Some(WorkflowStatus::TimedOut),
            Self::WorkflowCanceled { .. } => Some(WorkflowStatus::Canceled),
            _ => None,
        }
    }

    /// Command whose outcome this event records.
    pub fn resolved_command(&self) -> Option<CommandId> {
        match self {
            Self::ActivityCompleted { command_id, .. }
            | Self::ActivityFailed { command_id, .. }
            | Self::ActivityTimedOut { command_id, .. } => Some(*command_id),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub sequence: SequenceNo,
    pub recorded_at: DateTime<Utc>,
    pub kind: EventKind,
}
