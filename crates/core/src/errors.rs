use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::activity::{ActivityError, CommandId};

/// Terminal error of a workflow execution, stored in the `WorkflowFailed`
/// history event and surfaced by `WorkflowHandle::result`.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowError {
    #[error(
        "activity `{activity_type}` (command {command_id}) failed on attempt {attempt}: {error}"
    )]
    ActivityFailed { activity_type: String, command_id: CommandId, attempt: u32, error: ActivityError },
    #[error(
        "activity `{activity_type}` (command {command_id}) timed out after {timeout_ms}ms on attempt {attempt}"
    )]
    ActivityTimedOut { activity_type: String, command_id: CommandId, attempt: u32, timeout_ms: u64 },
    #[error("determinism violation at command {command_id}: {message}")]
    DeterminismViolation { command_id: CommandId, message: String },
    #[error("corrupt history: {message}")]
    CorruptHistory { message: String },
    #[error("workflow type `{workflow_type}` is not registered on this worker")]
    UnknownWorkflowType { workflow_type: String },
    #[error("invalid command {command_id}: {message}")]
    InvalidCommand { command_id: CommandId, message: String },
    #[error("invalid payload: {message}")]
    InvalidPayload { message: String },
    #[error("{message}")]
    Application { message: String },
    #[error("workflow timed out")]
    TimedOut,
    #[error("workflow canceled: {reason}")]
    Canceled { reason: String },
}

impl WorkflowError {
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application { message: message.into() }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ActivityFailed { error, .. } if error.retryable => {
                ErrorClass::ActivityRetryableFailure
            }
            Self::ActivityFailed { .. } | Self::Application { .. } => {
                ErrorClass::ActivityTerminalFailure
            }
            Self::ActivityTimedOut { .. } => ErrorClass::ActivityTimeout,
            Self::DeterminismViolation { .. } | Self::CorruptHistory { .. } => {
                ErrorClass::DeterminismViolation
            }
            Self::UnknownWorkflowType { .. } | Self::InvalidCommand { .. } => {
                ErrorClass::Configuration
            }
            Self::InvalidPayload { .. } => ErrorClass::InvalidPayload,
            Self::TimedOut => ErrorClass::TimedOut,
            Self::Canceled { .. } => ErrorClass::Canceled,
        }
    }
}

/// Coarse failure classes shared by the engine, its adapters and the CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    ActivityRetryableFailure,
    ActivityTerminalFailure,
    ActivityTimeout,
    DeterminismViolation,
    QueueUnavailable,
    LogUnavailable,
    Conflict,
    NotFound,
    Canceled,
    TimedOut,
    InvalidPayload,
    Configuration,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActivityRetryableFailure => "activity_retryable_failure",
            Self::ActivityTerminalFailure => "activity_terminal_failure",
            Self::ActivityTimeout => "activity_timeout",
            Self::DeterminismViolation => "determinism_violation",
            Self::QueueUnavailable => "queue_unavailable",
            Self::LogUnavailable => "log_unavailable",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Canceled => "canceled",
            Self::TimedOut => "timed_out",
            Self::InvalidPayload => "invalid_payload",
            Self::Configuration => "configuration",
        }
    }

    /// Transient classes are retried with backoff by workers and clients.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueUnavailable | Self::LogUnavailable)
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ActivityRetryableFailure | Self::ActivityTerminalFailure => {
                "A workflow step failed. Inspect the history for the failing activity."
            }
            Self::ActivityTimeout => "A workflow step did not finish within its timeout.",
            Self::DeterminismViolation => {
                "Workflow code diverged from its recorded history and cannot be resumed."
            }
            Self::QueueUnavailable | Self::LogUnavailable => {
                "The backing store is temporarily unavailable. Please retry shortly."
            }
            Self::Conflict => "A workflow with this id already exists.",
            Self::NotFound => "No workflow with this id exists.",
            Self::Canceled => "The workflow was canceled.",
            Self::TimedOut => "The workflow exceeded its execution timeout.",
            Self::InvalidPayload => "The workflow input or output could not be decoded.",
            Self::Configuration => "The worker is misconfigured for this workflow.",
        }
    }
}
