use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::execution::{RunId, WorkflowId};
use crate::domain::payload::{Payload, PayloadError};

/// 1-based position of a command in the sequence a workflow definition issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub u32);

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityTaskId(pub String);

impl ActivityTaskId {
    /// Task ids are derived from the run and command so replays reproduce them.
    pub fn for_command(run_id: &RunId, command_id: CommandId) -> Self {
        Self(format!("{}:{}", run_id.0, command_id.0))
    }
}

impl std::fmt::Display for ActivityTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidRetryPolicy {
    #[error("initial_interval must be greater than zero")]
    ZeroInitialInterval,
    #[error("backoff_coefficient must be at least 1.0 (got {0})")]
    CoefficientBelowOne(String),
    #[error("maximum_interval must not be shorter than initial_interval")]
    MaximumBelowInitial,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    /// Zero means unlimited.
    pub maximum_attempts: u32,
    #[serde(default)]
    pub non_retryable_error_kinds: Vec<String>,
    #[serde(default = "retry_on_timeout_default")]
    pub retry_on_timeout: bool,
}

fn retry_on_timeout_default() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(100),
            maximum_attempts: 0,
            non_retryable_error_kinds: Vec::new(),
            retry_on_timeout: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        if self.maximum_interval < interval {
            self.maximum_interval = interval;
        }
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn with_maximum_interval(mut self, interval: Duration) -> Self {
        self.maximum_interval = interval;
        self
    }

    pub fn with_maximum_attempts(mut self, attempts: u32) -> Self {
        self.maximum_attempts = attempts;
        self
    }

    pub fn with_non_retryable_kind(mut self, kind: impl Into<String>) -> Self {
        self.non_retryable_error_kinds.push(kind.into());
        self
    }

    pub fn without_timeout_retries(mut self) -> Self {
        self.retry_on_timeout = false;
        self
    }

    pub fn validate(&self) -> Result<(), InvalidRetryPolicy> {
        if self.initial_interval.is_zero() {
            return Err(InvalidRetryPolicy::ZeroInitialInterval);
        }
        if self.backoff_coefficient.is_nan() || self.backoff_coefficient < 1.0 {
            return Err(InvalidRetryPolicy::CoefficientBelowOne(
                self.backoff_coefficient.to_string(),
            ));
        }
        if self.maximum_interval < self.initial_interval {
            return Err(InvalidRetryPolicy::MaximumBelowInitial);
        }
        Ok(())
    }

    /// Delay before the attempt that follows `attempt`:
    /// `min(initial * coefficient^(attempt - 1), maximum)`.
    pub fn interval_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled =
            self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let maximum = self.maximum_interval.as_secs_f64();

        if !scaled.is_finite() || scaled >= maximum {
            return self.maximum_interval;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }

    pub fn allows_attempt_after(&self, attempt: u32) -> bool {
        self.maximum_attempts == 0 || attempt < self.maximum_attempts
    }

    pub fn is_non_retryable_kind(&self, kind: &str) -> bool {
        self.non_retryable_error_kinds.iter().any(|candidate| candidate == kind)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityOptions {
    pub start_to_close_timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// Defaults to the workflow's own queue.
    pub task_queue: Option<String>,
}

impl ActivityOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { start_to_close_timeout: timeout, retry_policy: RetryPolicy::default(), task_queue: None }
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn on_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = Some(task_queue.into());
        self
    }
}

/// Failure raised by activity code.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ActivityError {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

impl ActivityError {
    pub fn retryable(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into(), retryable: true }
    }

    pub fn non_retryable(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into(), retryable: false }
    }
}

impl From<PayloadError> for ActivityError {
    fn from(error: PayloadError) -> Self {
        Self::non_retryable("invalid_input", error.to_string())
    }
}

/// One attempt of one scheduled activity, as carried on the task queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityTask {
    pub task_id: ActivityTaskId,
    pub workflow_id: WorkflowId,
    pub run_id: RunId,
    pub command_id: CommandId,
    pub activity_type: String,
    pub input: Payload,
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
    pub retry_policy: RetryPolicy,
    pub start_to_close_timeout: Duration,
    pub task_queue: String,
}

impl ActivityTask {
    pub fn next_attempt(&self) -> Self {
        Self { attempt: self.attempt + 1, scheduled_at: Utc::now(), ..self.clone() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ActivityOutcome {
    Completed(Payload),
    Failed(ActivityError),
    TimedOut { timeout: Duration },
}
