//! Activity Executor
//!
//! Runs one attempt of an activity under its start-to-close timeout and
//! decides, from the task's retry policy, whether the outcome is final or
//! another attempt must be scheduled.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::activity::{ActivityContext, ActivityRegistry};
use crate::domain::activity::{ActivityError, ActivityOutcome, ActivityTask};
use crate::domain::payload::Payload;

/// What to do after an attempt finished.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Completed(Payload),
    /// Schedule `next` after `delay`; nothing is recorded in history.
    Retry { next: ActivityTask, delay: Duration, reason: String },
    Failed(ActivityError),
    TimedOut { timeout: Duration },
}

impl Resolution {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Retry { .. })
    }
}

#[derive(Clone, Debug)]
pub struct ActivityExecutor {
    registry: Arc<ActivityRegistry>,
}

impl ActivityExecutor {
    pub fn new(registry: Arc<ActivityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ActivityRegistry {
        &self.registry
    }

    /// Runs one attempt.
    ///
    /// The activity future is spawned onto the runtime. When the timeout fires
    /// the attempt is reported as timed out and the spawned future is left to
    /// finish on its own; whatever it returns is discarded.
    pub async fn execute(&self, task: &ActivityTask) -> ActivityOutcome {
        let Some(activity) = self.registry.get(&task.activity_type) else {
            return ActivityOutcome::Failed(ActivityError::non_retryable(
                "activity_not_registered",
                format!("no activity named `{}` is registered on this worker", task.activity_type),
            ));
        };

        let ctx = ActivityContext::for_task(task);
        let input = task.input.clone();
        let attempt = tokio::spawn(async move { activity.execute(ctx, input).await });

        match tokio::time::timeout(task.start_to_close_timeout, attempt).await {
            Ok(Ok(Ok(result))) => ActivityOutcome::Completed(result),
            Ok(Ok(Err(error))) => ActivityOutcome::Failed(error),
            Ok(Err(join_error)) => ActivityOutcome::Failed(ActivityError::retryable(
                "activity_panicked",
                join_error.to_string(),
            )),
            Err(_elapsed) => {
                debug!(
                    event_name = "activity.attempt.abandoned",
                    task_id = %task.task_id,
                    attempt = task.attempt,
                    "attempt exceeded its timeout; result will be discarded"
                );
                ActivityOutcome::TimedOut { timeout: task.start_to_close_timeout }
            }
        }
    }

    /// Applies the task's retry policy to an attempt outcome.
    pub fn resolve(&self, task: &ActivityTask, outcome: ActivityOutcome) -> Resolution {
        let policy = &task.retry_policy;
        let attempts_left = policy.allows_attempt_after(task.attempt);

        match outcome {
            ActivityOutcome::Completed(result) => Resolution::Completed(result),
            ActivityOutcome::Failed(error) => {
                let should_retry = error.retryable
                    && attempts_left
                    && !policy.is_non_retryable_kind(&error.kind);
                if should_retry {
                    self.retry(task, error.to_string())
                } else {
                    Resolution::Failed(error)
                }
            }
            ActivityOutcome::TimedOut { timeout } => {
                if policy.retry_on_timeout && attempts_left {
                    self.retry(task, format!("timed out after {}ms", timeout.as_millis()))
                } else {
                    Resolution::TimedOut { timeout }
                }
            }
        }
    }

    fn retry(&self, task: &ActivityTask, reason: String) -> Resolution {
        let delay = task.retry_policy.interval_after(task.attempt);
        warn!(
            event_name = "activity.attempt.retrying",
            workflow_id = %task.workflow_id,
            activity_type = %task.activity_type,
            attempt = task.attempt,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "activity attempt failed; retry scheduled"
        );
        Resolution::Retry { next: task.next_attempt(), delay, reason }
    }
}
