use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::activity::{ActivityError, ActivityTask, ActivityTaskId, CommandId};
use crate::domain::execution::WorkflowId;
use crate::domain::payload::Payload;

/// What an activity invocation knows about itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityContext {
    pub task_id: ActivityTaskId,
    pub workflow_id: WorkflowId,
    pub command_id: CommandId,
    pub activity_type: String,
    /// 1 on the first attempt.
    pub attempt: u32,
}

impl ActivityContext {
    pub fn for_task(task: &ActivityTask) -> Self {
        Self {
            task_id: task.task_id.clone(),
            workflow_id: task.workflow_id.clone(),
            command_id: task.command_id,
            activity_type: task.activity_type.clone(),
            attempt: task.attempt,
        }
    }
}

/// A unit of possibly non-deterministic work (I/O, clocks, randomness).
///
/// Implementations must tolerate being run more than once for the same task:
/// delivery is at-least-once and timed-out attempts keep running in the
/// background while a retry starts.
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    fn activity_type(&self) -> &'static str;

    async fn execute(&self, ctx: ActivityContext, input: Payload) -> Result<Payload, ActivityError>;
}

/// Decodes activity input at the boundary; malformed input is never retried.
pub fn decode_input<T: DeserializeOwned>(input: &Payload) -> Result<T, ActivityError> {
    input.decode().map_err(ActivityError::from)
}

pub fn encode_output<T: Serialize>(output: &T) -> Result<Payload, ActivityError> {
    Payload::encode(output)
        .map_err(|error| ActivityError::non_retryable("invalid_output", error.to_string()))
}

#[derive(Clone, Default)]
pub struct ActivityRegistry {
    activities: HashMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, activity: Arc<dyn Activity>) -> &mut Self {
        self.activities.insert(activity.activity_type().to_string(), activity);
        self
    }

    pub fn with(mut self, activity: Arc<dyn Activity>) -> Self {
        self.register(activity);
        self
    }

    pub fn get(&self, activity_type: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(activity_type).cloned()
    }

    pub fn activity_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.activities.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistry").field("activities", &self.activity_types()).finish()
    }
}
