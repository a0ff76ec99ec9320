use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::activity::{ActivityOptions, CommandId};
use crate::domain::execution::{RunId, WorkflowId};
use crate::domain::payload::{Payload, PayloadError};
use crate::errors::WorkflowError;

use super::replay::{CommandOutcome, ReplayState, ScheduledCommand};

/// Why workflow code stopped before producing a result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interrupt {
    /// An awaited activity has no recorded outcome yet.
    Suspended,
    /// The workflow fails with this error.
    Failed(WorkflowError),
}

impl Interrupt {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended)
    }
}

impl From<WorkflowError> for Interrupt {
    fn from(error: WorkflowError) -> Self {
        Self::Failed(error)
    }
}

impl From<PayloadError> for Interrupt {
    fn from(error: PayloadError) -> Self {
        Self::Failed(WorkflowError::InvalidPayload { message: error.to_string() })
    }
}

pub type WorkflowResult<T> = Result<T, Interrupt>;

/// Reference to a scheduled activity, resolved with [`WorkflowContext::result`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityHandle {
    command_id: CommandId,
    activity_type: String,
}

impl ActivityHandle {
    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    pub fn activity_type(&self) -> &str {
        &self.activity_type
    }
}

/// One member of a fan-out passed to [`WorkflowContext::execute_all`].
#[derive(Clone, Debug, PartialEq)]
pub struct ActivityCall {
    pub activity_type: String,
    pub input: Payload,
    pub options: ActivityOptions,
}

impl ActivityCall {
    pub fn new(activity_type: impl Into<String>, input: Payload, options: ActivityOptions) -> Self {
        Self { activity_type: activity_type.into(), input, options }
    }
}

/// Handed to workflow code on every replay.
///
/// Commands get ids in issue order. Each one is checked against the command
/// history recorded at the same position; any mismatch fails the run. Once a
/// violation or a suspension has been observed it sticks, so workflow code
/// that swallows an [`Interrupt`] cannot complete the run.
pub struct WorkflowContext<'a> {
    workflow_id: &'a WorkflowId,
    replay: &'a ReplayState,
    issued: u32,
    new_commands: Vec<ScheduledCommand>,
    suspended: bool,
    violation: Option<WorkflowError>,
}

pub(crate) struct ContextOutcome {
    pub issued: u32,
    pub new_commands: Vec<ScheduledCommand>,
    pub suspended: bool,
    pub violation: Option<WorkflowError>,
}

impl<'a> WorkflowContext<'a> {
    pub(crate) fn new(workflow_id: &'a WorkflowId, replay: &'a ReplayState) -> Self {
        Self {
            workflow_id,
            replay,
            issued: 0,
            new_commands: Vec::new(),
            suspended: false,
            violation: None,
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        self.workflow_id
    }

    pub fn run_id(&self) -> &RunId {
        &self.replay.run_id
    }

    /// True while the code is re-issuing commands already in history.
    pub fn is_replaying(&self) -> bool {
        (self.issued as usize) < self.replay.scheduled.len()
    }

    pub fn schedule(
        &mut self,
        activity_type: &str,
        input: Payload,
        options: ActivityOptions,
    ) -> WorkflowResult<ActivityHandle> {
        if let Some(violation) = &self.violation {
            return Err(Interrupt::Failed(violation.clone()));
        }

        self.issued += 1;
        let command_id = CommandId(self.issued);

        match self.replay.command(command_id) {
            Some(recorded) => {
                if recorded.activity_type != activity_type {
                    return Err(self.violate(
                        command_id,
                        format!(
                            "history scheduled `{}` but the workflow now schedules `{activity_type}`",
                            recorded.activity_type
                        ),
                    ));
                }
                if recorded.input != input {
                    return Err(self.violate(
                        command_id,
                        format!("input of `{activity_type}` differs from the recorded input"),
                    ));
                }
            }
            None => {
                if let Err(error) = options.retry_policy.validate() {
                    let error =
                        WorkflowError::InvalidCommand { command_id, message: error.to_string() };
                    self.violation = Some(error.clone());
                    return Err(Interrupt::Failed(error));
                }
                self.new_commands.push(ScheduledCommand {
                    command_id,
                    activity_type: activity_type.to_string(),
                    input,
                    options,
                });
            }
        }

        Ok(ActivityHandle { command_id, activity_type: activity_type.to_string() })
    }

    pub fn schedule_typed<I: Serialize>(
        &mut self,
        activity_type: &str,
        input: &I,
        options: ActivityOptions,
    ) -> WorkflowResult<ActivityHandle> {
        let input = Payload::encode(input)?;
        self.schedule(activity_type, input, options)
    }

    /// Outcome of a scheduled activity, or [`Interrupt::Suspended`] if it is still pending.
    pub fn result(&mut self, handle: &ActivityHandle) -> WorkflowResult<Payload> {
        match self.replay.outcomes.get(&handle.command_id) {
            None => {
                self.suspended = true;
                Err(Interrupt::Suspended)
            }
            Some(CommandOutcome::Completed { result, .. }) => Ok(result.clone()),
            Some(CommandOutcome::Failed { attempt, error }) => {
                Err(Interrupt::Failed(WorkflowError::ActivityFailed {
                    activity_type: handle.activity_type.clone(),
                    command_id: handle.command_id,
                    attempt: *attempt,
                    error: error.clone(),
                }))
            }
            Some(CommandOutcome::TimedOut { attempt, timeout_ms }) => {
                Err(Interrupt::Failed(WorkflowError::ActivityTimedOut {
                    activity_type: handle.activity_type.clone(),
                    command_id: handle.command_id,
                    attempt: *attempt,
                    timeout_ms: *timeout_ms,
                }))
            }
        }
    }

    pub fn result_as<T: DeserializeOwned>(&mut self, handle: &ActivityHandle) -> WorkflowResult<T> {
        Ok(self.result(handle)?.decode()?)
    }

    pub fn execute_activity(
        &mut self,
        activity_type: &str,
        input: Payload,
        options: ActivityOptions,
    ) -> WorkflowResult<Payload> {
        let handle = self.schedule(activity_type, input, options)?;
        self.result(&handle)
    }

    pub fn execute_typed<I: Serialize, O: DeserializeOwned>(
        &mut self,
        activity_type: &str,
        input: &I,
        options: ActivityOptions,
    ) -> WorkflowResult<O> {
        let handle = self.schedule_typed(activity_type, input, options)?;
        self.result_as(&handle)
    }

    /// Waits for every handle. Suspends until all of them have settled; then
    /// returns results in handle order, or the failure of the earliest-issued
    /// failed member.
    pub fn join_all(&mut self, handles: &[ActivityHandle]) -> WorkflowResult<Vec<Payload>> {
        if handles.iter().any(|handle| !self.replay.is_resolved(handle.command_id)) {
            self.suspended = true;
            return Err(Interrupt::Suspended);
        }

        let mut ordered: Vec<&ActivityHandle> = handles.iter().collect();
        ordered.sort_by_key(|handle| handle.command_id);
        for handle in ordered {
            self.result(handle)?;
        }

        handles.iter().map(|handle| self.result(handle)).collect()
    }

    /// Schedules every call before waiting on any of them.
    pub fn execute_all(&mut self, calls: Vec<ActivityCall>) -> WorkflowResult<Vec<Payload>> {
        let handles = calls
            .into_iter()
            .map(|call| self.schedule(&call.activity_type, call.input, call.options))
            .collect::<WorkflowResult<Vec<_>>>()?;
        self.join_all(&handles)
    }

    fn violate(&mut self, command_id: CommandId, message: String) -> Interrupt {
        let error = WorkflowError::DeterminismViolation { command_id, message };
        self.violation = Some(error.clone());
        Interrupt::Failed(error)
    }

    pub(crate) fn finish(self) -> ContextOutcome {
        ContextOutcome {
            issued: self.issued,
            new_commands: self.new_commands,
            suspended: self.suspended,
            violation: self.violation,
        }
    }
}
