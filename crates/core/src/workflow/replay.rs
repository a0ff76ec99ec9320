use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::domain::activity::{
    ActivityError, ActivityOptions, ActivityTask, ActivityTaskId, CommandId,
};
use crate::domain::event::{EventKind, HistoryEvent};
use crate::domain::execution::{RunId, WorkflowId, WorkflowStatus};
use crate::domain::payload::Payload;
use crate::errors::WorkflowError;

/// A "schedule activity" command, either recorded in history or newly issued.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledCommand {
    pub command_id: CommandId,
    pub activity_type: String,
    pub input: Payload,
    pub options: ActivityOptions,
}

impl ScheduledCommand {
    pub fn to_event(&self, run_id: &RunId) -> EventKind {
        EventKind::ActivityScheduled {
            command_id: self.command_id,
            task_id: ActivityTaskId::for_command(run_id, self.command_id),
            activity_type: self.activity_type.clone(),
            input: self.input.clone(),
            options: self.options.clone(),
        }
    }

    /// First attempt of this command, routed to the command's queue or `default_queue`.
    pub fn first_attempt(
        &self,
        workflow_id: &WorkflowId,
        run_id: &RunId,
        default_queue: &str,
    ) -> ActivityTask {
        ActivityTask {
            task_id: ActivityTaskId::for_command(run_id, self.command_id),
            workflow_id: workflow_id.clone(),
            run_id: run_id.clone(),
            command_id: self.command_id,
            activity_type: self.activity_type.clone(),
            input: self.input.clone(),
            attempt: 1,
            scheduled_at: Utc::now(),
            retry_policy: self.options.retry_policy.clone(),
            start_to_close_timeout: self.options.start_to_close_timeout,
            task_queue: self.options.task_queue.clone().unwrap_or_else(|| default_queue.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome {
    Completed { attempt: u32, result: Payload },
    Failed { attempt: u32, error: ActivityError },
    TimedOut { attempt: u32, timeout_ms: u64 },
}

/// Everything replay needs, folded from one execution's history.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplayState {
    pub workflow_type: String,
    pub run_id: RunId,
    pub input: Payload,
    /// Index `i` holds command `i + 1`.
    pub scheduled: Vec<ScheduledCommand>,
    pub outcomes: HashMap<CommandId, CommandOutcome>,
    pub started: HashSet<CommandId>,
    pub cancel_requested: Option<String>,
    pub closed: Option<WorkflowStatus>,
}

impl ReplayState {
    pub fn from_history(history: &[HistoryEvent]) -> Result<Self, WorkflowError> {
        let Some((first, rest)) = history.split_first() else {
            return Err(corrupt("history is empty"));
        };
        let EventKind::WorkflowStarted { workflow_type, run_id, input } = &first.kind else {
            return Err(corrupt(format!(
                "history must start with workflow_started, found `{}`",
                first.kind.as_str()
            )));
        };

        let mut state = Self {
            workflow_type: workflow_type.clone(),
            run_id: run_id.clone(),
            input: input.clone(),
            scheduled: Vec::new(),
            outcomes: HashMap::new(),
            started: HashSet::new(),
            cancel_requested: None,
            closed: None,
        };

        let mut previous = first.sequence;
        for event in rest {
            if event.sequence <= previous {
                return Err(corrupt(format!(
                    "sequence {} follows {} out of order",
                    event.sequence, previous
                )));
            }
            previous = event.sequence;
            state.apply(event)?;
        }

        Ok(state)
    }

    fn apply(&mut self, event: &HistoryEvent) -> Result<(), WorkflowError> {
        match &event.kind {
            EventKind::WorkflowStarted { .. } => {
                return Err(corrupt(format!("duplicate workflow_started at {}", event.sequence)));
            }
            EventKind::ActivityScheduled { command_id, activity_type, input, options, .. } => {
                let expected = CommandId(self.scheduled.len() as u32 + 1);
                if *command_id != expected {
                    return Err(corrupt(format!(
                        "command {command_id} scheduled where command {expected} was expected"
                    )));
                }
                self.scheduled.push(ScheduledCommand {
                    command_id: *command_id,
                    activity_type: activity_type.clone(),
                    input: input.clone(),
                    options: options.clone(),
                });
            }
            EventKind::ActivityStarted { command_id, .. } => {
                self.require_scheduled(*command_id, event)?;
                self.started.insert(*command_id);
            }
            EventKind::ActivityCompleted { command_id, attempt, result } => {
                self.record(
                    *command_id,
                    event,
                    CommandOutcome::Completed { attempt: *attempt, result: result.clone() },
                )?;
            }
            EventKind::ActivityFailed { command_id, attempt, error } => {
                self.record(
                    *command_id,
                    event,
                    CommandOutcome::Failed { attempt: *attempt, error: error.clone() },
                )?;
            }
            EventKind::ActivityTimedOut { command_id, attempt, timeout_ms } => {
                self.record(
                    *command_id,
                    event,
                    CommandOutcome::TimedOut { attempt: *attempt, timeout_ms: *timeout_ms },
                )?;
            }
            EventKind::CancelRequested { reason } => {
                if self.cancel_requested.is_none() {
                    self.cancel_requested = Some(reason.clone());
                }
            }
            closing => {
                if let Some(status) = closing.terminal_status() {
                    self.closed = Some(status);
                }
            }
        }
        Ok(())
    }

    fn require_scheduled(
        &self,
        command_id: CommandId,
        event: &HistoryEvent,
    ) -> Result<(), WorkflowError> {
        if command_id.0 == 0 || command_id.0 as usize > self.scheduled.len() {
            return Err(corrupt(format!(
                "`{}` at {} references unscheduled command {command_id}",
                event.kind.as_str(),
                event.sequence
            )));
        }
        Ok(())
    }

    fn record(
        &mut self,
        command_id: CommandId,
        event: &HistoryEvent,
        outcome: CommandOutcome,
    ) -> Result<(), WorkflowError> {
        self.require_scheduled(command_id, event)?;
        // First recorded outcome wins.
        self.outcomes.entry(command_id).or_insert(outcome);
        Ok(())
    }

    pub fn command(&self, command_id: CommandId) -> Option<&ScheduledCommand> {
        command_id.0.checked_sub(1).and_then(|index| self.scheduled.get(index as usize))
    }

    pub fn is_resolved(&self, command_id: CommandId) -> bool {
        self.outcomes.contains_key(&command_id)
    }

    /// Scheduled commands no worker has reported starting and that have no outcome.
    pub fn unstarted_commands(&self) -> Vec<&ScheduledCommand> {
        self.scheduled
            .iter()
            .filter(|command| {
                !self.is_resolved(command.command_id) && !self.started.contains(&command.command_id)
            })
            .collect()
    }
}

fn corrupt(message: impl Into<String>) -> WorkflowError {
    WorkflowError::CorruptHistory { message: message.into() }
}
