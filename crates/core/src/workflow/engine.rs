use std::sync::Arc;

use tracing::warn;

use crate::domain::activity::CommandId;
use crate::domain::event::{EventKind, HistoryEvent};
use crate::domain::execution::{WorkflowId, WorkflowStatus};
use crate::domain::payload::Payload;
use crate::errors::WorkflowError;

use super::context::{Interrupt, WorkflowContext};
use super::definition::WorkflowRegistry;
use super::replay::{ReplayState, ScheduledCommand};

/// What a workflow task should write back to the log.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowDecision {
    /// Append these commands (possibly none) and wait for outcomes.
    Await { commands: Vec<ScheduledCommand> },
    Complete(Payload),
    Fail(WorkflowError),
    Cancel { reason: String },
    TimeOut,
    /// History is already closed; nothing to do.
    Closed(WorkflowStatus),
}

impl WorkflowDecision {
    /// The closing event for terminal decisions.
    pub fn closing_event(&self) -> Option<EventKind> {
        match self {
            Self::Await { .. } | Self::Closed(_) => None,
            Self::Complete(result) => Some(EventKind::WorkflowCompleted { result: result.clone() }),
            Self::Fail(error) => Some(EventKind::WorkflowFailed { error: error.clone() }),
            Self::Cancel { reason } => Some(EventKind::WorkflowCanceled { reason: reason.clone() }),
            Self::TimeOut => Some(EventKind::WorkflowTimedOut),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Await { .. } => "await",
            Self::Complete(_) => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel { .. } => "cancel",
            Self::TimeOut => "time_out",
            Self::Closed(_) => "closed",
        }
    }
}

/// Replays workflow definitions against their history.
#[derive(Clone, Debug)]
pub struct WorkflowEngine {
    registry: Arc<WorkflowRegistry>,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<WorkflowRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Folds `history` and, unless the run is already over, re-runs its
    /// definition to find the next step.
    ///
    /// Pure: nothing is written. A recorded cancellation request wins over an
    /// expired deadline, which wins over whatever the definition would do.
    pub fn decide(
        &self,
        workflow_id: &WorkflowId,
        history: &[HistoryEvent],
        deadline_exceeded: bool,
    ) -> WorkflowDecision {
        let replay = match ReplayState::from_history(history) {
            Ok(replay) => replay,
            Err(error) => return WorkflowDecision::Fail(error),
        };

        if let Some(status) = replay.closed {
            return WorkflowDecision::Closed(status);
        }
        if let Some(reason) = &replay.cancel_requested {
            return WorkflowDecision::Cancel { reason: reason.clone() };
        }
        if deadline_exceeded {
            return WorkflowDecision::TimeOut;
        }

        let Some(definition) = self.registry.get(&replay.workflow_type) else {
            return WorkflowDecision::Fail(WorkflowError::UnknownWorkflowType {
                workflow_type: replay.workflow_type.clone(),
            });
        };

        let mut ctx = WorkflowContext::new(workflow_id, &replay);
        let result = definition.run(&mut ctx, &replay.input);
        let outcome = ctx.finish();

        if let Some(violation) = outcome.violation {
            return WorkflowDecision::Fail(violation);
        }

        let recorded = replay.scheduled.len();
        if (outcome.issued as usize) < recorded {
            return WorkflowDecision::Fail(WorkflowError::DeterminismViolation {
                command_id: CommandId(outcome.issued + 1),
                message: format!(
                    "history records {recorded} scheduled commands but replay issued {}",
                    outcome.issued
                ),
            });
        }

        if outcome.suspended {
            return WorkflowDecision::Await { commands: outcome.new_commands };
        }

        match result {
            Ok(output) => {
                if !outcome.new_commands.is_empty() {
                    warn!(
                        event_name = "workflow.commands.unawaited",
                        workflow_id = %workflow_id,
                        count = outcome.new_commands.len(),
                        "workflow completed with unawaited commands; they are dropped"
                    );
                }
                WorkflowDecision::Complete(output)
            }
            Err(Interrupt::Failed(error)) => WorkflowDecision::Fail(error),
            // Only reachable if the definition invents its own suspension.
            Err(Interrupt::Suspended) => WorkflowDecision::Await { commands: outcome.new_commands },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use super::{WorkflowDecision, WorkflowEngine};
    use crate::domain::activity::{ActivityError, ActivityOptions, CommandId};
    use crate::domain::event::{EventKind, HistoryEvent};
    use crate::domain::execution::{RunId, WorkflowId, WorkflowStatus};
    use crate::domain::payload::Payload;
    use crate::errors::WorkflowError;
    use crate::workflow::context::{ActivityCall, WorkflowContext, WorkflowResult};
    use crate::workflow::definition::{WorkflowDefinition, WorkflowRegistry};

    /// Fetches a list, then pushes each element in parallel.
    struct FanOut;

    impl WorkflowDefinition for FanOut {
        fn workflow_type(&self) -> &'static str {
            "fan_out"
        }

        fn run(&self, ctx: &mut WorkflowContext<'_>, input: &Payload) -> WorkflowResult<Payload> {
            let items: Vec<u32> =
                ctx.execute_typed("fetch", input.as_value(), options())?;
            if items.is_empty() {
                return Ok(Payload::from(json!("nothing to do")));
            }
            let calls = items
                .iter()
                .map(|item| ActivityCall::new("push", Payload::from(json!(item)), options()))
                .collect();
            let pushed = ctx.execute_all(calls)?;
            Ok(Payload::from(json!({ "pushed": pushed.len() })))
        }
    }

    /// Swallows the suspension and tries to finish anyway.
    struct Impatient;

    impl WorkflowDefinition for Impatient {
        fn workflow_type(&self) -> &'static str {
            "impatient"
        }

        fn run(&self, ctx: &mut WorkflowContext<'_>, _input: &Payload) -> WorkflowResult<Payload> {
            let _ = ctx.execute_activity("fetch", Payload::empty(), options());
            Ok(Payload::from(json!("done early")))
        }
    }

    fn options() -> ActivityOptions {
        ActivityOptions::with_timeout(Duration::from_secs(30))
    }

    fn engine() -> WorkflowEngine {
        let registry = WorkflowRegistry::new().with(Arc::new(FanOut)).with(Arc::new(Impatient));
        WorkflowEngine::new(Arc::new(registry))
    }

    struct History {
        workflow_id: WorkflowId,
        run_id: RunId,
        events: Vec<HistoryEvent>,
    }

    impl History {
        fn start(workflow_type: &str) -> Self {
            let mut history = Self {
                workflow_id: WorkflowId::from("wf-1"),
                run_id: RunId("run-1".to_string()),
                events: Vec::new(),
            };
            let run_id = history.run_id.clone();
            history.push(EventKind::WorkflowStarted {
                workflow_type: workflow_type.to_string(),
                run_id,
                input: Payload::from(json!("sheet")),
            });
            history
        }

        fn push(&mut self, kind: EventKind) {
            self.events.push(HistoryEvent {
                sequence: self.events.len() as u64 + 1,
                recorded_at: Utc::now(),
                kind,
            });
        }

        /// Applies an `Await` decision the way a worker would.
        fn accept(&mut self, decision: WorkflowDecision) -> Vec<CommandId> {
            let WorkflowDecision::Await { commands } = decision else {
                panic!("expected await, got {decision:?}");
            };
            let ids = commands.iter().map(|command| command.command_id).collect();
            for command in commands {
                let event = command.to_event(&self.run_id);
                self.push(event);
            }
            ids
        }

        fn complete(&mut self, command: u32, result: serde_json::Value) {
            self.push(EventKind::ActivityCompleted {
                command_id: CommandId(command),
                attempt: 1,
                result: Payload::from(result),
            });
        }
    }

    #[test]
    fn fan_out_runs_to_completion_across_decisions() {
        let engine = engine();
        let mut history = History::start("fan_out");

        let first = engine.decide(&history.workflow_id, &history.events, false);
        assert_eq!(history.accept(first), vec![CommandId(1)]);

        history.complete(1, json!([10, 20, 30]));
        let second = engine.decide(&history.workflow_id, &history.events, false);
        assert_eq!(history.accept(second), vec![CommandId(2), CommandId(3), CommandId(4)]);

        history.complete(3, json!("b"));
        let waiting = engine.decide(&history.workflow_id, &history.events, false);
        assert_eq!(history.accept(waiting), Vec::<CommandId>::new());

        history.complete(2, json!("a"));
        history.complete(4, json!("c"));
        assert_eq!(
            engine.decide(&history.workflow_id, &history.events, false),
            WorkflowDecision::Complete(Payload::from(json!({ "pushed": 3 })))
        );
    }

    #[test]
    fn replaying_a_partial_history_reissues_identical_commands() {
        let engine = engine();
        let mut history = History::start("fan_out");
        let first = engine.decide(&history.workflow_id, &history.events, false);
        history.accept(first);
        history.complete(1, json!([1, 2]));

        let once = engine.decide(&history.workflow_id, &history.events, false);
        let twice = engine.decide(&history.workflow_id, &history.events, false);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_fetch_short_circuits() {
        let engine = engine();
        let mut history = History::start("fan_out");
        let first = engine.decide(&history.workflow_id, &history.events, false);
        history.accept(first);
        history.complete(1, json!([]));

        assert_eq!(
            engine.decide(&history.workflow_id, &history.events, false),
            WorkflowDecision::Complete(Payload::from(json!("nothing to do")))
        );
    }

    #[test]
    fn failed_member_fails_the_workflow_after_the_join_settles() {
        let engine = engine();
        let mut history = History::start("fan_out");
        let first = engine.decide(&history.workflow_id, &history.events, false);
        history.accept(first);
        history.complete(1, json!([1, 2]));
        let second = engine.decide(&history.workflow_id, &history.events, false);
        history.accept(second);

        history.push(EventKind::ActivityFailed {
            command_id: CommandId(2),
            attempt: 3,
            error: ActivityError::retryable("simulated_outage", "storefront down"),
        });
        assert!(matches!(
            engine.decide(&history.workflow_id, &history.events, false),
            WorkflowDecision::Await { ref commands } if commands.is_empty()
        ));

        history.complete(3, json!("ok"));
        match engine.decide(&history.workflow_id, &history.events, false) {
            WorkflowDecision::Fail(WorkflowError::ActivityFailed { command_id, attempt, .. }) => {
                assert_eq!(command_id, CommandId(2));
                assert_eq!(attempt, 3);
            }
            other => panic!("expected activity failure, got {other:?}"),
        }
    }

    #[test]
    fn history_with_more_commands_than_replay_issues_is_a_violation() {
        let engine = engine();
        let mut history = History::start("fan_out");
        let first = engine.decide(&history.workflow_id, &history.events, false);
        history.accept(first);
        history.complete(1, json!([]));
        // A previous version of the workflow pushed even when empty.
        history.push(
            super::ScheduledCommand {
                command_id: CommandId(2),
                activity_type: "push".to_string(),
                input: Payload::empty(),
                options: options(),
            }
            .to_event(&RunId("run-1".to_string())),
        );

        assert!(matches!(
            engine.decide(&history.workflow_id, &history.events, false),
            WorkflowDecision::Fail(WorkflowError::DeterminismViolation {
                command_id: CommandId(2),
                ..
            })
        ));
    }

    #[test]
    fn swallowed_suspension_cannot_complete_the_workflow() {
        let engine = engine();
        let history = History::start("impatient");
        let decision = engine.decide(&history.workflow_id, &history.events, false);
        assert!(matches!(decision, WorkflowDecision::Await { ref commands } if commands.len() == 1));
    }

    #[test]
    fn cancellation_and_deadline_take_precedence() {
        let engine = engine();
        let mut history = History::start("fan_out");
        assert_eq!(
            engine.decide(&history.workflow_id, &history.events, true),
            WorkflowDecision::TimeOut
        );

        history.push(EventKind::CancelRequested { reason: "operator".to_string() });
        let decision = engine.decide(&history.workflow_id, &history.events, true);
        assert_eq!(decision, WorkflowDecision::Cancel { reason: "operator".to_string() });
        assert_eq!(
            decision.closing_event(),
            Some(EventKind::WorkflowCanceled { reason: "operator".to_string() })
        );
    }

    #[test]
    fn closed_history_and_unknown_types_are_reported() {
        let engine = engine();
        let mut closed = History::start("fan_out");
        closed.push(EventKind::WorkflowTimedOut);
        assert_eq!(
            engine.decide(&closed.workflow_id, &closed.events, false),
            WorkflowDecision::Closed(WorkflowStatus::TimedOut)
        );

        let unknown = History::start("nope");
        assert!(matches!(
            engine.decide(&unknown.workflow_id, &unknown.events, false),
            WorkflowDecision::Fail(WorkflowError::UnknownWorkflowType { .. })
        ));
    }
}
