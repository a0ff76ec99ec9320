use shelfsync_core::{EventKind, HistoryEvent};

use crate::commands::support::{current_thread_runtime, load_config, Store};
use crate::commands::{client_failure, CommandError, CommandResult};

pub fn run(workflow_id: &str) -> CommandResult {
    let config = match load_config("history") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("history") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let store = Store::open(&config).await?;
        let handle = store.client(&config).handle(workflow_id);
        let outcome = async {
            let status = handle.status().await.map_err(client_failure)?;
            let history = handle.history().await.map_err(client_failure)?;
            Ok::<String, CommandError>(render_history(workflow_id, &status.to_string(), &history))
        }
        .await;
        store.close().await;
        outcome
    });

    CommandResult::from_outcome("history", result)
}

pub fn render_history(workflow_id: &str, status: &str, history: &[HistoryEvent]) -> String {
    let mut lines = vec![format!("workflow `{workflow_id}` is {status} ({} events):", history.len())];
    lines.extend(history.iter().map(|event| {
        format!(
            "- #{} {} {}{}",
            event.sequence,
            event.recorded_at.to_rfc3339(),
            event.kind.as_str(),
            detail(&event.kind)
        )
    }));
    lines.join("\n")
}

fn detail(kind: &EventKind) -> String {
    match kind {
        EventKind::WorkflowStarted { workflow_type, run_id, .. } => {
            format!(" type={workflow_type} run={run_id}")
        }
        EventKind::ActivityScheduled { command_id, activity_type, .. } => {
            format!(" command={command_id} activity={activity_type}")
        }
        EventKind::ActivityStarted { command_id, attempt, worker_id } => {
            format!(" command={command_id} attempt={attempt} worker={worker_id}")
        }
        EventKind::ActivityCompleted { command_id, attempt, .. } => {
            format!(" command={command_id} attempt={attempt}")
        }
        EventKind::ActivityFailed { command_id, attempt, error } => {
            format!(" command={command_id} attempt={attempt} error={error}")
        }
        EventKind::ActivityTimedOut { command_id, attempt, timeout_ms } => {
            format!(" command={command_id} attempt={attempt} timeout_ms={timeout_ms}")
        }
        EventKind::CancelRequested { reason } | EventKind::WorkflowCanceled { reason } => {
            format!(" reason={reason}")
        }
        EventKind::WorkflowCompleted { result } => format!(" result={result}"),
        EventKind::WorkflowFailed { error } => format!(" error={error}"),
        EventKind::WorkflowTimedOut => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use shelfsync_core::{
        ActivityError, CommandId, EventKind, HistoryEvent, Payload, RunId,
    };

    use super::render_history;

    fn event(sequence: u64, kind: EventKind) -> HistoryEvent {
        let recorded_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid time");
        HistoryEvent { sequence, recorded_at, kind }
    }

    #[test]
    fn renders_one_line_per_event_in_order() {
        let history = vec![
            event(
                1,
                EventKind::WorkflowStarted {
                    workflow_type: "sheets_to_storefront".to_string(),
                    run_id: RunId("run-1".to_string()),
                    input: Payload::empty(),
                },
            ),
            event(
                2,
                EventKind::ActivityFailed {
                    command_id: CommandId(3),
                    attempt: 1,
                    error: ActivityError::retryable("storefront_outage", "down"),
                },
            ),
            event(3, EventKind::WorkflowCompleted { result: Payload::from(json!({"synced": 1})) }),
        ];

        let rendered = render_history("wf-1", "completed", &history);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("is completed (3 events)"));
        assert!(lines[1].starts_with("- #1 2024-05-01T12:00:00+00:00 workflow_started"));
        assert!(lines[1].contains("run=run-1"));
        assert!(lines[2].contains("activity_failed command=3 attempt=1"));
        assert!(lines[3].contains("workflow_completed"));
    }
}
