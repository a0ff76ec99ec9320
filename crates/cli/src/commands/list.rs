use shelfsync_core::WorkflowStatus;

use crate::commands::support::{current_thread_runtime, load_config, Store};
use crate::commands::{CommandError, CommandResult};

pub fn run(status: Option<&str>, limit: u32) -> CommandResult {
    let status = match status.map(|value| (value, WorkflowStatus::parse(value))) {
        None => None,
        Some((_, Some(status))) => Some(status),
        Some((value, None)) => {
            return CommandResult::failure(
                "list",
                "invalid_argument",
                format!(
                    "unknown status `{value}` (expected running|completed|failed|timed_out|canceled)"
                ),
                2,
            );
        }
    };
    let config = match load_config("list") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("list") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let store = Store::open(&config).await?;
        let listed = store.log.list_executions(status, limit).await;
        store.close().await;
        let executions = listed.map_err(|error| {
            let class = error.class();
            (class.as_str(), error.to_string(), super::exit_code_for(class))
        })?;

        let mut lines = vec![format!("{} executions:", executions.len())];
        lines.extend(executions.iter().map(|execution| {
            format!(
                "- {} {} {} (created {})",
                execution.workflow_id,
                execution.workflow_type,
                execution.status,
                execution.created_at.to_rfc3339()
            )
        }));
        Ok::<String, CommandError>(lines.join("\n"))
    });

    CommandResult::from_outcome("list", result)
}
