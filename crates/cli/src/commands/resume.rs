use crate::commands::support::{current_thread_runtime, load_config, Store};
use crate::commands::{client_failure, CommandError, CommandResult};

/// Re-enqueues a workflow task for a running execution that stalled.
pub fn run(workflow_id: &str) -> CommandResult {
    let config = match load_config("resume") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("resume") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let store = Store::open(&config).await?;
        let outcome = store.client(&config).resume(workflow_id).await.map_err(client_failure);
        store.close().await;
        outcome?;
        Ok::<String, CommandError>(format!("workflow task enqueued for `{workflow_id}`"))
    });

    CommandResult::from_outcome("resume", result)
}
