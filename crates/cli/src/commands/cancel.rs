use crate::commands::support::{current_thread_runtime, load_config, Store};
use crate::commands::{client_failure, CommandError, CommandResult};

pub fn run(workflow_id: &str, reason: &str) -> CommandResult {
    let config = match load_config("cancel") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("cancel") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let store = Store::open(&config).await?;
        let handle = store.client(&config).handle(workflow_id);
        let outcome = async {
            handle.cancel(reason).await.map_err(client_failure)?;
            let status = handle.status().await.map_err(client_failure)?;
            Ok::<String, CommandError>(format!(
                "cancellation requested for `{workflow_id}` (status: {status})"
            ))
        }
        .await;
        store.close().await;
        outcome
    });

    CommandResult::from_outcome("cancel", result)
}
