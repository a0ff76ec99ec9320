//! End-to-end demo: an embedded worker plus one sync execution.

use tokio::sync::watch;
use tracing::{error, info};

use crate::commands::start::{demo_workflow_id, start_sync, wait_for_report};
use crate::commands::support::{load_config, multi_thread_runtime, Store};
use crate::commands::{CommandError, CommandResult};

pub fn run(workflow_id: Option<String>) -> CommandResult {
    let config = match load_config("run") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match multi_thread_runtime("run") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let store = Store::open(&config).await?;
        let worker = store.worker(&config)?;
        let client = store.client(&config);

        let (shutdown, signal) = watch::channel(false);
        let worker_task = tokio::spawn(async move { worker.run(signal).await });

        let workflow_id = workflow_id.unwrap_or_else(demo_workflow_id);
        let outcome = async {
            let handle = start_sync(&client, &config, &workflow_id).await?;
            let report = wait_for_report(&handle).await?;
            info!(
                event_name = "cli.workflow.finished",
                workflow_id = %handle.workflow_id(),
                synced = report.synced,
                "sync workflow finished"
            );
            Ok::<String, CommandError>(format!(
                "Started workflow with ID: {}\nWorkflow result: {}",
                handle.workflow_id(),
                report.message
            ))
        }
        .await;

        let _ = shutdown.send(true);
        if let Err(join_error) = worker_task.await {
            error!(event_name = "cli.worker.crashed", error = %join_error, "embedded worker died");
        }
        store.close().await;
        outcome
    });

    CommandResult::from_outcome("run", result)
}
