use std::time::Duration;

use shelfsync_core::config::AppConfig;
use shelfsync_core::{Payload, WorkflowClient, WorkflowHandle, WorkflowOptions};
use shelfsync_sync::{SyncReport, SHEETS_TO_STOREFRONT};
use tracing::info;
use uuid::Uuid;

use crate::commands::support::{current_thread_runtime, load_config, Store};
use crate::commands::{client_failure, CommandError, CommandResult};

#[derive(Debug, Clone, Default)]
pub struct StartArgs {
    pub workflow_id: Option<String>,
    pub wait: bool,
}

pub fn demo_workflow_id() -> String {
    format!("sheets-to-shopify-demo-{}", Uuid::new_v4())
}

pub fn run(args: StartArgs) -> CommandResult {
    let config = match load_config("start") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("start") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let store = Store::open(&config).await?;
        let client = store.client(&config);
        let workflow_id = args.workflow_id.clone().unwrap_or_else(demo_workflow_id);
        let outcome = async {
            let handle = start_sync(&client, &config, &workflow_id).await?;
            if !args.wait {
                return Ok(format!("Started workflow with ID: {}", handle.workflow_id()));
            }
            let report = wait_for_report(&handle).await?;
            Ok::<String, CommandError>(format!(
                "Started workflow with ID: {}\nWorkflow result: {}",
                handle.workflow_id(),
                report.message
            ))
        }
        .await;
        store.close().await;
        outcome
    });

    CommandResult::from_outcome("start", result)
}

pub(crate) async fn start_sync(
    client: &WorkflowClient,
    config: &AppConfig,
    workflow_id: &str,
) -> Result<WorkflowHandle, CommandError> {
    let mut options = WorkflowOptions::on_queue(&config.worker.task_queue);
    if let Some(secs) = config.sync.workflow_timeout_secs {
        options = options.with_execution_timeout(Duration::from_secs(secs));
    }
    let handle = client
        .start_workflow(SHEETS_TO_STOREFRONT, workflow_id, Payload::empty(), options)
        .await
        .map_err(client_failure)?;
    info!(
        event_name = "cli.workflow.started",
        workflow_id = %handle.workflow_id(),
        task_queue = %config.worker.task_queue,
        "sync workflow started"
    );
    Ok(handle)
}

pub(crate) async fn wait_for_report(handle: &WorkflowHandle) -> Result<SyncReport, CommandError> {
    handle.result_as::<SyncReport>().await.map_err(client_failure)
}
