use crate::commands::support::{load_config, multi_thread_runtime, shutdown_on_ctrl_c, Store};
use crate::commands::{CommandError, CommandResult};

/// Polls the configured task queue until Ctrl-C.
pub fn run() -> CommandResult {
    let config = match load_config("worker") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match multi_thread_runtime("worker") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let store = Store::open(&config).await?;
        let worker = store.worker(&config)?;
        worker.run(shutdown_on_ctrl_c()).await;
        store.close().await;
        Ok::<String, CommandError>(format!(
            "worker `{}` stopped polling `{}`",
            config.worker.identity, config.worker.task_queue
        ))
    });

    CommandResult::from_outcome("worker", result)
}
