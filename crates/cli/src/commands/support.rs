//! Pieces shared by the commands that talk to the durable store.

use std::sync::Arc;
use std::time::Duration;

use shelfsync_core::config::{AppConfig, LoadOptions};
use shelfsync_core::{ClientConfig, Worker, WorkerConfig, WorkflowClient};
use shelfsync_db::{connect_with_config, migrations, DbPool, SqlEventLog, SqlTaskQueue};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tracing::info;

use super::{CommandError, CommandResult};

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

pub(crate) fn current_thread_runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Worker pools need real parallelism; short commands stay on one thread.
pub(crate) fn multi_thread_runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// SQLite-backed event log and task queue sharing one pool.
pub(crate) struct Store {
    pool: DbPool,
    pub log: Arc<SqlEventLog>,
    pub queue: Arc<SqlTaskQueue>,
}

impl Store {
    pub async fn open(config: &AppConfig) -> Result<Self, CommandError> {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let log = Arc::new(SqlEventLog::new(pool.clone()));
        let queue = Arc::new(
            SqlTaskQueue::new(pool.clone(), Duration::from_secs(config.worker.queue_lease_secs))
                .with_poll_interval(Duration::from_millis(config.worker.poll_interval_ms)),
        );
        Ok(Self { pool, log, queue })
    }

    pub fn client(&self, config: &AppConfig) -> WorkflowClient {
        WorkflowClient::with_config(
            self.log.clone(),
            self.queue.clone(),
            ClientConfig {
                identity: format!("{}-client", config.worker.identity),
                result_poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
                history_lease_ttl: Duration::from_secs(config.worker.history_lease_secs),
                ..ClientConfig::default()
            },
        )
    }

    pub fn worker(&self, config: &AppConfig) -> Result<Worker, CommandError> {
        let (workflows, activities) = shelfsync_sync::registries(&config.sync)
            .map_err(|error| ("worker_setup", error.to_string(), 13u8))?;
        let worker_config = WorkerConfig::new(&config.worker.identity, &config.worker.task_queue)
            .with_max_concurrent_tasks(config.worker.max_concurrent_tasks)
            .with_history_lease_ttl(Duration::from_secs(config.worker.history_lease_secs));
        Ok(Worker::new(
            worker_config,
            self.log.clone(),
            self.queue.clone(),
            Arc::new(workflows),
            Arc::new(activities),
        ))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Flips the returned receiver to `true` on Ctrl-C.
pub(crate) fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (sender, receiver) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(event_name = "cli.shutdown.requested", "ctrl-c received, draining worker");
        }
        let _ = sender.send(true);
    });
    receiver
}
