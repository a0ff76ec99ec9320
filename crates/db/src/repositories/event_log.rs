use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::debug;

use shelfsync_core::event_log::check_appendable;
use shelfsync_core::{
    EventKind, EventLog, HistoryEvent, LeaseToken, LogError, Payload, RunId, SequenceNo,
    WorkflowExecution, WorkflowId, WorkflowStatus,
};

use super::{
    format_timestamp, offset, parse_optional_timestamp, parse_timestamp, parse_u64, to_i64,
    RepositoryError,
};
use crate::DbPool;

/// Event log stored in `workflow_execution`, `workflow_event` and
/// `workflow_lease`. Lease checks and appends share one transaction.
pub struct SqlEventLog {
    pool: DbPool,
}

impl SqlEventLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Most recently created executions first.
    pub async fn list_executions(
        &self,
        status: Option<WorkflowStatus>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, LogError> {
        let rows = if let Some(status) = status {
            sqlx::query(
                "SELECT
                    workflow_id,
                    run_id,
                    workflow_type,
                    task_queue,
                    input_json,
                    status,
                    execution_timeout_ms,
                    created_at,
                    updated_at,
                    closed_at
                 FROM workflow_execution
                 WHERE status = ?
                 ORDER BY created_at DESC
                 LIMIT ?",
            )
            .bind(status.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?
        } else {
            sqlx::query(
                "SELECT
                    workflow_id,
                    run_id,
                    workflow_type,
                    task_queue,
                    input_json,
                    status,
                    execution_timeout_ms,
                    created_at,
                    updated_at,
                    closed_at
                 FROM workflow_execution
                 ORDER BY created_at DESC
                 LIMIT ?",
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?
        };

        Ok(rows.iter().map(execution_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl EventLog for SqlEventLog {
    async fn create_execution(
        &self,
        execution: WorkflowExecution,
        started: EventKind,
    ) -> Result<HistoryEvent, LogError> {
        let recorded_at = now();
        let input_json = encode_json("input_json", &execution.input)?;
        let payload_json = encode_json("payload_json", &started)?;
        let timeout_ms = execution
            .execution_timeout
            .map(|timeout| {
                to_i64("execution_timeout_ms", u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
            })
            .transpose()?;

        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let inserted = sqlx::query(
            "INSERT INTO workflow_execution (
                workflow_id,
                run_id,
                workflow_type,
                task_queue,
                input_json,
                status,
                execution_timeout_ms,
                created_at,
                updated_at,
                closed_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
             ON CONFLICT(workflow_id) DO NOTHING",
        )
        .bind(&execution.workflow_id.0)
        .bind(&execution.run_id.0)
        .bind(&execution.workflow_type)
        .bind(&execution.task_queue)
        .bind(&input_json)
        .bind(execution.status.as_str())
        .bind(timeout_ms)
        .bind(format_timestamp(execution.created_at))
        .bind(format_timestamp(execution.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?
        .rows_affected();

        if inserted == 0 {
            let status_raw: String =
                sqlx::query("SELECT status FROM workflow_execution WHERE workflow_id = ?")
                    .bind(&execution.workflow_id.0)
                    .fetch_one(&mut *tx)
                    .await
                    .and_then(|row| row.try_get("status"))
                    .map_err(RepositoryError::from)?;
            return Err(LogError::ExecutionExists {
                workflow_id: execution.workflow_id,
                status: parse_status(&status_raw)?,
            });
        }

        sqlx::query(
            "INSERT INTO workflow_event (workflow_id, sequence_no, event_type, payload_json, recorded_at)
             VALUES (?, 1, ?, ?, ?)",
        )
        .bind(&execution.workflow_id.0)
        .bind(started.as_str())
        .bind(&payload_json)
        .bind(format_timestamp(recorded_at))
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        tx.commit().await.map_err(RepositoryError::from)?;
        debug!(
            event_name = "event_log.execution.created",
            workflow_id = %execution.workflow_id,
            run_id = %execution.run_id,
            "workflow execution recorded"
        );
        Ok(HistoryEvent { sequence: 1, recorded_at, kind: started })
    }

    async fn find_execution(&self, id: &WorkflowId) -> Result<Option<WorkflowExecution>, LogError> {
        let row = sqlx::query(
            "SELECT
                workflow_id,
                run_id,
                workflow_type,
                task_queue,
                input_json,
                status,
                execution_timeout_ms,
                created_at,
                updated_at,
                closed_at
             FROM workflow_execution
             WHERE workflow_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(execution_from_row).transpose()?)
    }

    async fn acquire_lease(
        &self,
        id: &WorkflowId,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseToken, LogError> {
        let now = now();
        let expires_at = offset(now, ttl)?;
        let lease = LeaseToken::issue(id, owner);

        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let exists = sqlx::query("SELECT 1 FROM workflow_execution WHERE workflow_id = ?")
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        if exists.is_none() {
            return Err(LogError::NotFound(id.clone()));
        }

        let taken = sqlx::query(
            "INSERT INTO workflow_lease (workflow_id, owner, token, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(workflow_id) DO UPDATE SET
                owner = excluded.owner,
                token = excluded.token,
                expires_at = excluded.expires_at
             WHERE workflow_lease.expires_at <= ?",
        )
        .bind(&id.0)
        .bind(&lease.owner)
        .bind(&lease.token)
        .bind(format_timestamp(expires_at))
        .bind(format_timestamp(now))
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?
        .rows_affected();

        if taken == 0 {
            let holder: String = sqlx::query("SELECT owner FROM workflow_lease WHERE workflow_id = ?")
                .bind(&id.0)
                .fetch_one(&mut *tx)
                .await
                .and_then(|row| row.try_get("owner"))
                .map_err(RepositoryError::from)?;
            return Err(LogError::LeaseHeld { workflow_id: id.clone(), owner: holder });
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(lease)
    }

    async fn release_lease(&self, lease: &LeaseToken) -> Result<(), LogError> {
        sqlx::query("DELETE FROM workflow_lease WHERE workflow_id = ? AND token = ?")
            .bind(&lease.workflow_id.0)
            .bind(&lease.token)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn append_batch(
        &self,
        lease: &LeaseToken,
        events: Vec<EventKind>,
    ) -> Result<Vec<SequenceNo>, LogError> {
        let workflow_id = &lease.workflow_id;
        let now = now();
        let stamp = format_timestamp(now);

        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        // Writing first takes the database write lock for the whole check-and-append.
        let touched =
            sqlx::query("UPDATE workflow_execution SET updated_at = ? WHERE workflow_id = ?")
                .bind(&stamp)
                .bind(&workflow_id.0)
                .execute(&mut *tx)
                .await
                .map_err(RepositoryError::from)?
                .rows_affected();
        if touched == 0 {
            return Err(LogError::NotFound(workflow_id.clone()));
        }

        let held = sqlx::query("SELECT token, expires_at FROM workflow_lease WHERE workflow_id = ?")
            .bind(&workflow_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        let valid = match held {
            Some(row) => {
                let token: String = row.try_get("token").map_err(RepositoryError::from)?;
                let expires_at = parse_timestamp(
                    "expires_at",
                    row.try_get("expires_at").map_err(RepositoryError::from)?,
                )?;
                token == lease.token && expires_at > now
            }
            None => false,
        };
        if !valid {
            return Err(LogError::LeaseLost(workflow_id.clone()));
        }

        let row = sqlx::query(
            "SELECT e.status AS status, MAX(ev.sequence_no) AS last_sequence
             FROM workflow_execution e
             LEFT JOIN workflow_event ev ON ev.workflow_id = e.workflow_id
             WHERE e.workflow_id = ?
             GROUP BY e.status",
        )
        .bind(&workflow_id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;
        let status = parse_status(&row.try_get::<String, _>("status").map_err(RepositoryError::from)?)?;
        let last = row.try_get::<Option<i64>, _>("last_sequence").map_err(RepositoryError::from)?;

        check_appendable(workflow_id, status, &events)?;

        let mut next = last.unwrap_or(0) + 1;
        let mut sequences = Vec::with_capacity(events.len());
        for kind in &events {
            sqlx::query(
                "INSERT INTO workflow_event (workflow_id, sequence_no, event_type, payload_json, recorded_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&workflow_id.0)
            .bind(next)
            .bind(kind.as_str())
            .bind(encode_json("payload_json", kind)?)
            .bind(&stamp)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;

            if let Some(status) = kind.terminal_status() {
                sqlx::query(
                    "UPDATE workflow_execution SET status = ?, closed_at = ? WHERE workflow_id = ?",
                )
                .bind(status.as_str())
                .bind(&stamp)
                .bind(&workflow_id.0)
                .execute(&mut *tx)
                .await
                .map_err(RepositoryError::from)?;
            }

            sequences.push(parse_u64("sequence_no", next)?);
            next += 1;
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(sequences)
    }

    async fn read_from(
        &self,
        id: &WorkflowId,
        from: SequenceNo,
    ) -> Result<Vec<HistoryEvent>, LogError> {
        let rows = sqlx::query(
            "SELECT sequence_no, payload_json, recorded_at
             FROM workflow_event
             WHERE workflow_id = ? AND sequence_no >= ?
             ORDER BY sequence_no ASC",
        )
        .bind(&id.0)
        .bind(to_i64("sequence_no", from)?)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if rows.is_empty() && self.find_execution(id).await?.is_none() {
            return Err(LogError::NotFound(id.clone()));
        }

        Ok(rows.iter().map(event_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn encode_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}

fn parse_status(value: &str) -> Result<WorkflowStatus, RepositoryError> {
    WorkflowStatus::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown workflow status `{value}`")))
}

fn execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution, RepositoryError> {
    let input_raw: String = row.try_get("input_json")?;
    let input: Payload = serde_json::from_str(&input_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid `input_json`: {error}")))?;
    let execution_timeout = row
        .try_get::<Option<i64>, _>("execution_timeout_ms")?
        .map(|millis| parse_u64("execution_timeout_ms", millis).map(Duration::from_millis))
        .transpose()?;

    Ok(WorkflowExecution {
        workflow_id: WorkflowId(row.try_get("workflow_id")?),
        run_id: RunId(row.try_get("run_id")?),
        workflow_type: row.try_get("workflow_type")?,
        task_queue: row.try_get("task_queue")?,
        input,
        status: parse_status(&row.try_get::<String, _>("status")?)?,
        execution_timeout,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        closed_at: parse_optional_timestamp("closed_at", row.try_get("closed_at")?)?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<HistoryEvent, RepositoryError> {
    let payload_raw: String = row.try_get("payload_json")?;
    let kind: EventKind = serde_json::from_str(&payload_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid history event: {error}")))?;

    Ok(HistoryEvent {
        sequence: parse_u64("sequence_no", row.try_get("sequence_no")?)?,
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use shelfsync_core::{
        ActivityError, ActivityOptions, ActivityTaskId, CommandId, EventKind, EventLog, LogError,
        Payload, WorkflowExecution, WorkflowId, WorkflowOptions, WorkflowStatus,
    };

    use super::SqlEventLog;
    use crate::{connect_with_settings, migrations, DbPool};

    const TTL: Duration = Duration::from_secs(30);

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn started_log(id: &str) -> (SqlEventLog, WorkflowExecution) {
        let log = SqlEventLog::new(setup_pool().await);
        let execution = WorkflowExecution::new(
            WorkflowId::from(id),
            "sheets_to_storefront",
            Payload::from(serde_json::json!({ "range": "Sheet1!A2:C" })),
            &WorkflowOptions::on_queue("sync-queue").with_execution_timeout(Duration::from_secs(600)),
        );
        log.create_execution(execution.clone(), started(&execution)).await.expect("create execution");
        (log, execution)
    }

    fn started(execution: &WorkflowExecution) -> EventKind {
        EventKind::WorkflowStarted {
            workflow_type: execution.workflow_type.clone(),
            run_id: execution.run_id.clone(),
            input: execution.input.clone(),
        }
    }

    fn cancel(reason: &str) -> EventKind {
        EventKind::CancelRequested { reason: reason.to_string() }
    }

    #[tokio::test]
    async fn sql_event_log_stores_execution_and_rejects_duplicates() {
        let (log, execution) = started_log("wf-sql-create").await;

        let stored = log
            .find_execution(&execution.workflow_id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.run_id, execution.run_id);
        assert_eq!(stored.input, execution.input);
        assert_eq!(stored.status, WorkflowStatus::Running);
        assert_eq!(stored.execution_timeout, Some(Duration::from_secs(600)));

        let error = log
            .create_execution(execution.clone(), started(&execution))
            .await
            .expect_err("duplicate id");
        assert_eq!(
            error,
            LogError::ExecutionExists {
                workflow_id: execution.workflow_id.clone(),
                status: WorkflowStatus::Running,
            }
        );
        assert_eq!(log.read_from(&execution.workflow_id, 0).await.expect("read").len(), 1);
    }

    #[tokio::test]
    async fn sql_event_log_round_trips_typed_events_in_sequence_order() {
        let (log, execution) = started_log("wf-sql-events").await;
        let id = execution.workflow_id.clone();
        let lease = log.acquire_lease(&id, "worker-a", TTL).await.expect("lease");

        let scheduled = EventKind::ActivityScheduled {
            command_id: CommandId(1),
            task_id: ActivityTaskId::for_command(&execution.run_id, CommandId(1)),
            activity_type: "fetch_sheet_rows".to_string(),
            input: Payload::empty(),
            options: ActivityOptions::with_timeout(Duration::from_secs(120)),
        };
        let failed = EventKind::ActivityFailed {
            command_id: CommandId(1),
            attempt: 3,
            error: ActivityError::retryable("sheets_unavailable", "503 from sheets"),
        };
        let sequences =
            log.append_batch(&lease, vec![scheduled.clone(), failed.clone()]).await.expect("append");
        assert_eq!(sequences, vec![2, 3]);

        let history = log.read_from(&id, 0).await.expect("read");
        let kinds: Vec<EventKind> = history.into_iter().map(|event| event.kind).collect();
        assert_eq!(kinds, vec![started(&execution), scheduled, failed.clone()]);

        let tail = log.read_from(&id, 3).await.expect("read tail");
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].kind, failed);
    }

    #[tokio::test]
    async fn sql_event_log_enforces_single_writer_lease() {
        let (log, execution) = started_log("wf-sql-lease").await;
        let id = execution.workflow_id.clone();

        let lease = log.acquire_lease(&id, "worker-a", TTL).await.expect("lease");
        let held = log.acquire_lease(&id, "worker-b", TTL).await.expect_err("second lease");
        assert!(matches!(held, LogError::LeaseHeld { ref owner, .. } if owner == "worker-a"));

        log.release_lease(&lease).await.expect("release");
        assert_eq!(
            log.append(&lease, cancel("stale")).await.expect_err("released lease"),
            LogError::LeaseLost(id.clone())
        );

        let fresh = log.acquire_lease(&id, "worker-b", TTL).await.expect("reacquire");
        assert_eq!(log.append(&fresh, cancel("fresh")).await.expect("append"), 2);
    }

    #[tokio::test]
    async fn sql_event_log_lets_expired_leases_be_taken_over() {
        let (log, execution) = started_log("wf-sql-expire").await;
        let id = execution.workflow_id.clone();

        let first =
            log.acquire_lease(&id, "worker-a", Duration::from_millis(5)).await.expect("short lease");
        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = log.acquire_lease(&id, "worker-b", TTL).await.expect("take over");
        assert_eq!(
            log.append(&first, cancel("late")).await.expect_err("old holder"),
            LogError::LeaseLost(id.clone())
        );
        assert_eq!(log.append(&second, cancel("new")).await.expect("new holder"), 2);
    }

    #[tokio::test]
    async fn sql_event_log_closes_execution_atomically() {
        let (log, execution) = started_log("wf-sql-close").await;
        let id = execution.workflow_id.clone();
        let lease = log.acquire_lease(&id, "worker-a", TTL).await.expect("lease");

        let error = log
            .append_batch(&lease, vec![EventKind::WorkflowTimedOut, cancel("after close")])
            .await
            .expect_err("closing event must end the batch");
        assert!(matches!(error, LogError::Corrupt(_)));
        assert_eq!(log.read_from(&id, 0).await.expect("read").len(), 1, "nothing written");

        log.append(&lease, EventKind::WorkflowCompleted { result: Payload::from(serde_json::json!(4)) })
            .await
            .expect("complete");
        let stored = log.find_execution(&id).await.expect("find").expect("exists");
        assert_eq!(stored.status, WorkflowStatus::Completed);
        assert!(stored.closed_at.is_some());

        let error = log.append(&lease, cancel("too late")).await.expect_err("closed");
        assert!(matches!(error, LogError::ExecutionClosed { status: WorkflowStatus::Completed, .. }));

        let listed = log.list_executions(Some(WorkflowStatus::Completed), 10).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert!(log.list_executions(Some(WorkflowStatus::Running), 10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn sql_event_log_reports_unknown_executions() {
        let log = SqlEventLog::new(setup_pool().await);
        let id = WorkflowId::from("wf-missing");

        assert_eq!(log.find_execution(&id).await.expect("find"), None);
        assert_eq!(log.read_from(&id, 0).await.expect_err("read"), LogError::NotFound(id.clone()));
        assert_eq!(
            log.acquire_lease(&id, "worker-a", TTL).await.expect_err("lease"),
            LogError::NotFound(id)
        );
    }
}
