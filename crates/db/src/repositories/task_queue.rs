use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::{error, warn};
use uuid::Uuid;

use shelfsync_core::queue::DeliveryId;
use shelfsync_core::{Lease, QueueError, QueuedTask, TaskQueue};

use super::{format_timestamp, offset, parse_u64, RepositoryError};
use crate::DbPool;

/// Durable queue over `task_queue_item`. Claims are optimistic: a claim only
/// lands if the row's delivery count is still the one that was read.
pub struct SqlTaskQueue {
    pool: DbPool,
    lease_window: Duration,
    poll_interval: Duration,
}

impl SqlTaskQueue {
    pub fn new(pool: DbPool, lease_window: Duration) -> Self {
        Self { pool, lease_window, poll_interval: Duration::from_millis(200) }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Moves an entry that no worker can decode out of the queue.
    async fn dead_letter(
        &self,
        queue: &str,
        candidate: &Candidate,
        delivery_count: u32,
        reason: &str,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT OR REPLACE INTO task_queue_dead_letter (
                delivery_id,
                queue_name,
                workflow_id,
                payload_json,
                delivery_count,
                error,
                dead_lettered_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&candidate.delivery_id)
        .bind(queue)
        .bind(&candidate.workflow_id)
        .bind(&candidate.payload_json)
        .bind(i64::from(delivery_count))
        .bind(reason)
        .bind(format_timestamp(now()))
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM task_queue_item WHERE id = ?")
            .bind(candidate.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        error!(
            event_name = "queue.entry.dead_lettered",
            queue,
            delivery_id = %candidate.delivery_id,
            workflow_id = %candidate.workflow_id,
            error = %reason,
            "queued task could not be decoded; moved to dead letter table"
        );
        Ok(())
    }
}

struct Candidate {
    id: i64,
    delivery_id: String,
    workflow_id: String,
    payload_json: String,
    delivery_count: i64,
    previous_worker: Option<String>,
}

#[async_trait]
impl TaskQueue for SqlTaskQueue {
    async fn enqueue_after(
        &self,
        queue: &str,
        task: QueuedTask,
        delay: Duration,
    ) -> Result<DeliveryId, QueueError> {
        let now = now();
        let available_at = offset(now, delay)?;
        let payload_json =
            serde_json::to_string(&task).map_err(|error| QueueError::Codec(error.to_string()))?;
        let delivery_id = DeliveryId(Uuid::new_v4().to_string());

        sqlx::query(
            "INSERT INTO task_queue_item (
                delivery_id,
                queue_name,
                task_kind,
                workflow_id,
                payload_json,
                available_at,
                delivery_count,
                enqueued_at
             ) VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&delivery_id.0)
        .bind(queue)
        .bind(task.describe())
        .bind(&task.workflow_id().0)
        .bind(&payload_json)
        .bind(format_timestamp(available_at))
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(delivery_id)
    }

    async fn try_claim(&self, queue: &str, worker_id: &str) -> Result<Option<Lease>, QueueError> {
        let now = now();
        let stamp = format_timestamp(now);
        let claimed_until = format_timestamp(offset(now, self.lease_window)?);

        // Another worker may win the race for a row; move on to the next one.
        loop {
            let row = sqlx::query(
                "SELECT id, delivery_id, workflow_id, payload_json, delivery_count, claimed_by
                 FROM task_queue_item
                 WHERE queue_name = ?
                   AND available_at <= ?
                   AND (claimed_until IS NULL OR claimed_until <= ?)
                 ORDER BY available_at ASC, id ASC
                 LIMIT 1",
            )
            .bind(queue)
            .bind(&stamp)
            .bind(&stamp)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

            let Some(row) = row else {
                return Ok(None);
            };
            let candidate = candidate_from_row(&row)?;
            let token = Uuid::new_v4().to_string();

            let claimed = sqlx::query(
                "UPDATE task_queue_item
                 SET delivery_count = delivery_count + 1,
                     claim_token = ?,
                     claimed_by = ?,
                     claimed_until = ?
                 WHERE id = ? AND delivery_count = ?",
            )
            .bind(&token)
            .bind(worker_id)
            .bind(&claimed_until)
            .bind(candidate.id)
            .bind(candidate.delivery_count)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?
            .rows_affected();
            if claimed == 0 {
                continue;
            }

            let delivery_count = u32::try_from(candidate.delivery_count + 1)
                .map_err(|_| QueueError::Codec("delivery count out of range".to_string()))?;
            if let Some(previous_worker) = &candidate.previous_worker {
                warn!(
                    event_name = "queue.lease.expired",
                    queue,
                    delivery_id = %candidate.delivery_id,
                    previous_worker = %previous_worker,
                    delivery_count,
                    "lease window elapsed without ack; redelivering"
                );
            }

            let task: QueuedTask = match serde_json::from_str(&candidate.payload_json) {
                Ok(task) => task,
                Err(error) => {
                    self.dead_letter(queue, &candidate, delivery_count, &error.to_string()).await?;
                    continue;
                }
            };
            return Ok(Some(Lease {
                delivery_id: DeliveryId(candidate.delivery_id),
                queue: queue.to_string(),
                task,
                delivery_count,
                claim_token: token,
            }));
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let removed =
            sqlx::query("DELETE FROM task_queue_item WHERE delivery_id = ? AND claim_token = ?")
                .bind(&lease.delivery_id.0)
                .bind(&lease.claim_token)
                .execute(&self.pool)
                .await
                .map_err(RepositoryError::from)?
                .rows_affected();

        if removed == 0 {
            return Err(QueueError::LeaseExpired(lease.delivery_id.clone()));
        }
        Ok(())
    }

    async fn nack(&self, lease: &Lease, delay: Duration) -> Result<(), QueueError> {
        let available_at = offset(now(), delay)?;
        let released = sqlx::query(
            "UPDATE task_queue_item
             SET claim_token = NULL,
                 claimed_by = NULL,
                 claimed_until = NULL,
                 available_at = ?
             WHERE delivery_id = ? AND claim_token = ?",
        )
        .bind(format_timestamp(available_at))
        .bind(&lease.delivery_id.0)
        .bind(&lease.claim_token)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?
        .rows_affected();

        if released == 0 {
            return Err(QueueError::LeaseExpired(lease.delivery_id.clone()));
        }
        Ok(())
    }

    async fn extend(&self, lease: &Lease) -> Result<(), QueueError> {
        let claimed_until = offset(now(), self.lease_window)?;
        let extended = sqlx::query(
            "UPDATE task_queue_item
             SET claimed_until = ?
             WHERE delivery_id = ? AND claim_token = ?",
        )
        .bind(format_timestamp(claimed_until))
        .bind(&lease.delivery_id.0)
        .bind(&lease.claim_token)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?
        .rows_affected();

        if extended == 0 {
            return Err(QueueError::LeaseExpired(lease.delivery_id.clone()));
        }
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        let count: i64 =
            sqlx::query("SELECT COUNT(*) AS count FROM task_queue_item WHERE queue_name = ?")
                .bind(queue)
                .fetch_one(&self.pool)
                .await
                .and_then(|row| row.try_get("count"))
                .map_err(RepositoryError::from)?;
        let count = parse_u64("count", count)?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    fn lease_window(&self) -> Duration {
        self.lease_window
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn candidate_from_row(row: &SqliteRow) -> Result<Candidate, RepositoryError> {
    Ok(Candidate {
        id: row.try_get("id")?,
        delivery_id: row.try_get("delivery_id")?,
        workflow_id: row.try_get("workflow_id")?,
        payload_json: row.try_get("payload_json")?,
        delivery_count: row.try_get("delivery_count")?,
        previous_worker: row.try_get("claimed_by")?,
    })
}
