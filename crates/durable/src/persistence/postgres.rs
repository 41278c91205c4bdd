//! PostgreSQL implementation of TaskQueueStore
//!
//! Tasks live in the `queue_jobs` table:
//! - claiming uses `FOR UPDATE SKIP LOCKED` so concurrent workers never block
//!   on or double-claim the same row
//! - delays and retry backoff are expressed through `visible_at`
//! - failures run in a transaction holding the row lock

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::reliability::RetryPolicy;

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

/// PostgreSQL task queue
///
/// ```ignore
/// use autopilot_durable::PostgresTaskQueue;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/autopilot").await?;
/// let queue = PostgresTaskQueue::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresTaskQueue {
    pool: PgPool,
}

impl PostgresTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskQueueStore for PostgresTaskQueue {
    #[instrument(skip(self, task), fields(queue = %task.queue, job_name = %task.job_name))]
    async fn enqueue(&self, task: TaskDefinition) -> Result<Uuid, StoreError> {
        let id = Uuid::now_v7();
        let visible_at = Utc::now() + chrono_duration(task.delay.unwrap_or_default());
        let policy = serde_json::to_value(&task.retry_policy)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO queue_jobs (id, queue, job_name, payload, max_attempts, retry_policy, visible_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(&task.queue)
        .bind(&task.job_name)
        .bind(&task.payload)
        .bind(task.retry_policy.max_attempts as i32)
        .bind(&policy)
        .bind(visible_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to enqueue task: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(task_id = %id, "task enqueued");
        Ok(id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        queue: &str,
        job_names: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        if job_names.is_empty() || max_tasks == 0 {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM queue_jobs
                WHERE status = 'pending'
                  AND queue = $1
                  AND job_name = ANY($2)
                  AND visible_at <= NOW()
                ORDER BY visible_at, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_jobs t
            SET status = 'claimed',
                claimed_by = $4,
                claimed_at = NOW(),
                heartbeat_at = NOW(),
                attempt = attempt + 1
            FROM claimable c
            WHERE t.id = c.id
            RETURNING t.id, t.queue, t.job_name, t.payload, t.attempt, t.max_attempts
            "#,
        )
        .bind(queue)
        .bind(job_names)
        .bind(max_tasks as i64)
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to claim tasks: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let mut claimed: Vec<ClaimedTask> = rows
            .into_iter()
            .map(|row| ClaimedTask {
                id: row.get("id"),
                queue: row.get("queue"),
                job_name: row.get("job_name"),
                payload: row.get("payload"),
                attempt: row.get::<i32, _>("attempt") as u32,
                max_attempts: row.get::<i32, _>("max_attempts") as u32,
            })
            .collect();
        // RETURNING order is unspecified.
        claimed.sort_by_key(|t| t.id);

        if !claimed.is_empty() {
            debug!(worker_id, queue, count = claimed.len(), "claimed tasks");
        }
        Ok(claimed)
    }

    async fn heartbeat(&self, task_ids: &[Uuid]) -> Result<(), StoreError> {
        if task_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE queue_jobs SET heartbeat_at = NOW() WHERE id = ANY($1) AND status = 'claimed'",
        )
        .bind(task_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete(&self, task_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = 'completed',
                finished_at = NOW(),
                heartbeat_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id));
        }
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn fail(
        &self,
        task_id: Uuid,
        error: &str,
        retryable: bool,
    ) -> Result<TaskFailureOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT attempt, retry_policy
            FROM queue_jobs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::TaskNotFound(task_id))?;

        let attempt = row.get::<i32, _>("attempt") as u32;
        let policy: RetryPolicy = serde_json::from_value(row.get("retry_policy"))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let outcome = if retryable && policy.has_attempts_remaining(attempt) {
            let next_attempt = attempt + 1;
            let delay = policy.delay_for_attempt(next_attempt);
            sqlx::query(
                r#"
                UPDATE queue_jobs
                SET status = 'pending',
                    claimed_by = NULL,
                    claimed_at = NULL,
                    heartbeat_at = NULL,
                    last_error = $2,
                    error_history = error_history || to_jsonb($2::text),
                    visible_at = $3
                WHERE id = $1
                "#,
            )
            .bind(task_id)
            .bind(error)
            .bind(Utc::now() + chrono_duration(delay))
            .execute(&mut *tx)
            .await?;
            debug!(%task_id, next_attempt, "task will retry");
            TaskFailureOutcome::WillRetry {
                next_attempt,
                delay,
            }
        } else {
            sqlx::query(
                r#"
                UPDATE queue_jobs
                SET status = 'dead',
                    claimed_by = NULL,
                    heartbeat_at = NULL,
                    last_error = $2,
                    error_history = error_history || to_jsonb($2::text),
                    finished_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(task_id)
            .bind(error)
            .execute(&mut *tx)
            .await?;
            debug!(%task_id, attempt, retryable, "task moved to dead");
            TaskFailureOutcome::Dead
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn reclaim_stale(&self, stale_threshold: Duration) -> Result<Vec<Uuid>, StoreError> {
        let threshold = Utc::now() - chrono_duration(stale_threshold);

        let rows = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = 'pending',
                claimed_by = NULL,
                claimed_at = NULL,
                heartbeat_at = NULL
            WHERE status = 'claimed'
              AND heartbeat_at < $1
            RETURNING id
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to reclaim stale tasks: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let reclaimed: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();
        if !reclaimed.is_empty() {
            debug!(count = reclaimed.len(), "reclaimed stale tasks");
        }
        Ok(reclaimed)
    }

    async fn list_dead(&self, queue: &str, limit: usize) -> Result<Vec<DeadTask>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, queue, job_name, payload, attempt, last_error, error_history, finished_at
            FROM queue_jobs
            WHERE status = 'dead' AND queue = $1
            ORDER BY finished_at DESC
            LIMIT $2
            "#,
        )
        .bind(queue)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let history: serde_json::Value = row.get("error_history");
                let error_history = serde_json::from_value(history)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(DeadTask {
                    id: row.get("id"),
                    queue: row.get("queue"),
                    job_name: row.get("job_name"),
                    payload: row.get("payload"),
                    attempts: row.get::<i32, _>("attempt") as u32,
                    last_error: row.get("last_error"),
                    error_history,
                    dead_at: row
                        .get::<Option<chrono::DateTime<Utc>>, _>("finished_at")
                        .unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }

    async fn requeue_dead(&self, task_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = 'pending',
                attempt = 0,
                visible_at = NOW(),
                finished_at = NULL
            WHERE id = $1 AND status = 'dead'
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let status: Option<String> = sqlx::query_scalar("SELECT status FROM queue_jobs WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        match status {
            None => Err(StoreError::TaskNotFound(task_id)),
            Some(status) => Err(StoreError::InvalidState {
                id: task_id,
                status: status.parse()?,
                expected: TaskStatus::Dead,
            }),
        }
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, StoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM queue_jobs WHERE queue = $1 GROUP BY status",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count = row.get::<i64, _>("count") as u64;
            match status.parse()? {
                TaskStatus::Pending => stats.pending = count,
                TaskStatus::Claimed => stats.claimed = count,
                TaskStatus::Completed => stats.completed = count,
                TaskStatus::Dead => stats.dead = count,
            }
        }
        Ok(stats)
    }
}
