//! In-memory implementation of TaskQueueStore for dev mode and tests

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::reliability::RetryPolicy;

struct TaskState {
    queue: String,
    job_name: String,
    payload: serde_json::Value,
    retry_policy: RetryPolicy,
    status: TaskStatus,
    attempt: u32,
    visible_at: DateTime<Utc>,
    heartbeat_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    error_history: Vec<String>,
    finished_at: Option<DateTime<Utc>>,
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

/// In-memory task queue with the same claim, retry and dead-letter semantics
/// as the PostgreSQL implementation.
///
/// ```
/// use autopilot_durable::InMemoryTaskQueue;
///
/// let queue = InMemoryTaskQueue::new();
/// assert_eq!(queue.pending_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryTaskQueue {
    // Uuid v7 keys sort in enqueue order.
    tasks: RwLock<BTreeMap<Uuid, TaskState>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.count(TaskStatus::Pending)
    }

    pub fn dead_count(&self) -> usize {
        self.count(TaskStatus::Dead)
    }

    pub fn status(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.tasks.read().get(&task_id).map(|t| t.status)
    }

    /// Make every pending task visible now (tests skip backoff with this).
    pub fn make_all_visible(&self) {
        let now = Utc::now();
        for task in self.tasks.write().values_mut() {
            if task.status == TaskStatus::Pending {
                task.visible_at = now;
            }
        }
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks
            .read()
            .values()
            .filter(|t| t.status == status)
            .count()
    }
}

#[async_trait]
impl TaskQueueStore for InMemoryTaskQueue {
    async fn enqueue(&self, task: TaskDefinition) -> Result<Uuid, StoreError> {
        let id = Uuid::now_v7();
        let visible_at = Utc::now() + chrono_duration(task.delay.unwrap_or_default());
        self.tasks.write().insert(
            id,
            TaskState {
                queue: task.queue,
                job_name: task.job_name,
                payload: task.payload,
                retry_policy: task.retry_policy,
                status: TaskStatus::Pending,
                attempt: 0,
                visible_at,
                heartbeat_at: None,
                last_error: None,
                error_history: vec![],
                finished_at: None,
            },
        );
        Ok(id)
    }

    async fn claim(
        &self,
        _worker_id: &str,
        queue: &str,
        job_names: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        let now = Utc::now();
        let mut tasks = self.tasks.write();

        let mut candidates: Vec<(DateTime<Utc>, Uuid)> = tasks
            .iter()
            .filter(|(_, t)| {
                t.status == TaskStatus::Pending
                    && t.queue == queue
                    && job_names.contains(&t.job_name)
                    && t.visible_at <= now
            })
            .map(|(id, t)| (t.visible_at, *id))
            .collect();
        candidates.sort();
        candidates.truncate(max_tasks);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            if let Some(task) = tasks.get_mut(&id) {
                task.status = TaskStatus::Claimed;
                task.heartbeat_at = Some(now);
                task.attempt += 1;
                claimed.push(ClaimedTask {
                    id,
                    queue: task.queue.clone(),
                    job_name: task.job_name.clone(),
                    payload: task.payload.clone(),
                    attempt: task.attempt,
                    max_attempts: task.retry_policy.max_attempts,
                });
            }
        }
        Ok(claimed)
    }

    async fn heartbeat(&self, task_ids: &[Uuid]) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tasks = self.tasks.write();
        for id in task_ids {
            if let Some(task) = tasks.get_mut(id) {
                if task.status == TaskStatus::Claimed {
                    task.heartbeat_at = Some(now);
                }
            }
        }
        Ok(())
    }

    async fn complete(&self, task_id: Uuid) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        task.status = TaskStatus::Completed;
        task.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(
        &self,
        task_id: Uuid,
        error: &str,
        retryable: bool,
    ) -> Result<TaskFailureOutcome, StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;

        task.error_history.push(error.to_string());
        task.last_error = Some(error.to_string());
        task.heartbeat_at = None;

        if retryable && task.retry_policy.has_attempts_remaining(task.attempt) {
            let next_attempt = task.attempt + 1;
            let delay = task.retry_policy.delay_for_attempt(next_attempt);
            task.status = TaskStatus::Pending;
            task.visible_at = Utc::now() + chrono_duration(delay);
            Ok(TaskFailureOutcome::WillRetry {
                next_attempt,
                delay,
            })
        } else {
            task.status = TaskStatus::Dead;
            task.finished_at = Some(Utc::now());
            Ok(TaskFailureOutcome::Dead)
        }
    }

    async fn reclaim_stale(&self, stale_threshold: Duration) -> Result<Vec<Uuid>, StoreError> {
        let threshold = Utc::now() - chrono_duration(stale_threshold);
        let mut reclaimed = vec![];
        for (id, task) in self.tasks.write().iter_mut() {
            if task.status == TaskStatus::Claimed
                && task.heartbeat_at.is_some_and(|at| at < threshold)
            {
                task.status = TaskStatus::Pending;
                task.heartbeat_at = None;
                reclaimed.push(*id);
            }
        }
        Ok(reclaimed)
    }

    async fn list_dead(&self, queue: &str, limit: usize) -> Result<Vec<DeadTask>, StoreError> {
        let tasks = self.tasks.read();
        let mut dead: Vec<DeadTask> = tasks
            .iter()
            .filter(|(_, t)| t.status == TaskStatus::Dead && t.queue == queue)
            .map(|(id, t)| DeadTask {
                id: *id,
                queue: t.queue.clone(),
                job_name: t.job_name.clone(),
                payload: t.payload.clone(),
                attempts: t.attempt,
                last_error: t.last_error.clone(),
                error_history: t.error_history.clone(),
                dead_at: t.finished_at.unwrap_or_else(Utc::now),
            })
            .collect();
        dead.sort_by(|a, b| b.dead_at.cmp(&a.dead_at));
        dead.truncate(limit);
        Ok(dead)
    }

    async fn requeue_dead(&self, task_id: Uuid) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        if task.status != TaskStatus::Dead {
            return Err(StoreError::InvalidState {
                id: task_id,
                status: task.status,
                expected: TaskStatus::Dead,
            });
        }
        task.status = TaskStatus::Pending;
        task.attempt = 0;
        task.visible_at = Utc::now();
        task.finished_at = None;
        Ok(())
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, StoreError> {
        let mut stats = QueueStats::default();
        for task in self.tasks.read().values().filter(|t| t.queue == queue) {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Claimed => stats.claimed += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Dead => stats.dead += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_claim_respects_queue_and_job_name() {
        let store = InMemoryTaskQueue::new();
        store
            .enqueue(TaskDefinition::new("social", "social.publish", json!({"n": 1})))
            .await
            .unwrap();
        store
            .enqueue(TaskDefinition::new("social", "social.draft", json!({"n": 2})))
            .await
            .unwrap();
        store
            .enqueue(TaskDefinition::new("analytics", "analytics.setup", json!({})))
            .await
            .unwrap();

        let claimed = store
            .claim("w1", "social", &names(&["social.publish"]), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].payload["n"], 1);
        assert_eq!(claimed[0].attempt, 1);

        let again = store
            .claim("w2", "social", &names(&["social.publish"]), 10)
            .await
            .unwrap();
        assert!(again.is_empty(), "a claimed task is not handed out twice");
    }

    #[tokio::test]
    async fn test_claim_in_enqueue_order_and_limit() {
        let store = InMemoryTaskQueue::new();
        for n in 0..5 {
            store
                .enqueue(TaskDefinition::new("q", "job", json!({"n": n})))
                .await
                .unwrap();
        }
        let claimed = store.claim("w", "q", &names(&["job"]), 3).await.unwrap();
        let order: Vec<i64> = claimed
            .iter()
            .map(|t| t.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_delayed_task_not_visible() {
        let store = InMemoryTaskQueue::new();
        let id = store
            .enqueue(
                TaskDefinition::new("q", "job", json!({})).with_delay(Duration::from_secs(600)),
            )
            .await
            .unwrap();

        assert!(store.claim("w", "q", &names(&["job"]), 1).await.unwrap().is_empty());
        store.make_all_visible();
        let claimed = store.claim("w", "q", &names(&["job"]), 1).await.unwrap();
        assert_eq!(claimed[0].id, id);
    }

    #[tokio::test]
    async fn test_fail_retries_then_dies() {
        let store = InMemoryTaskQueue::new();
        let id = store
            .enqueue(
                TaskDefinition::new("q", "job", json!({}))
                    .with_retry_policy(RetryPolicy::fixed(Duration::from_secs(30), 2)),
            )
            .await
            .unwrap();

        store.claim("w", "q", &names(&["job"]), 1).await.unwrap();
        let outcome = store.fail(id, "boom", true).await.unwrap();
        assert_eq!(
            outcome,
            TaskFailureOutcome::WillRetry {
                next_attempt: 2,
                delay: Duration::from_secs(30)
            }
        );
        assert!(store.claim("w", "q", &names(&["job"]), 1).await.unwrap().is_empty());

        store.make_all_visible();
        let claimed = store.claim("w", "q", &names(&["job"]), 1).await.unwrap();
        assert_eq!(claimed[0].attempt, 2);
        assert_eq!(claimed[0].max_attempts, 2);

        let outcome = store.fail(id, "boom again", true).await.unwrap();
        assert_eq!(outcome, TaskFailureOutcome::Dead);

        let dead = store.list_dead("q", 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].error_history, vec!["boom", "boom again"]);
        assert_eq!(dead[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_dies_immediately() {
        let store = InMemoryTaskQueue::new();
        let id = store
            .enqueue(TaskDefinition::new("q", "job", json!({})))
            .await
            .unwrap();
        store.claim("w", "q", &names(&["job"]), 1).await.unwrap();

        let outcome = store.fail(id, "bad payload", false).await.unwrap();
        assert_eq!(outcome, TaskFailureOutcome::Dead);
        assert_eq!(store.dead_count(), 1);
    }

    #[tokio::test]
    async fn test_requeue_dead_resets_attempts() {
        let store = InMemoryTaskQueue::new();
        let id = store
            .enqueue(TaskDefinition::new("q", "job", json!({})))
            .await
            .unwrap();
        assert!(matches!(
            store.requeue_dead(id).await,
            Err(StoreError::InvalidState { .. })
        ));

        store.claim("w", "q", &names(&["job"]), 1).await.unwrap();
        store.fail(id, "nope", false).await.unwrap();
        store.requeue_dead(id).await.unwrap();

        let claimed = store.claim("w", "q", &names(&["job"]), 1).await.unwrap();
        assert_eq!(claimed[0].attempt, 1);
    }

    #[tokio::test]
    async fn test_reclaim_stale_and_heartbeat() {
        let store = InMemoryTaskQueue::new();
        let id = store
            .enqueue(TaskDefinition::new("q", "job", json!({})))
            .await
            .unwrap();
        store.claim("w", "q", &names(&["job"]), 1).await.unwrap();

        assert!(store
            .reclaim_stale(Duration::from_secs(60))
            .await
            .unwrap()
            .is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.heartbeat(&[id]).await.unwrap();
        assert!(store
            .reclaim_stale(Duration::from_millis(10))
            .await
            .unwrap()
            .is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let reclaimed = store.reclaim_stale(Duration::from_millis(10)).await.unwrap();
        assert_eq!(reclaimed, vec![id]);
        assert_eq!(store.status(id), Some(TaskStatus::Pending));
    }

    #[tokio::test]
    async fn test_stats() {
        let store = InMemoryTaskQueue::new();
        let a = store
            .enqueue(TaskDefinition::new("q", "job", json!({})))
            .await
            .unwrap();
        store
            .enqueue(TaskDefinition::new("q", "job", json!({})))
            .await
            .unwrap();
        store.claim("w", "q", &names(&["job"]), 1).await.unwrap();
        store.complete(a).await.unwrap();

        let stats = store.stats("q").await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                pending: 1,
                claimed: 0,
                completed: 1,
                dead: 0
            }
        );
        assert_eq!(store.stats("other").await.unwrap(), QueueStats::default());
    }
}
