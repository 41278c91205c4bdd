//! TaskQueueStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reliability::RetryPolicy;

/// Error type for task queue store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// Task is not in a state that allows the operation
    #[error("task {id} is {status}, expected {expected}")]
    InvalidState {
        id: Uuid,
        status: TaskStatus,
        expected: TaskStatus,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Task status in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to become visible or to be claimed
    Pending,
    /// Claimed by a worker
    Claimed,
    Completed,
    /// Attempts exhausted or failed with a non-retryable error
    Dead,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Claimed => write!(f, "claimed"),
            Self::Completed => write!(f, "completed"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "completed" => Ok(Self::Completed),
            "dead" => Ok(Self::Dead),
            other => Err(StoreError::Serialization(format!(
                "unknown task status: {}",
                other
            ))),
        }
    }
}

/// Definition of a task to be enqueued
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub queue: String,
    pub job_name: String,
    pub payload: serde_json::Value,
    /// Delay before the task becomes claimable
    pub delay: Option<Duration>,
    pub retry_policy: RetryPolicy,
}

impl TaskDefinition {
    pub fn new(
        queue: impl Into<String>,
        job_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            queue: queue.into(),
            job_name: job_name.into(),
            payload,
            delay: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// A task that has been claimed by a worker
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub id: Uuid,
    pub queue: String,
    pub job_name: String,
    pub payload: serde_json::Value,
    /// 1-based attempt number of this delivery
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Outcome of failing a task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskFailureOutcome {
    /// Task will be delivered again after `delay`
    WillRetry { next_attempt: u32, delay: Duration },

    /// Task moved to the dead state
    Dead,
}

/// A dead task, kept for inspection and manual requeue
#[derive(Debug, Clone)]
pub struct DeadTask {
    pub id: Uuid,
    pub queue: String,
    pub job_name: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub error_history: Vec<String>,
    pub dead_at: DateTime<Utc>,
}

/// Per-queue task counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub claimed: u64,
    pub completed: u64,
    pub dead: u64,
}

/// Durable task queue
///
/// Implementations must be safe for many workers claiming concurrently: a task
/// is handed to at most one worker per claim.
#[async_trait]
pub trait TaskQueueStore: Send + Sync + 'static {
    /// Enqueue a task. Returns its id.
    async fn enqueue(&self, task: TaskDefinition) -> Result<Uuid, StoreError>;

    /// Claim up to `max_tasks` visible pending tasks of `queue` whose job
    /// name is in `job_names`, oldest visible first.
    async fn claim(
        &self,
        worker_id: &str,
        queue: &str,
        job_names: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError>;

    /// Refresh the heartbeat of claimed tasks.
    async fn heartbeat(&self, task_ids: &[Uuid]) -> Result<(), StoreError>;

    /// Complete a claimed task.
    async fn complete(&self, task_id: Uuid) -> Result<(), StoreError>;

    /// Fail a claimed task. Requeues it with backoff when `retryable` and
    /// attempts remain, otherwise moves it to dead.
    async fn fail(
        &self,
        task_id: Uuid,
        error: &str,
        retryable: bool,
    ) -> Result<TaskFailureOutcome, StoreError>;

    /// Return claimed tasks whose heartbeat is older than `stale_threshold`
    /// to pending.
    async fn reclaim_stale(&self, stale_threshold: Duration) -> Result<Vec<Uuid>, StoreError>;

    /// Dead tasks of a queue, most recent first.
    async fn list_dead(&self, queue: &str, limit: usize) -> Result<Vec<DeadTask>, StoreError>;

    /// Put a dead task back to pending with a fresh attempt counter.
    async fn requeue_dead(&self, task_id: Uuid) -> Result<(), StoreError>;

    async fn stats(&self, queue: &str) -> Result<QueueStats, StoreError>;
}
