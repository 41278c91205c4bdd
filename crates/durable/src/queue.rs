//! JobQueue adapter over the durable task store

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use autopilot_core::{EnqueueOptions, JobQueue, QueueError};

use crate::persistence::{StoreError, TaskDefinition, TaskQueueStore};
use crate::reliability::RetryPolicy;

/// Enqueues engine jobs as durable tasks carrying one retry policy.
#[derive(Clone)]
pub struct DurableJobQueue {
    store: Arc<dyn TaskQueueStore>,
    retry_policy: RetryPolicy,
}

impl DurableJobQueue {
    pub fn new(store: Arc<dyn TaskQueueStore>) -> Self {
        Self {
            store,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn TaskQueueStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl From<StoreError> for QueueError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Serialization(msg) => QueueError::Serialization(msg),
            other => QueueError::Unavailable(other.to_string()),
        }
    }
}

#[async_trait]
impl JobQueue for DurableJobQueue {
    async fn add_job(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<String, QueueError> {
        let mut task = TaskDefinition::new(queue, job_name, payload)
            .with_retry_policy(self.retry_policy.clone());
        if let Some(delay) = options.delay {
            task = task.with_delay(delay);
        }

        let id = self.store.enqueue(task).await?;
        debug!(task_id = %id, queue, job_name, "job enqueued");
        Ok(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryTaskQueue, TaskStatus};
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_add_job_enqueues_with_policy() {
        let store = Arc::new(InMemoryTaskQueue::new());
        let queue = DurableJobQueue::new(store.clone())
            .with_retry_policy(RetryPolicy::fixed(Duration::from_millis(1), 2));

        let id = queue
            .add_job("social", "keyword.research", json!({"x": 1}), EnqueueOptions::default())
            .await
            .unwrap();
        let id: Uuid = id.parse().unwrap();
        assert_eq!(store.status(id), Some(TaskStatus::Pending));

        let claimed = store
            .claim("w", "social", &["keyword.research".to_string()], 1)
            .await
            .unwrap();
        assert_eq!(claimed[0].id, id);
        assert_eq!(claimed[0].max_attempts, 2);
        assert_eq!(claimed[0].payload, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_delay_hides_job() {
        let store = Arc::new(InMemoryTaskQueue::new());
        let queue = DurableJobQueue::new(store.clone());

        queue
            .add_job(
                "social",
                "social.publish",
                json!({}),
                EnqueueOptions::delayed(Duration::from_secs(3600)),
            )
            .await
            .unwrap();

        let claimed = store
            .claim("w", "social", &["social.publish".to_string()], 1)
            .await
            .unwrap();
        assert!(claimed.is_empty());
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            QueueError::from(StoreError::Database("down".into())),
            QueueError::Unavailable(_)
        ));
        assert!(matches!(
            QueueError::from(StoreError::Serialization("bad".into())),
            QueueError::Serialization(_)
        ));
    }
}
